//! # kwikapi-core
//!
//! Registry and argument handling for kwikapi.
//!
//! This crate provides:
//! - Type descriptors and the type-expression parser
//! - Method declarations (builder or signature string) and API fragments
//! - The method registry with its documentation projection
//! - Argument binding and coercion
//! - The per-request context

pub mod coerce;
pub mod context;
pub mod error;
pub mod method;
pub mod registry;
pub mod signature;
pub mod types;

pub use coerce::{bind, coerce_text, coerce_value, RawArg, RawParams};
pub use context::{AuthInfo, RequestContext, ResponseState};
pub use error::CoreError;
pub use method::{
    ApiFragment, Arg, Args, CallError, IntoTypeDescriptor, Method, MethodEntry, Output, ParamSpec,
    ValueStream,
};
pub use registry::{ApiDoc, MethodDoc, MethodRegistry, Namespace, VersionDoc};
pub use signature::Signature;
pub use types::{ScalarKind, TypeDescriptor};

pub use kwikapi_protocol::ErrorCode;
