//! # kwikapi-server
//!
//! Request dispatch and HTTP transport for kwikapi.
//!
//! This crate provides:
//! - The request dispatcher (routing, protocol negotiation, binding,
//!   invocation and envelope serialization)
//! - Transport-neutral request and response types
//! - Pluggable authentication with a bearer-token back-end
//! - YAML and environment configuration
//! - Prometheus metrics
//! - A hyper HTTP/1 adapter

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod server;
pub mod transport;

pub use auth::{Authenticator, BearerAuthenticator, TokenValidator};
pub use config::{ApiConfig, AuthConfig, Config, ConfigError, MetricsConfig, NetworkConfig};
pub use dispatcher::{DispatchSettings, Dispatcher, Stage};
pub use error::ServerError;
pub use metrics::Metrics;
pub use server::HttpServer;
pub use transport::{ChunkStream, RequestBody, ResponseBody, TransportRequest, TransportResponse};
