//! Core error types.

use kwikapi_protocol::ErrorCode;
use thiserror::Error;

/// Errors from registration, routing and argument binding.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("\"{method}\" API function already exists in the version \"{version}\"")]
    DuplicateApiFunction {
        version: String,
        namespace: String,
        method: String,
    },

    #[error("Unknown API Function: \"{method}\"")]
    UnknownApiFunction { method: String },

    #[error("\"{version}\" There are no methods associated with this version")]
    UnknownVersion { version: String },

    #[error("No methods associated with this version \"{version}\" or namespace \"{namespace}\".")]
    UnknownVersionOrNamespace { version: String, namespace: String },

    #[error("\"{ty}\" type is not supported: {reason}")]
    UnsupportedType { ty: String, reason: String },

    #[error("Please specify type for the argument \"{arg}\"")]
    TypeNotSpecified { arg: String },

    #[error("{reason}")]
    KeywordArgument { reason: String },

    #[error("Found non keyword arguments: {args}")]
    NonKeywordArguments { args: String },

    #[error("invalid type expression '{expr}': {reason}")]
    InvalidType { expr: String, reason: String },

    #[error("invalid method '{method}': {reason}")]
    InvalidMethod { method: String, reason: String },
}

impl CoreError {
    /// Returns the taxonomy code reported in failure envelopes.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CoreError::DuplicateApiFunction { .. } => ErrorCode::DuplicateApiFunction,
            CoreError::UnknownApiFunction { .. } => ErrorCode::UnknownApiFunction,
            CoreError::UnknownVersion { .. } => ErrorCode::UnknownVersion,
            CoreError::UnknownVersionOrNamespace { .. } => ErrorCode::UnknownVersionOrNamespace,
            CoreError::UnsupportedType { .. } => ErrorCode::UnsupportedType,
            CoreError::TypeNotSpecified { .. } => ErrorCode::TypeNotSpecified,
            CoreError::KeywordArgument { .. } => ErrorCode::KeywordArgumentError,
            CoreError::NonKeywordArguments { .. } => ErrorCode::NonKeywordArgumentError,
            CoreError::InvalidType { .. } => ErrorCode::Internal,
            CoreError::InvalidMethod { .. } => ErrorCode::Internal,
        }
    }

    pub(crate) fn unsupported(ty: impl ToString, reason: impl Into<String>) -> Self {
        CoreError::UnsupportedType {
            ty: ty.to_string(),
            reason: reason.into(),
        }
    }
}
