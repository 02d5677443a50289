//! Server error types.

use crate::config::ConfigError;
use kwikapi_core::CallError;
use kwikapi_protocol::{Envelope, ErrorCode};
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Protocol(#[from] kwikapi_protocol::ProtocolError),

    #[error("{0}")]
    Core(#[from] kwikapi_core::CoreError),

    #[error("{0}")]
    Call(CallError),

    #[error("authentication required")]
    NotAuthenticated,

    #[error("Invalid auth type: {0}")]
    AuthFailed(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<CallError> for ServerError {
    fn from(err: CallError) -> Self {
        ServerError::Call(err)
    }
}

impl ServerError {
    /// Converts to the canonical error kind.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServerError::Protocol(e) => e.error_code(),
            ServerError::Core(e) => e.error_code(),
            ServerError::Call(e) => e
                .code
                .and_then(ErrorCode::from_code)
                .unwrap_or(ErrorCode::Internal),
            ServerError::NotAuthenticated | ServerError::AuthFailed(_) => {
                ErrorCode::AuthenticationError
            }
            ServerError::Io(_) | ServerError::Config(_) | ServerError::Metrics(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Numeric code reported to the caller. Application codes raised by a
    /// callable pass through unchanged.
    pub fn code(&self) -> i64 {
        match self {
            ServerError::Call(e) => e.code(),
            other => other.error_code().code(),
        }
    }

    /// Builds the failure envelope for this error.
    pub fn to_envelope(&self) -> Envelope {
        match self {
            ServerError::Call(e) => {
                let envelope = Envelope::failure(e.message.clone(), e.code());
                match e.kind {
                    Some(ref kind) => envelope.with_error(kind.clone()),
                    None => envelope,
                }
            }
            other => Envelope::from_code(other.error_code(), other.to_string()),
        }
    }
}
