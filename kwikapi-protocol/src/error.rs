//! Protocol error types and the canonical error-code taxonomy.

use std::fmt;
use thiserror::Error;

/// Errors raised while encoding, decoding or selecting a wire protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("\"{0}\" protocol is already registered")]
    ProtocolAlreadyExists(String),

    #[error("\"{0}\" protocol does not exist")]
    UnknownProtocol(String),

    #[error("streaming not supported for \"{0}\" protocol")]
    StreamingNotSupported(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("truncated stream: {remaining} trailing bytes do not form a record")]
    TruncatedStream { remaining: usize },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("MessagePack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Returns the taxonomy code reported in failure envelopes.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ProtocolError::ProtocolAlreadyExists(_) => ErrorCode::ProtocolAlreadyExists,
            ProtocolError::UnknownProtocol(_) => ErrorCode::UnknownProtocol,
            ProtocolError::StreamingNotSupported(_) => ErrorCode::StreamingNotSupported,
            _ => ErrorCode::Internal,
        }
    }
}

/// Canonical error kinds and their numeric codes.
///
/// The numbers are part of the wire contract and must stay stable.
/// Callables may report their own codes; those are not required to appear
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Internal,
    DuplicateApiFunction,
    UnknownApiFunction,
    ProtocolAlreadyExists,
    UnknownProtocol,
    UnknownVersion,
    UnsupportedType,
    TypeNotSpecified,
    UnknownVersionOrNamespace,
    StreamingNotSupported,
    KeywordArgumentError,
    AuthenticationError,
    NonKeywordArgumentError,
}

impl ErrorCode {
    const ALL: [ErrorCode; 13] = [
        ErrorCode::Internal,
        ErrorCode::DuplicateApiFunction,
        ErrorCode::UnknownApiFunction,
        ErrorCode::ProtocolAlreadyExists,
        ErrorCode::UnknownProtocol,
        ErrorCode::UnknownVersion,
        ErrorCode::UnsupportedType,
        ErrorCode::TypeNotSpecified,
        ErrorCode::UnknownVersionOrNamespace,
        ErrorCode::StreamingNotSupported,
        ErrorCode::KeywordArgumentError,
        ErrorCode::AuthenticationError,
        ErrorCode::NonKeywordArgumentError,
    ];

    /// Returns the numeric code carried in the envelope.
    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::Internal => 50000,
            ErrorCode::DuplicateApiFunction => 50001,
            ErrorCode::UnknownApiFunction => 50002,
            ErrorCode::ProtocolAlreadyExists => 50003,
            ErrorCode::UnknownProtocol => 50004,
            ErrorCode::UnknownVersion => 50005,
            ErrorCode::UnsupportedType => 50006,
            ErrorCode::TypeNotSpecified => 50007,
            ErrorCode::UnknownVersionOrNamespace => 50008,
            ErrorCode::StreamingNotSupported => 50009,
            ErrorCode::KeywordArgumentError => 50010,
            ErrorCode::AuthenticationError => 50011,
            ErrorCode::NonKeywordArgumentError => 50012,
        }
    }

    /// Looks up the canonical kind for a numeric code.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Returns the kind name reported in the envelope `error` field.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::Internal => "InternalError",
            ErrorCode::DuplicateApiFunction => "DuplicateAPIFunction",
            ErrorCode::UnknownApiFunction => "UnknownAPIFunction",
            ErrorCode::ProtocolAlreadyExists => "ProtocolAlreadyExists",
            ErrorCode::UnknownProtocol => "UnknownProtocol",
            ErrorCode::UnknownVersion => "UnknownVersion",
            ErrorCode::UnsupportedType => "UnsupportedType",
            ErrorCode::TypeNotSpecified => "TypeNotSpecified",
            ErrorCode::UnknownVersionOrNamespace => "UnknownVersionOrNamespace",
            ErrorCode::StreamingNotSupported => "StreamingNotSupported",
            ErrorCode::KeywordArgumentError => "KeywordArgumentError",
            ErrorCode::AuthenticationError => "AuthenticationError",
            ErrorCode::NonKeywordArgumentError => "NonKeywordArgumentError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
