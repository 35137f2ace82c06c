//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a message.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// A line exceeds the maximum allowed size.
    #[error("line too large: {size} bytes exceeds maximum of {max} bytes")]
    LineTooLarge {
        /// Actual line size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A line was not valid UTF-8.
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// The backend speaks a different protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Version this host speaks.
        expected: u32,
        /// Version announced by the backend.
        got: u32,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<std::str::Utf8Error> for ProtocolError {
    fn from(err: std::str::Utf8Error) -> Self {
        ProtocolError::InvalidUtf8(err.to_string())
    }
}
