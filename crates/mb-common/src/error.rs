//! Error types for Modbus Station operations.

use crate::codes::ExceptionCode;
use thiserror::Error;

/// Errors covering configuration, framing, transport, and slave responses.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MbError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O operation error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Malformed or truncated frame.
    #[error("frame error: {0}")]
    Frame(String),

    /// No valid response arrived before the deadline.
    #[error("response timeout")]
    Timeout,

    /// A response arrived but its shape does not match the request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The slave answered with a Modbus exception.
    #[error("modbus exception: {0}")]
    Exception(ExceptionCode),

    /// The ambient default store has not been created yet.
    #[error("modbus data store not created")]
    StoreNotInitialized,
}

impl MbError {
    /// Numeric status code for embedders that want the classic C-style
    /// mapping: exception responses keep their wire value, the
    /// missing-store sentinel is -1, a timeout is -3, and any transport
    /// failure is -2.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Exception(code) => i32::from(code.as_byte()),
            Self::StoreNotInitialized => -1,
            Self::Timeout => -3,
            _ => -2,
        }
    }
}

impl From<std::io::Error> for MbError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Convenience type alias for Modbus Station operations.
pub type MbResult<T> = Result<T, MbError>;
