//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The message body is not valid JSON for the expected shape.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// A watermark value could not be interpreted.
    #[error("invalid watermark: {0}")]
    InvalidWatermark(String),

    /// A legacy operation name is not one of create, update, delete.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}
