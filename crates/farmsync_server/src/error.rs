//! Error types for the sync server.

use farmsync_core::CoreError;
use farmsync_protocol::{ErrorBody, ErrorKind, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving a sync call.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Caller identity could not be established.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The request carries more rows than allowed.
    #[error("too many rows: {rows} > {limit}")]
    PayloadTooLarge {
        /// Rows in the request.
        rows: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// The engine rejected or failed the call.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The body could not be decoded or encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Wire category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Protocol(_) => ErrorKind::BadRequest,
            ServerError::AuthenticationFailed(_) => ErrorKind::Unauthorized,
            ServerError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            ServerError::Core(err) => err.kind(),
            ServerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Converts to the wire error body.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.kind(), self.to_string())
    }
}
