//! Error types for the reconciliation engine.

use farmsync_protocol::{ErrorKind, ProtocolError};
use rusqlite::ffi;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while ingesting or extracting changes.
///
/// Any error returned from inside a write transaction rolls the whole batch
/// back. Conditions that only affect one row (unresolved reference, missing
/// identifier) are not errors; the row is skipped and logged instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An integrity rule was violated by an incoming row.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the violated rule.
        message: String,
    },

    /// A row tried to change a field that may not change after creation.
    #[error("immutable field {kind}.{field} changed on row {id}")]
    ImmutableField {
        /// Entity kind wire name.
        kind: &'static str,
        /// Column name.
        field: &'static str,
        /// Identifier of the offending row.
        id: String,
    },

    /// A natural key is already taken by another row of the same tenant.
    #[error("uniqueness conflict: {message}")]
    UniquenessConflict {
        /// Description of the conflict.
        message: String,
    },

    /// SQLite failure that is not an integrity violation.
    #[error("storage error: {0}")]
    Storage(rusqlite::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wire decoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Schema migration failed.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a uniqueness conflict error.
    pub fn uniqueness_conflict(message: impl Into<String>) -> Self {
        Self::UniquenessConflict {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Returns the wire category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation { .. } | CoreError::ImmutableField { .. } => ErrorKind::Validation,
            CoreError::UniquenessConflict { .. } => ErrorKind::UniquenessConflict,
            CoreError::Json(_) | CoreError::Protocol(_) => ErrorKind::BadRequest,
            CoreError::Storage(_)
            | CoreError::Io(_)
            | CoreError::InvalidOperation { .. }
            | CoreError::MigrationFailed { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if resubmitting the identical batch may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Constraint failures are classified by SQLite's extended result code so that
/// callers see validation and uniqueness errors instead of raw storage errors.
impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            let detail = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return CoreError::uniqueness_conflict(detail);
                }
                ffi::SQLITE_CONSTRAINT_CHECK
                | ffi::SQLITE_CONSTRAINT_NOTNULL
                | ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return CoreError::validation(detail);
                }
                _ => {}
            }
        }
        CoreError::Storage(err)
    }
}
