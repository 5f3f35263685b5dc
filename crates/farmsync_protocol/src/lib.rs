//! # farmsync protocol
//!
//! Wire types for the farmsync push/pull synchronization protocol.
//!
//! This crate provides:
//! - `Watermark`, the monotonic cutoff used for incremental pulls
//! - `SyncRequest` / `SyncResponse` for the combined push-then-pull call
//! - Legacy `PushRequest` (flat `{table, operation, data}` list) and `PullRequest`
//! - `ErrorBody` for structured `{kind, message}` failures
//! - JSON encoding/decoding through the `WireMessage` trait
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod operation;
mod watermark;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ChangeSet, ErrorBody, ErrorKind, IdMappings, KindDelta, PullRequest, PushRequest,
    PushResponse, Row, SyncMessage, SyncRequest, SyncResponse, WireMessage,
};
pub use operation::{LegacyChange, LegacyOperation};
pub use watermark::Watermark;
