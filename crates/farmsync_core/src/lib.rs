//! # farmsync core
//!
//! Multi-tenant push/pull reconciliation engine for offline-first farm
//! management clients.
//!
//! This crate provides:
//! - The entity registry: every synchronized kind, its id policy, natural
//!   key, references, immutable columns and ingestion order
//! - Identifier reconciliation of provisional ids and name-only references
//! - Change ingestion in dependency order, all-or-nothing per batch
//! - Delta extraction against a monotonic watermark, tombstones included
//! - The sync orchestrator tying both together behind sync, push and pull
//! - A SQLite store with schema migrations and a persisted write clock
//!
//! ## Key invariants
//!
//! - Rows of one tenant are never read, written or reported to another
//! - Every committed batch gets a stamp strictly greater than the last one
//! - A failed batch leaves no trace in the store
//! - Re-sending a payload converges to the same stored state
//!
//! ```rust,ignore
//! use farmsync_core::{Store, SyncConfig, SyncOrchestrator, TenantId};
//! use farmsync_protocol::SyncRequest;
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::open_in_memory()?);
//! let sync = SyncOrchestrator::new(store, SyncConfig::default());
//! let response = sync.sync(TenantId::random(), &SyncRequest::new())?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod extract;
mod ingest;
mod orchestrator;
mod reconcile;
mod registry;
mod statement;
mod stats;
mod store;
mod types;
mod value;

pub use config::{StoreConfig, SyncConfig};
pub use error::{CoreError, CoreResult};
pub use extract::{count_rows, extract_deltas, extract_kind, Deltas, KindCounts};
pub use ingest::{ChangeBatch, ChangeIngestion, ChangeIntent, IngestReport, SkipReason};
pub use orchestrator::{Extraction, SyncOrchestrator};
pub use reconcile::{IdMap, Ownership, Reconciler, Reference};
pub use registry::{
    ColumnDefault, ColumnSpec, ColumnType, EntityDescriptor, EntityKind, ForeignKey, IdPolicy,
    NaturalKey, Registry,
};
pub use stats::{StatsSnapshot, SyncStats};
pub use store::clock;
pub use store::schema::{known_migrations, MigrationRunResult, SchemaVersion, LATEST_VERSION};
pub use store::Store;
pub use types::{RowId, TenantId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
