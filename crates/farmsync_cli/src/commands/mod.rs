//! CLI command implementations.

pub mod inspect;
pub mod migrate;
pub mod sync;

use farmsync_core::{Store, StoreConfig, SyncConfig, SyncOrchestrator};
use std::path::Path;
use std::sync::Arc;

/// Opens (and migrates) the store at `path` behind an orchestrator.
pub fn open(path: &Path) -> Result<SyncOrchestrator, Box<dyn std::error::Error>> {
    let store = Store::open(StoreConfig::file(path))?;
    Ok(SyncOrchestrator::new(Arc::new(store), SyncConfig::default()))
}
