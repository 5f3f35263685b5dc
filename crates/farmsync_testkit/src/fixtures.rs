//! Store and orchestrator fixtures.

use farmsync_core::{CoreResult, Store, StoreConfig, SyncConfig, SyncOrchestrator, TenantId};
use farmsync_protocol::{PullRequest, SyncRequest, SyncResponse};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// An orchestrator over a throwaway store, acting for one default tenant.
pub struct TestSync {
    /// The orchestrator under test.
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Tenant used by the convenience methods.
    pub tenant: TenantId,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestSync {
    /// Creates a fixture over a fresh in-memory store.
    pub fn memory() -> Self {
        Self::memory_with(SyncConfig::default())
    }

    /// Creates an in-memory fixture with a custom sync configuration.
    pub fn memory_with(config: SyncConfig) -> Self {
        let store = Store::open_in_memory().expect("Failed to open in-memory store");
        Self::over(store, config, None)
    }

    /// Creates a fixture over a store file in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::open(StoreConfig::file(temp_dir.path().join("farmsync.db")))
            .expect("Failed to open file store");
        Self::over(store, SyncConfig::default(), Some(temp_dir))
    }

    fn over(store: Store, config: SyncConfig, temp_dir: Option<TempDir>) -> Self {
        Self {
            orchestrator: Arc::new(SyncOrchestrator::new(Arc::new(store), config)),
            tenant: TenantId::random(),
            _temp_dir: temp_dir,
        }
    }

    /// Returns the store path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir
            .as_ref()
            .map(|d| d.path().join("farmsync.db"))
    }

    /// Syncs as the default tenant.
    pub fn sync(&self, request: &SyncRequest) -> CoreResult<SyncResponse> {
        self.orchestrator.sync(self.tenant, request)
    }

    /// Syncs as another tenant.
    pub fn sync_as(&self, tenant: TenantId, request: &SyncRequest) -> CoreResult<SyncResponse> {
        self.orchestrator.sync(tenant, request)
    }

    /// Pulls everything the tenant owns.
    pub fn snapshot(&self, tenant: TenantId) -> SyncResponse {
        self.orchestrator
            .pull(tenant, &PullRequest::new(None))
            .expect("Failed to pull snapshot")
    }
}

impl std::ops::Deref for TestSync {
    type Target = SyncOrchestrator;

    fn deref(&self) -> &Self::Target {
        &self.orchestrator
    }
}

/// Runs a test with a temporary in-memory orchestrator.
pub fn with_sync<F, R>(f: F) -> R
where
    F: FnOnce(&TestSync) -> R,
{
    let fixture = TestSync::memory();
    f(&fixture)
}

/// Generates `count` distinct tenants.
pub fn tenants(count: usize) -> Vec<TenantId> {
    (0..count).map(|_| TenantId::random()).collect()
}
