//! Server configuration.

use farmsync_core::{StoreConfig, SyncConfig};
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where rows are stored.
    pub store: StoreConfig,
    /// Ingestion and response behavior.
    pub sync: SyncConfig,
    /// Maximum rows accepted in one request.
    pub max_push_rows: usize,
    /// Whether every call must carry a signed token.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// How long a token stays valid after issue.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a configuration serving the given store.
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            sync: SyncConfig::default(),
            max_push_rows: 10_000,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the sync behavior.
    #[must_use]
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the maximum rows per request.
    #[must_use]
    pub fn with_max_push_rows(mut self, rows: usize) -> Self {
        self.max_push_rows = rows;
        self
    }

    /// Enables authentication with the given secret.
    #[must_use]
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    #[must_use]
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(StoreConfig::in_memory())
    }
}
