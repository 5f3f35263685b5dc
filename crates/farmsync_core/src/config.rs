//! Store and sync configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for opening a [`Store`](crate::Store).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file; `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,

    /// Connections kept open between calls (file-backed stores only).
    pub max_idle_connections: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_secs(5),
            max_idle_connections: 4,
        }
    }
}

impl StoreConfig {
    /// Creates an in-memory configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates a file-backed configuration.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Sets the busy timeout.
    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the number of idle connections kept in the pool.
    #[must_use]
    pub fn max_idle_connections(mut self, count: usize) -> Self {
        self.max_idle_connections = count;
        self
    }

    /// Returns true if the store lives in memory.
    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }
}

/// Behavior switches for ingestion and response building.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Create placeholder parents (sections, pens, medications, feed items,
    /// roles) when a reference names one by natural key and none exists.
    pub synthesize_missing_parents: bool,

    /// Include the provisional-to-server id table in responses.
    pub echo_id_mappings: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            synthesize_missing_parents: true,
            echo_id_mappings: true,
        }
    }
}

impl SyncConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether missing parents are synthesized.
    #[must_use]
    pub const fn synthesize_missing_parents(mut self, value: bool) -> Self {
        self.synthesize_missing_parents = value;
        self
    }

    /// Sets whether id mappings are echoed.
    #[must_use]
    pub const fn echo_id_mappings(mut self, value: bool) -> Self {
        self.echo_id_mappings = value;
        self
    }
}
