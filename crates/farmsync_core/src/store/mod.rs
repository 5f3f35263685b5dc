//! SQLite-backed row store.
//!
//! The store owns the connections and hands out transactions through
//! closures: [`Store::write`] runs inside `BEGIN IMMEDIATE` and commits only
//! if the closure succeeds, [`Store::read`] runs inside a deferred
//! transaction so every query in the closure sees one snapshot.
//!
//! In-memory stores share a single connection. File-backed stores keep a
//! small pool of idle connections in WAL mode so readers do not block the
//! writer.

pub mod clock;
pub mod schema;

use crate::config::StoreConfig;
use crate::error::CoreResult;
use crate::registry::Registry;
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::fmt;
use tracing::{debug, info};

/// Quotes an SQL identifier.
pub(crate) fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

enum Backend {
    Memory(Mutex<Connection>),
    File(Mutex<Vec<Connection>>),
}

/// A migrated SQLite database holding every tenant's rows.
pub struct Store {
    config: StoreConfig,
    registry: Registry,
    backend: Backend,
    migration: schema::MigrationRunResult,
}

impl Store {
    /// Opens (creating if needed) and migrates a store.
    pub fn open(config: StoreConfig) -> CoreResult<Self> {
        let registry = Registry::new()?;
        let mut conn = connect(&config)?;
        let run = schema::migrate(&mut conn, &registry)?;

        info!(
            path = ?config.path,
            schema_version = run.final_version,
            migrations_applied = run.applied.len(),
            "store opened"
        );

        let backend = if config.is_in_memory() {
            Backend::Memory(Mutex::new(conn))
        } else {
            Backend::File(Mutex::new(vec![conn]))
        };

        Ok(Self {
            config,
            registry,
            backend,
            migration: run,
        })
    }

    /// Opens a fresh in-memory store.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the entity registry the schema was built from.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the schema version after migration.
    pub fn schema_version(&self) -> schema::SchemaVersion {
        self.migration.final_version
    }

    /// Returns what the migration run on open did.
    pub fn migration(&self) -> &schema::MigrationRunResult {
        &self.migration
    }

    fn with_connection<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Connection) -> CoreResult<T>,
    {
        match &self.backend {
            Backend::Memory(conn) => {
                let mut conn = conn.lock();
                f(&mut conn)
            }
            Backend::File(idle) => {
                let pooled = idle.lock().pop();
                let mut conn = match pooled {
                    Some(conn) => conn,
                    None => {
                        debug!("opening additional store connection");
                        connect(&self.config)?
                    }
                };
                let result = f(&mut conn);

                let mut idle = idle.lock();
                if idle.len() < self.config.max_idle_connections {
                    idle.push(conn);
                }
                result
            }
        }
    }

    /// Runs `f` inside a write transaction.
    ///
    /// Writers are serialized. The transaction commits if `f` returns `Ok`
    /// and rolls back otherwise, leaving no partial effects.
    pub fn write<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CoreResult<T>,
    {
        self.with_connection(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// Runs `f` inside a read transaction with a consistent snapshot.
    pub fn read<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CoreResult<T>,
    {
        self.with_connection(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.config.path)
            .field("schema_version", &self.migration.final_version)
            .finish_non_exhaustive()
    }
}

fn connect(config: &StoreConfig) -> CoreResult<Connection> {
    let conn = match &config.path {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    conn.busy_timeout(config.busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    if !config.is_in_memory() {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    Ok(conn)
}
