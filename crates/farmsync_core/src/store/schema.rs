//! Schema migrations.
//!
//! The schema version lives in SQLite's `user_version` header field. Each
//! migration runs in its own immediate transaction together with the version
//! bump, so a crash leaves the database at the previous version. Entity tables
//! are generated from the registry descriptors.

use super::ident;
use crate::error::{CoreError, CoreResult};
use crate::registry::{EntityDescriptor, IdPolicy, Registry};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

/// Schema version number.
pub type SchemaVersion = u32;

struct Migration {
    version: SchemaVersion,
    name: &'static str,
    apply: fn(&Transaction<'_>, &Registry) -> CoreResult<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "entity_tables",
        apply: create_entity_tables,
    },
    Migration {
        version: 2,
        name: "delta_indexes",
        apply: create_delta_indexes,
    },
];

/// Newest schema version this build knows about.
pub const LATEST_VERSION: SchemaVersion = 2;

/// Result of bringing a database up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRunResult {
    /// Version found when opening.
    pub initial_version: SchemaVersion,
    /// Version after all pending migrations ran.
    pub final_version: SchemaVersion,
    /// Names of the migrations applied, in order.
    pub applied: Vec<&'static str>,
}

/// Every migration this build knows, as `(version, name)` in order.
pub fn known_migrations() -> impl Iterator<Item = (SchemaVersion, &'static str)> {
    MIGRATIONS.iter().map(|m| (m.version, m.name))
}

/// Reads the schema version of a database.
pub fn schema_version(conn: &Connection) -> CoreResult<SchemaVersion> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Applies every migration newer than the database's version.
pub fn migrate(conn: &mut Connection, registry: &Registry) -> CoreResult<MigrationRunResult> {
    let initial_version = schema_version(conn)?;
    if initial_version > LATEST_VERSION {
        return Err(CoreError::migration_failed(format!(
            "database schema version {initial_version} is newer than supported version {LATEST_VERSION}"
        )));
    }

    let mut applied = Vec::new();
    for migration in MIGRATIONS.iter().filter(|m| m.version > initial_version) {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        (migration.apply)(&tx, registry).map_err(|err| {
            CoreError::migration_failed(format!("{}: {err}", migration.name))
        })?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;

        info!(
            version = migration.version,
            name = migration.name,
            "applied schema migration"
        );
        applied.push(migration.name);
    }

    Ok(MigrationRunResult {
        initial_version,
        final_version: schema_version(conn)?,
        applied,
    })
}

fn create_entity_tables(tx: &Transaction<'_>, registry: &Registry) -> CoreResult<()> {
    tx.execute_batch(
        "CREATE TABLE sync_clock (
             id INTEGER PRIMARY KEY CHECK (id = 1),
             last_stamp INTEGER NOT NULL
         );
         INSERT INTO sync_clock (id, last_stamp) VALUES (1, 0);",
    )?;
    for descriptor in registry.descriptors() {
        tx.execute_batch(&create_table_sql(descriptor))?;
        if let Some(sql) = natural_key_index_sql(descriptor) {
            tx.execute_batch(&sql)?;
        }
    }
    Ok(())
}

fn create_delta_indexes(tx: &Transaction<'_>, registry: &Registry) -> CoreResult<()> {
    for descriptor in registry.descriptors() {
        tx.execute_batch(&delta_index_sql(descriptor))?;
    }
    Ok(())
}

/// Builds the `CREATE TABLE` statement for a kind.
pub fn create_table_sql(descriptor: &EntityDescriptor) -> String {
    let mut lines = Vec::new();
    match descriptor.id_policy {
        IdPolicy::ServerAssigned => lines.push(format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", ident("id"))),
        IdPolicy::ClientAssigned => lines.push(format!("{} TEXT PRIMARY KEY NOT NULL", ident("id"))),
        IdPolicy::Composite => {}
    }
    lines.push(format!("{} TEXT NOT NULL", ident("tenant_id")));

    for fk in descriptor.references {
        let target = fk.target.descriptor();
        let mut line = format!("{} {}", ident(fk.column), target.id_policy.sql_type());
        if fk.required {
            line.push_str(" NOT NULL");
        }
        line.push_str(&format!(" REFERENCES {} ({})", ident(target.table), ident("id")));
        lines.push(line);
    }

    for column in descriptor.columns {
        let mut line = format!("{} {}", ident(column.name), column.ty.sql_type());
        if column.required {
            line.push_str(" NOT NULL");
        }
        if let Some(check) = column.check {
            line.push_str(&format!(" CHECK ({check})"));
        }
        lines.push(line);
    }

    if descriptor.tracks_timestamps {
        lines.push(format!("{} INTEGER NOT NULL", ident("created_at")));
        lines.push(format!("{} INTEGER NOT NULL", ident("updated_at")));
    }
    lines.push(format!("{} INTEGER", ident("deleted_at")));

    if descriptor.id_policy == IdPolicy::Composite {
        let key: Vec<String> = descriptor
            .composite_key()
            .into_iter()
            .map(ident)
            .collect();
        lines.push(format!("PRIMARY KEY ({})", key.join(", ")));
    }

    format!(
        "CREATE TABLE {} (\n    {}\n);",
        ident(descriptor.table),
        lines.join(",\n    ")
    )
}

fn natural_key_index_sql(descriptor: &EntityDescriptor) -> Option<String> {
    let key = descriptor.natural_key?;
    let mut sql = format!(
        "CREATE UNIQUE INDEX {} ON {} ({}, {})",
        ident(&format!("{}_tenant_{}", descriptor.table, key.column)),
        ident(descriptor.table),
        ident("tenant_id"),
        ident(key.column)
    );
    if key.live_only {
        sql.push_str(&format!(
            " WHERE {} IS NULL AND {} IS NOT NULL",
            ident("deleted_at"),
            ident(key.column)
        ));
    }
    sql.push(';');
    Some(sql)
}

fn delta_index_sql(descriptor: &EntityDescriptor) -> String {
    if descriptor.tracks_timestamps {
        format!(
            "CREATE INDEX {} ON {} ({}, {});",
            ident(&format!("{}_tenant_updated", descriptor.table)),
            ident(descriptor.table),
            ident("tenant_id"),
            ident("updated_at")
        )
    } else {
        format!(
            "CREATE INDEX {} ON {} ({});",
            ident(&format!("{}_tenant", descriptor.table)),
            ident(descriptor.table),
            ident("tenant_id")
        )
    }
}
