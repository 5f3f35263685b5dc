//! Delta extraction.
//!
//! For each kind, returns the tenant's rows changed strictly after a
//! watermark, tombstones included. Kinds without change timestamps (the
//! role/permission pivot) are always returned in full.

use crate::error::CoreResult;
use crate::registry::{ColumnType, EntityDescriptor, EntityKind, Registry};
use crate::store::ident;
use crate::types::TenantId;
use crate::value::to_json;
use farmsync_protocol::{Row, Watermark};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use tracing::debug;

/// Changed rows per kind.
pub type Deltas = BTreeMap<EntityKind, Vec<Row>>;

/// Returns every kind's rows changed after `since` (`None` = everything).
///
/// Every registered kind is present in the result, possibly empty. Run this
/// inside a single read transaction so all kinds come from one snapshot.
pub fn extract_deltas(
    conn: &Connection,
    registry: &Registry,
    tenant: TenantId,
    since: Option<Watermark>,
) -> CoreResult<Deltas> {
    let mut deltas = Deltas::new();
    for descriptor in registry.descriptors() {
        let rows = extract_kind(conn, descriptor, tenant, since)?;
        debug!(kind = descriptor.wire_name, rows = rows.len(), "kind extracted");
        deltas.insert(descriptor.kind, rows);
    }
    Ok(deltas)
}

/// Returns one kind's rows changed after `since`.
pub fn extract_kind(
    conn: &Connection,
    descriptor: &EntityDescriptor,
    tenant: TenantId,
    since: Option<Watermark>,
) -> CoreResult<Vec<Row>> {
    let columns = output_columns(descriptor);
    let select: Vec<String> = columns.iter().map(|(name, _)| ident(name)).collect();
    let cutoff = since.map_or(i64::MIN, |wm| wm.as_millis());

    let sql = if descriptor.tracks_timestamps {
        format!(
            "SELECT {cols} FROM {table} WHERE {tenant} = ?1 \
             AND (COALESCE({updated}, {created}) > ?2 OR {deleted} > ?2) \
             ORDER BY COALESCE({updated}, {created}), rowid",
            cols = select.join(", "),
            table = ident(descriptor.table),
            tenant = ident("tenant_id"),
            updated = ident("updated_at"),
            created = ident("created_at"),
            deleted = ident("deleted_at"),
        )
    } else {
        format!(
            "SELECT {cols} FROM {table} WHERE {tenant} = ?1 ORDER BY rowid",
            cols = select.join(", "),
            table = ident(descriptor.table),
            tenant = ident("tenant_id"),
        )
    };

    let render = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Row> {
        let mut out = Row::new();
        for (index, (name, ty)) in columns.iter().enumerate() {
            out.insert(name.to_string(), to_json(*ty, row.get_ref(index)?));
        }
        Ok(out)
    };

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = if descriptor.tracks_timestamps {
        stmt.query_map(params![tenant, cutoff], render)?
            .collect::<Result<Vec<_>, _>>()?
    } else {
        stmt.query_map(params![tenant], render)?
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok(rows)
}

/// Stored columns paired with the type used to render them.
fn output_columns(descriptor: &EntityDescriptor) -> Vec<(&'static str, ColumnType)> {
    descriptor
        .stored_columns()
        .into_iter()
        .map(|name| {
            let ty = match name {
                "created_at" | "updated_at" | "deleted_at" => ColumnType::Timestamp,
                _ => descriptor
                    .column(name)
                    .map_or(ColumnType::Text, |column| column.ty),
            };
            (name, ty)
        })
        .collect()
}

/// Live and tombstoned row counts of one kind for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindCounts {
    /// The kind counted.
    pub kind: EntityKind,
    /// Rows without `deleted_at`.
    pub live: u64,
    /// Rows with `deleted_at`.
    pub tombstoned: u64,
}

/// Counts every kind's rows for a tenant.
pub fn count_rows(
    conn: &Connection,
    registry: &Registry,
    tenant: TenantId,
) -> CoreResult<Vec<KindCounts>> {
    registry
        .descriptors()
        .map(|descriptor| {
            let sql = format!(
                "SELECT COALESCE(SUM({deleted} IS NULL), 0), COALESCE(SUM({deleted} IS NOT NULL), 0) \
                 FROM {table} WHERE {tenant} = ?1",
                deleted = ident("deleted_at"),
                table = ident(descriptor.table),
                tenant = ident("tenant_id"),
            );
            let (live, tombstoned): (i64, i64) = conn
                .prepare_cached(&sql)?
                .query_row([tenant], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(KindCounts {
                kind: descriptor.kind,
                live: u64::try_from(live).unwrap_or_default(),
                tombstoned: u64::try_from(tombstoned).unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::ingest::{ChangeBatch, ChangeIngestion, ChangeIntent};
    use crate::store::{clock, Store};
    use serde_json::json;

    fn push(store: &Store, tenant: TenantId, kind: EntityKind, row: serde_json::Value) -> Watermark {
        let registry = Registry::new().unwrap();
        let config = SyncConfig::default();
        let mut batch = ChangeBatch::new();
        batch.push(kind, ChangeIntent::Upsert, row);
        store
            .write(|tx| {
                let stamp = clock::tick(tx)?;
                ChangeIngestion::new(&registry, &config).apply_changes(tx, tenant, stamp, &batch)?;
                Ok(stamp)
            })
            .unwrap()
    }

    #[test]
    fn rows_after_watermark_only() {
        let store = Store::open_in_memory().unwrap();
        let registry = Registry::new().unwrap();
        let tenant = TenantId::random();

        let first = push(&store, tenant, EntityKind::Section, json!({"name": "Ceba"}));
        push(&store, tenant, EntityKind::Section, json!({"name": "Gestación"}));

        let all = store
            .read(|tx| extract_deltas(tx, &registry, tenant, None))
            .unwrap();
        assert_eq!(all.len(), EntityKind::ALL.len());
        assert_eq!(all[&EntityKind::Section].len(), 2);

        let later = store
            .read(|tx| extract_kind(tx, EntityKind::Section.descriptor(), tenant, Some(first)))
            .unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0]["name"], json!("Gestación"));
    }

    #[test]
    fn rows_render_typed_values() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::random();
        let id = uuid::Uuid::new_v4().to_string();

        push(
            &store,
            tenant,
            EntityKind::AccessLogEntry,
            json!({"id": id, "visitor_name": "Inspector", "is_safe_origin": 1, "entry_time": "2024-05-01T12:00:00Z"}),
        );

        let rows = store
            .read(|tx| extract_kind(tx, EntityKind::AccessLogEntry.descriptor(), tenant, None))
            .unwrap();
        let row = &rows[0];
        assert_eq!(row["id"], json!(id));
        assert_eq!(row["tenant_id"], json!(tenant.to_string()));
        assert_eq!(row["is_safe_origin"], json!(true));
        assert_eq!(row["entry_time"], json!("2024-05-01T12:00:00.000Z"));
        assert_eq!(row["deleted_at"], serde_json::Value::Null);
        assert!(row["updated_at"].is_string());
    }

    #[test]
    fn pivot_rows_are_always_returned() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::random();
        let role = uuid::Uuid::new_v4().to_string();

        push(&store, tenant, EntityKind::Role, json!({"id": role, "name": "Operario"}));
        let after = push(
            &store,
            tenant,
            EntityKind::RolePermissionLink,
            json!({"role_id": role, "permission_id": 1}),
        );

        let rows = store
            .read(|tx| {
                extract_kind(
                    tx,
                    EntityKind::RolePermissionLink.descriptor(),
                    tenant,
                    Some(after.next()),
                )
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["permission_id"], json!(1));
        assert!(rows[0].get("id").is_none());
    }

    #[test]
    fn other_tenants_are_invisible() {
        let store = Store::open_in_memory().unwrap();
        let registry = Registry::new().unwrap();
        let mine = TenantId::random();
        let theirs = TenantId::random();

        push(&store, theirs, EntityKind::Section, json!({"name": "Ajena"}));

        let deltas = store
            .read(|tx| extract_deltas(tx, &registry, mine, None))
            .unwrap();
        assert!(deltas.values().all(Vec::is_empty));

        let counts = store.read(|tx| count_rows(tx, &registry, theirs)).unwrap();
        let sections = counts
            .iter()
            .find(|c| c.kind == EntityKind::Section)
            .unwrap();
        assert_eq!((sections.live, sections.tombstoned), (1, 0));
    }
}
