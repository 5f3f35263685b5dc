//! Change ingestion.
//!
//! A [`ChangeBatch`] is applied kind by kind in registry ingestion order, so
//! parents are always written before the rows that reference them. Within a
//! kind, client order is kept, except that rows whose self reference points
//! at a row later in the same batch wait until that row has been written.
//!
//! Per-row problems (no usable id, unresolved required reference, foreign
//! tenant) skip the row with a warning. Integrity violations (immutable
//! field, check constraint, uniqueness) fail the whole batch; the caller's
//! transaction then rolls back.

use crate::config::SyncConfig;
use crate::error::{CoreError, CoreResult};
use crate::reconcile::{parse_row_id, token_text, IdMap, Ownership, Reconciler, Reference};
use crate::registry::{EntityDescriptor, EntityKind, IdPolicy, Registry};
use crate::statement::RowWrite;
use crate::store::ident;
use crate::types::{RowId, TenantId};
use crate::value::{column_to_sql, lookup, parse_timestamp};
use farmsync_protocol::{ChangeSet, LegacyChange, Row, Watermark};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Transaction};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// What a pushed row asks the store to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeIntent {
    /// Insert or overwrite the full row (a `deleted_at` makes it a tombstone).
    Upsert,
    /// Mark an existing row deleted without touching its other columns.
    Tombstone,
}

/// Pushed changes grouped by kind.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    rows: BTreeMap<EntityKind, Vec<(ChangeIntent, Value)>>,
    unknown_kinds: Vec<String>,
}

impl ChangeBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one row for `kind`.
    pub fn push(&mut self, kind: EntityKind, intent: ChangeIntent, row: Value) {
        self.rows.entry(kind).or_default().push((intent, row));
    }

    /// Builds a batch from the combined sync request shape.
    ///
    /// Kinds the registry does not know are ignored with a warning.
    pub fn from_change_set(changes: &ChangeSet) -> Self {
        let mut batch = Self::new();
        for (name, rows) in changes {
            match EntityKind::from_wire_name(name) {
                Some(kind) => {
                    for row in rows {
                        batch.push(kind, ChangeIntent::Upsert, row.clone());
                    }
                }
                None => batch.ignore_kind(name),
            }
        }
        batch
    }

    /// Builds a batch from the legacy flat change list.
    pub fn from_legacy(changes: &[LegacyChange]) -> Self {
        let mut batch = Self::new();
        for change in changes {
            match EntityKind::from_wire_name(&change.table) {
                Some(kind) => {
                    let intent = if change.operation.is_upsert() {
                        ChangeIntent::Upsert
                    } else {
                        ChangeIntent::Tombstone
                    };
                    batch.push(kind, intent, Value::Object(change.data.clone()));
                }
                None => batch.ignore_kind(&change.table),
            }
        }
        batch
    }

    fn ignore_kind(&mut self, name: &str) {
        if !self.unknown_kinds.iter().any(|known| known == name) {
            warn!(kind = name, "ignoring changes for unknown kind");
            self.unknown_kinds.push(name.to_string());
        }
    }

    /// Rows for one kind, in client order.
    pub fn rows(&self, kind: EntityKind) -> &[(ChangeIntent, Value)] {
        self.rows.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Wire names that were not recognized.
    pub fn unknown_kinds(&self) -> &[String] {
        &self.unknown_kinds
    }

    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    /// Returns true if the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a row was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The entry is not a JSON object.
    NotAnObject,
    /// Neither a usable id nor a natural key to recover one.
    MissingIdentifier,
    /// The id belongs to another tenant.
    TenantMismatch,
    /// A required reference could not be resolved.
    UnresolvedReference(&'static str),
    /// A tombstone named a row that does not exist.
    NotFound,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotAnObject => write!(f, "entry is not an object"),
            SkipReason::MissingIdentifier => write!(f, "no usable identifier"),
            SkipReason::TenantMismatch => write!(f, "id belongs to another tenant"),
            SkipReason::UnresolvedReference(column) => {
                write!(f, "required reference {column} could not be resolved")
            }
            SkipReason::NotFound => write!(f, "row not found"),
        }
    }
}

/// Result of applying one batch.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Write stamp of the batch.
    pub stamp: Watermark,
    /// Rows written, per kind.
    pub applied: BTreeMap<EntityKind, u64>,
    /// Rows skipped, per kind.
    pub skipped: BTreeMap<EntityKind, u64>,
    /// Placeholder parents created, per kind.
    pub synthesized: BTreeMap<EntityKind, u64>,
    /// Provisional tokens resolved to durable ids.
    pub id_map: IdMap,
}

impl IngestReport {
    /// Creates an empty report for a batch stamped `stamp`.
    pub fn new(stamp: Watermark) -> Self {
        Self {
            stamp,
            ..Self::default()
        }
    }

    /// Total rows written.
    pub fn total_applied(&self) -> u64 {
        self.applied.values().sum()
    }

    /// Total rows skipped.
    pub fn total_skipped(&self) -> u64 {
        self.skipped.values().sum()
    }

    fn record_applied(&mut self, kind: EntityKind) {
        *self.applied.entry(kind).or_default() += 1;
    }

    fn record_skipped(&mut self, kind: EntityKind) {
        *self.skipped.entry(kind).or_default() += 1;
    }
}

enum RowOutcome {
    Applied(Option<RowId>),
    Skipped(SkipReason),
    Deferred,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Existing(RowId),
    New(Option<RowId>),
    Composite,
}

struct Identity {
    target: Target,
    token: Option<String>,
}

/// Applies change batches for one tenant inside a caller-owned transaction.
#[derive(Debug)]
pub struct ChangeIngestion<'a> {
    registry: &'a Registry,
    config: &'a SyncConfig,
}

impl<'a> ChangeIngestion<'a> {
    /// Creates an ingestion pass.
    pub fn new(registry: &'a Registry, config: &'a SyncConfig) -> Self {
        Self { registry, config }
    }

    /// Applies `batch` for `tenant`, stamping every written row with `stamp`.
    ///
    /// On `Err` the transaction must be rolled back.
    pub fn apply_changes(
        &self,
        tx: &Transaction<'_>,
        tenant: TenantId,
        stamp: Watermark,
        batch: &ChangeBatch,
    ) -> CoreResult<IngestReport> {
        let mut reconciler = Reconciler::new(tenant, stamp, self.config.synthesize_missing_parents);
        let mut report = IngestReport::new(stamp);

        for &kind in self.registry.ingestion_order() {
            let rows = batch.rows(kind);
            if rows.is_empty() {
                continue;
            }
            self.apply_kind(tx, &mut reconciler, &mut report, kind.descriptor(), rows)?;
            debug!(
                kind = kind.wire_name(),
                applied = report.applied.get(&kind).copied().unwrap_or(0),
                skipped = report.skipped.get(&kind).copied().unwrap_or(0),
                "kind ingested"
            );
        }

        let (id_map, synthesized) = reconciler.finish();
        report.id_map = id_map;
        report.synthesized = synthesized;
        Ok(report)
    }

    fn apply_kind(
        &self,
        tx: &Transaction<'_>,
        reconciler: &mut Reconciler,
        report: &mut IngestReport,
        descriptor: &'static EntityDescriptor,
        rows: &[(ChangeIntent, Value)],
    ) -> CoreResult<()> {
        let kind = descriptor.kind;
        let mut queue: Vec<(ChangeIntent, &Row)> = Vec::with_capacity(rows.len());
        for (intent, value) in rows {
            match value.as_object() {
                Some(row) => queue.push((*intent, row)),
                None => {
                    warn!(kind = descriptor.wire_name, reason = %SkipReason::NotAnObject, "skipping row");
                    report.record_skipped(kind);
                }
            }
        }

        // Ids of rows not yet written; only tracked when a row may point at
        // another row of its own kind.
        let mut pending: HashSet<String> = if descriptor.is_self_referencing() {
            queue
                .iter()
                .filter_map(|(_, row)| row_token(descriptor, row))
                .collect()
        } else {
            HashSet::new()
        };
        let mut allow_defer = descriptor.is_self_referencing();

        while !queue.is_empty() {
            let mut deferred = Vec::new();
            let mut progressed = false;

            for (intent, row) in queue {
                let outcome = self.apply_row(
                    tx,
                    reconciler,
                    descriptor,
                    intent,
                    row,
                    allow_defer.then_some(&pending),
                )?;
                match outcome {
                    RowOutcome::Deferred => {
                        deferred.push((intent, row));
                        continue;
                    }
                    RowOutcome::Applied(id) => {
                        report.record_applied(kind);
                        if let Some(id) = id {
                            debug!(kind = descriptor.wire_name, %id, "row applied");
                        }
                    }
                    RowOutcome::Skipped(reason) => {
                        warn!(
                            kind = descriptor.wire_name,
                            id = ?row.get("id"),
                            %reason,
                            "skipping row"
                        );
                        report.record_skipped(kind);
                    }
                }
                progressed = true;
                if let Some(token) = row_token(descriptor, row) {
                    pending.remove(&token);
                }
            }

            if !progressed {
                // Remaining rows wait on each other or on rows that never
                // arrive; write them with the dangling references dropped.
                allow_defer = false;
            }
            queue = deferred;
        }
        Ok(())
    }

    fn apply_row(
        &self,
        tx: &Transaction<'_>,
        reconciler: &mut Reconciler,
        descriptor: &'static EntityDescriptor,
        intent: ChangeIntent,
        row: &Row,
        pending: Option<&HashSet<String>>,
    ) -> CoreResult<RowOutcome> {
        let identity = match identify(tx, reconciler, descriptor, row)? {
            Ok(identity) => identity,
            Err(reason) => return Ok(RowOutcome::Skipped(reason)),
        };

        let mut write = RowWrite::new(descriptor.table);
        match identity.target {
            Target::Existing(id) | Target::New(Some(id)) => write.set("id", id),
            Target::New(None) | Target::Composite => {}
        }
        write.set("tenant_id", reconciler.tenant().to_string());

        // Pivot rows are identified by their references, so even a tombstone
        // needs them resolved.
        if intent == ChangeIntent::Upsert || matches!(identity.target, Target::Composite) {
            for fk in descriptor.references {
                let raw = lookup(row, fk.column, fk.aliases);
                let hint = fk
                    .hints
                    .iter()
                    .find_map(|field| row.get(*field).and_then(Value::as_str));
                let reference = Reference::parse(fk.target, raw, hint);

                let resolved = match &reference {
                    Some(reference) => reconciler.resolve(tx, fk.target, reference)?,
                    None => None,
                };
                match resolved {
                    Some(id) => write.set(fk.column, id),
                    None => {
                        let waiting = fk.target == descriptor.kind
                            && reference
                                .as_ref()
                                .and_then(Reference::token)
                                .is_some_and(|token| pending.is_some_and(|p| p.contains(&token)));
                        if waiting {
                            return Ok(RowOutcome::Deferred);
                        }
                        if fk.required {
                            return Ok(RowOutcome::Skipped(SkipReason::UnresolvedReference(
                                fk.column,
                            )));
                        }
                        if reference.is_some() {
                            warn!(
                                kind = descriptor.wire_name,
                                column = fk.column,
                                "optional reference unresolved, storing null"
                            );
                        }
                        write.set(fk.column, SqlValue::Null);
                    }
                }
            }
        }

        let stamp = reconciler.stamp();
        for column in descriptor.columns {
            let value = column_to_sql(column, lookup(row, column.name, column.aliases), stamp)?;
            write.set(column.name, value);
        }

        if intent == ChangeIntent::Tombstone {
            return tombstone(tx, stamp, descriptor, &identity, &write, row);
        }

        if descriptor.tracks_timestamps {
            let created_at = parse_timestamp("created_at", row.get("created_at"))?
                .unwrap_or(stamp.as_millis());
            write.set("created_at", created_at);
            write.set("updated_at", stamp.as_millis());
        }
        write.set("deleted_at", tombstone_stamp(row, stamp)?);

        let applied = match identity.target {
            Target::New(None) => {
                let id = RowId::Serial(write.insert(tx)?);
                Some(id)
            }
            Target::Existing(id) | Target::New(Some(id)) => {
                if let Target::Existing(id) = identity.target {
                    check_immutable(tx, descriptor, id, &write)?;
                }
                let keep: Vec<&str> = descriptor.immutable_columns().map(|c| c.name).collect();
                write.upsert(tx, &["id"], &keep)?;
                Some(id)
            }
            Target::Composite => {
                let key = descriptor.composite_key();
                if key
                    .iter()
                    .any(|column| matches!(write.get(column), None | Some(SqlValue::Null)))
                {
                    return Ok(RowOutcome::Skipped(SkipReason::MissingIdentifier));
                }
                write.upsert(tx, &key, &[])?;
                None
            }
        };

        if let (Some(token), Some(id)) = (identity.token, applied) {
            reconciler.record(descriptor.kind, token, id);
        }
        Ok(RowOutcome::Applied(applied))
    }
}

/// The row's own id as a comparable token; UUIDs are normalized.
fn row_token(descriptor: &EntityDescriptor, row: &Row) -> Option<String> {
    let raw = row.get("id")?;
    parse_row_id(descriptor.id_policy, raw)
        .map(|id| id.to_string())
        .or_else(|| token_text(raw))
}

/// Works out which stored row an incoming row addresses.
fn identify(
    tx: &Transaction<'_>,
    reconciler: &Reconciler,
    descriptor: &EntityDescriptor,
    row: &Row,
) -> CoreResult<Result<Identity, SkipReason>> {
    let raw_id = row.get("id").filter(|value| !value.is_null());
    let natural_key = descriptor.natural_key.and_then(|key| {
        let column = descriptor.column(key.column)?;
        lookup(row, column.name, column.aliases).and_then(token_text)
    });

    match descriptor.id_policy {
        IdPolicy::Composite => Ok(Ok(Identity {
            target: Target::Composite,
            token: None,
        })),
        IdPolicy::ServerAssigned => {
            let token = raw_id.and_then(token_text);
            if let Some(id) = raw_id.and_then(|value| parse_row_id(descriptor.id_policy, value)) {
                match reconciler.ownership(tx, descriptor, &id)? {
                    Ownership::Own => {
                        return Ok(Ok(Identity {
                            target: Target::Existing(id),
                            token: None,
                        }))
                    }
                    Ownership::Foreign => {
                        debug!(kind = descriptor.wire_name, %id, "id owned by another tenant, matching by natural key");
                    }
                    Ownership::Missing => {}
                }
            }
            let Some(key) = natural_key else {
                return Ok(Err(SkipReason::MissingIdentifier));
            };
            let target = match reconciler.find_by_natural_key(tx, descriptor.kind, &key)? {
                Some(id) => Target::Existing(id),
                None => Target::New(None),
            };
            Ok(Ok(Identity { target, token }))
        }
        IdPolicy::ClientAssigned => {
            if let Some(id) = raw_id.and_then(|value| parse_row_id(descriptor.id_policy, value)) {
                let target = match reconciler.ownership(tx, descriptor, &id)? {
                    Ownership::Own => Target::Existing(id),
                    Ownership::Missing => Target::New(Some(id)),
                    Ownership::Foreign => return Ok(Err(SkipReason::TenantMismatch)),
                };
                return Ok(Ok(Identity {
                    target,
                    token: None,
                }));
            }

            // Not a UUID: recover an existing row through its natural key.
            let recovered = match natural_key {
                Some(key) => reconciler.find_by_natural_key(tx, descriptor.kind, &key)?,
                None => None,
            };
            match recovered {
                Some(id) => Ok(Ok(Identity {
                    target: Target::Existing(id),
                    token: raw_id.and_then(token_text),
                })),
                None => Ok(Err(SkipReason::MissingIdentifier)),
            }
        }
    }
}

/// The row's `deleted_at`, never later than the batch stamp.
///
/// A client clock running ahead would otherwise keep the tombstone inside
/// every later delta window.
fn tombstone_stamp(row: &Row, stamp: Watermark) -> CoreResult<Option<i64>> {
    Ok(parse_timestamp("deleted_at", row.get("deleted_at"))?
        .map(|deleted_at| deleted_at.min(stamp.as_millis())))
}

/// Fails if the row would change a stored immutable value.
///
/// A stored null counts as a value: once written, the field stays unset.
fn check_immutable(
    tx: &Transaction<'_>,
    descriptor: &EntityDescriptor,
    id: RowId,
    write: &RowWrite,
) -> CoreResult<()> {
    for column in descriptor.immutable_columns() {
        let incoming = match write.get(column.name) {
            None | Some(SqlValue::Null) => continue,
            Some(value) => value,
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            ident(column.name),
            ident(descriptor.table),
            ident("id")
        );
        let stored: SqlValue = tx.prepare_cached(&sql)?.query_row([id], |row| row.get(0))?;
        if &stored != incoming {
            return Err(CoreError::ImmutableField {
                kind: descriptor.wire_name,
                field: column.name,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

/// Marks an existing row deleted, leaving its other columns alone.
fn tombstone(
    tx: &Transaction<'_>,
    stamp: Watermark,
    descriptor: &EntityDescriptor,
    identity: &Identity,
    write: &RowWrite,
    row: &Row,
) -> CoreResult<RowOutcome> {
    let deleted_at = tombstone_stamp(row, stamp)?.unwrap_or(stamp.as_millis());

    let key_columns: Vec<&str> = match identity.target {
        Target::Existing(_) => vec!["id"],
        Target::Composite => descriptor.composite_key(),
        Target::New(_) => return Ok(RowOutcome::Skipped(SkipReason::NotFound)),
    };

    let mut params: Vec<SqlValue> = vec![SqlValue::Integer(deleted_at)];
    let mut assignments = vec![format!("{} = ?1", ident("deleted_at"))];
    if descriptor.tracks_timestamps {
        params.push(SqlValue::Integer(stamp.as_millis()));
        assignments.push(format!("{} = ?{}", ident("updated_at"), params.len()));
    }

    let mut conditions = Vec::new();
    for column in key_columns.iter().copied().chain(std::iter::once("tenant_id")) {
        let value = match write.get(column) {
            Some(SqlValue::Null) | None => {
                return Ok(RowOutcome::Skipped(SkipReason::MissingIdentifier))
            }
            Some(value) => value.clone(),
        };
        params.push(value);
        conditions.push(format!("{} = ?{}", ident(column), params.len()));
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        ident(descriptor.table),
        assignments.join(", "),
        conditions.join(" AND ")
    );
    let changed = tx.prepare_cached(&sql)?.execute(params_from_iter(params.iter()))?;
    if changed == 0 {
        return Ok(RowOutcome::Skipped(SkipReason::NotFound));
    }

    let id = match identity.target {
        Target::Existing(id) => Some(id),
        _ => None,
    };
    Ok(RowOutcome::Applied(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use farmsync_protocol::LegacyOperation;
    use serde_json::json;

    fn apply(store: &Store, tenant: TenantId, batch: &ChangeBatch) -> CoreResult<IngestReport> {
        let registry = Registry::new().unwrap();
        let config = SyncConfig::default();
        store.write(|tx| {
            let stamp = crate::store::clock::tick(tx)?;
            ChangeIngestion::new(&registry, &config).apply_changes(tx, tenant, stamp, batch)
        })
    }

    fn count(store: &Store, sql: &str) -> i64 {
        store
            .read(|tx| Ok(tx.query_row(sql, [], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn batch_from_change_set_ignores_unknown_kinds() {
        let mut changes = ChangeSet::new();
        changes.insert("sections".into(), vec![json!({"name": "Ceba"})]);
        changes.insert("users".into(), vec![json!({"email": "x"})]);

        let batch = ChangeBatch::from_change_set(&changes);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.unknown_kinds(), ["users".to_string()]);
        assert_eq!(batch.rows(EntityKind::Section).len(), 1);
    }

    #[test]
    fn batch_from_legacy_maps_operations() {
        let changes = vec![
            LegacyChange::create("pigs", json!({"id": "a"}).as_object().cloned().unwrap()),
            LegacyChange::new(
                "pigs",
                LegacyOperation::Delete,
                json!({"id": "b"}).as_object().cloned().unwrap(),
            ),
        ];
        let batch = ChangeBatch::from_legacy(&changes);
        let rows = batch.rows(EntityKind::Animal);
        assert_eq!(rows[0].0, ChangeIntent::Upsert);
        assert_eq!(rows[1].0, ChangeIntent::Tombstone);
    }

    #[test]
    fn children_resolve_parents_from_same_batch() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::random();
        let pig = uuid::Uuid::new_v4().to_string();

        let mut batch = ChangeBatch::new();
        // Pushed child-first; ingestion order still writes parents first.
        batch.push(
            EntityKind::WeightLog,
            ChangeIntent::Upsert,
            json!({"id": uuid::Uuid::new_v4().to_string(), "pig_id": pig, "weight": 80.5}),
        );
        batch.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": pig, "tag_number": "A-1", "pen_id": "tmp-pen", "pen_name": "Corral 1"}),
        );
        batch.push(
            EntityKind::Pen,
            ChangeIntent::Upsert,
            json!({"id": "tmp-pen", "name": "Corral 1", "section_name": "Ceba"}),
        );

        let report = apply(&store, tenant, &batch).unwrap();
        assert_eq!(report.total_applied(), 3);
        assert_eq!(report.total_skipped(), 0);
        assert_eq!(report.synthesized[&EntityKind::Section], 1);
        assert!(report.id_map.get(EntityKind::Pen, "tmp-pen").is_some());

        assert_eq!(
            count(&store, "SELECT COUNT(*) FROM animals WHERE pen_id IS NOT NULL"),
            1
        );
    }

    #[test]
    fn unresolved_required_reference_skips_row() {
        let store = Store::open_in_memory().unwrap();
        let mut batch = ChangeBatch::new();
        batch.push(
            EntityKind::WeightLog,
            ChangeIntent::Upsert,
            json!({"id": uuid::Uuid::new_v4().to_string(), "pig_id": uuid::Uuid::new_v4().to_string(), "weight": 10}),
        );
        batch.push(EntityKind::Section, ChangeIntent::Upsert, json!("not a row"));

        let report = apply(&store, TenantId::random(), &batch).unwrap();
        assert_eq!(report.total_applied(), 0);
        assert_eq!(report.skipped[&EntityKind::WeightLog], 1);
        assert_eq!(report.skipped[&EntityKind::Section], 1);
    }

    #[test]
    fn self_references_wait_for_parent_rows() {
        let store = Store::open_in_memory().unwrap();
        let mother = uuid::Uuid::new_v4().to_string();
        let piglet = uuid::Uuid::new_v4().to_string();

        let mut batch = ChangeBatch::new();
        batch.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": piglet, "tag_number": "L-1", "mother_id": mother, "father_id": "boar-local"}),
        );
        batch.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": mother, "tag_number": "M-1", "sex": "Hembra"}),
        );

        let report = apply(&store, TenantId::random(), &batch).unwrap();
        assert_eq!(report.applied[&EntityKind::Animal], 2);

        let linked = count(
            &store,
            &format!("SELECT COUNT(*) FROM animals WHERE id = '{piglet}' AND mother_id = '{mother}' AND father_id IS NULL"),
        );
        assert_eq!(linked, 1);
    }

    #[test]
    fn immutable_field_change_fails_batch() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::random();
        let pig = uuid::Uuid::new_v4().to_string();

        let mut first = ChangeBatch::new();
        first.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": pig, "tag_number": "A-9", "sex": "Macho"}),
        );
        apply(&store, tenant, &first).unwrap();

        let mut second = ChangeBatch::new();
        second.push(
            EntityKind::Section,
            ChangeIntent::Upsert,
            json!({"name": "Nueva"}),
        );
        second.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": pig, "tag_number": "A-9", "sex": "Hembra"}),
        );
        let err = apply(&store, tenant, &second).unwrap_err();
        assert!(matches!(err, CoreError::ImmutableField { field: "sex", .. }));

        assert_eq!(count(&store, "SELECT COUNT(*) FROM sections"), 0);
        assert_eq!(
            count(&store, "SELECT COUNT(*) FROM animals WHERE sex = 'Macho'"),
            1
        );
    }

    #[test]
    fn unset_sex_cannot_be_filled_in_later() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::random();
        let pig = uuid::Uuid::new_v4().to_string();

        let mut first = ChangeBatch::new();
        first.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": pig, "tag_number": "N-1"}),
        );
        apply(&store, tenant, &first).unwrap();

        // Omitting the field keeps the stored null.
        let mut untouched = ChangeBatch::new();
        untouched.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": pig, "tag_number": "N-1", "weight": 12}),
        );
        apply(&store, tenant, &untouched).unwrap();

        let mut second = ChangeBatch::new();
        second.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": pig, "tag_number": "N-1", "sex": "M"}),
        );
        let err = apply(&store, tenant, &second).unwrap_err();
        assert!(matches!(err, CoreError::ImmutableField { field: "sex", .. }));
        assert_eq!(
            count(&store, "SELECT COUNT(*) FROM animals WHERE sex IS NULL"),
            1
        );
    }

    #[test]
    fn future_deleted_at_is_capped_at_stamp() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::random();
        let med = uuid::Uuid::new_v4().to_string();
        let later = chrono::Utc::now().timestamp_millis() + 3_600_000;

        let mut batch = ChangeBatch::new();
        batch.push(
            EntityKind::Medication,
            ChangeIntent::Upsert,
            json!({"id": med, "name": "Penicilina", "deleted_at": later}),
        );
        batch.push(
            EntityKind::Medication,
            ChangeIntent::Upsert,
            json!({"id": uuid::Uuid::new_v4().to_string(), "name": "Vieja", "deleted_at": 1_000}),
        );
        let report = apply(&store, tenant, &batch).unwrap();

        assert_eq!(
            count(
                &store,
                &format!(
                    "SELECT COUNT(*) FROM medications WHERE deleted_at = {}",
                    report.stamp.as_millis()
                )
            ),
            1
        );
        assert_eq!(
            count(&store, "SELECT COUNT(*) FROM medications WHERE deleted_at = 1000"),
            1
        );
    }

    #[test]
    fn foreign_uuid_is_skipped() {
        let store = Store::open_in_memory().unwrap();
        let pig = uuid::Uuid::new_v4().to_string();

        let mut batch = ChangeBatch::new();
        batch.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": pig, "tag_number": "A-1", "weight": 50}),
        );
        apply(&store, TenantId::random(), &batch).unwrap();

        let mut hijack = ChangeBatch::new();
        hijack.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": pig, "tag_number": "A-1", "weight": 999}),
        );
        let report = apply(&store, TenantId::random(), &hijack).unwrap();
        assert_eq!(report.skipped[&EntityKind::Animal], 1);
        assert_eq!(
            count(&store, "SELECT COUNT(*) FROM animals WHERE weight = 50"),
            1
        );
    }

    #[test]
    fn non_uuid_animal_is_recovered_by_tag() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::random();
        let pig = uuid::Uuid::new_v4().to_string();

        let mut batch = ChangeBatch::new();
        batch.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": pig, "tag_number": "T-5", "stage": "Lechón"}),
        );
        apply(&store, tenant, &batch).unwrap();

        let mut legacy = ChangeBatch::new();
        legacy.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": 42, "numero_arete": "T-5", "etapa": "Ceba"}),
        );
        legacy.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": 43, "numero_arete": "unknown"}),
        );
        let report = apply(&store, tenant, &legacy).unwrap();
        assert_eq!(report.applied[&EntityKind::Animal], 1);
        assert_eq!(report.skipped[&EntityKind::Animal], 1);
        assert_eq!(
            report.id_map.get(EntityKind::Animal, "42").map(|id| id.to_string()),
            Some(pig)
        );
        assert_eq!(
            count(&store, "SELECT COUNT(*) FROM animals WHERE stage = 'Ceba'"),
            1
        );
    }

    #[test]
    fn legacy_delete_only_sets_tombstone() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::random();
        let med = uuid::Uuid::new_v4().to_string();

        let mut batch = ChangeBatch::new();
        batch.push(
            EntityKind::Medication,
            ChangeIntent::Upsert,
            json!({"id": med, "name": "Oxitetraciclina", "withdrawal_days": 21}),
        );
        apply(&store, tenant, &batch).unwrap();

        let mut delete = ChangeBatch::new();
        delete.push(EntityKind::Medication, ChangeIntent::Tombstone, json!({"id": med}));
        delete.push(
            EntityKind::Medication,
            ChangeIntent::Tombstone,
            json!({"id": uuid::Uuid::new_v4().to_string()}),
        );
        let report = apply(&store, tenant, &delete).unwrap();
        assert_eq!(report.applied[&EntityKind::Medication], 1);
        assert_eq!(report.skipped[&EntityKind::Medication], 1);

        assert_eq!(
            count(
                &store,
                "SELECT COUNT(*) FROM medications WHERE deleted_at IS NOT NULL AND withdrawal_days = 21"
            ),
            1
        );
    }

    #[test]
    fn role_permission_links_upsert_by_pair() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::random();
        let role = uuid::Uuid::new_v4().to_string();

        let mut batch = ChangeBatch::new();
        batch.push(
            EntityKind::Role,
            ChangeIntent::Upsert,
            json!({"id": role, "name": "Veterinario"}),
        );
        batch.push(
            EntityKind::RolePermissionLink,
            ChangeIntent::Upsert,
            json!({"role_id": role, "permission_id": 3}),
        );
        batch.push(
            EntityKind::RolePermissionLink,
            ChangeIntent::Upsert,
            json!({"role_id": role, "permission_id": 3}),
        );
        batch.push(
            EntityKind::RolePermissionLink,
            ChangeIntent::Upsert,
            json!({"role_id": role}),
        );
        let report = apply(&store, tenant, &batch).unwrap();
        assert_eq!(report.applied[&EntityKind::RolePermissionLink], 2);
        assert_eq!(report.skipped[&EntityKind::RolePermissionLink], 1);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM role_permissions"), 1);

        let mut revoke = ChangeBatch::new();
        revoke.push(
            EntityKind::RolePermissionLink,
            ChangeIntent::Tombstone,
            json!({"role_id": role, "permission_id": 3}),
        );
        apply(&store, tenant, &revoke).unwrap();
        assert_eq!(
            count(
                &store,
                "SELECT COUNT(*) FROM role_permissions WHERE deleted_at IS NOT NULL"
            ),
            1
        );
    }

    #[test]
    fn duplicate_live_tag_is_a_conflict() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::random();

        let mut batch = ChangeBatch::new();
        for _ in 0..2 {
            batch.push(
                EntityKind::Animal,
                ChangeIntent::Upsert,
                json!({"id": uuid::Uuid::new_v4().to_string(), "tag_number": "DUP"}),
            );
        }
        let err = apply(&store, tenant, &batch).unwrap_err();
        assert!(matches!(err, CoreError::UniquenessConflict { .. }));
        assert_eq!(count(&store, "SELECT COUNT(*) FROM animals"), 0);
    }

    #[test]
    fn check_constraint_is_validation() {
        let store = Store::open_in_memory().unwrap();
        let mut batch = ChangeBatch::new();
        batch.push(
            EntityKind::Animal,
            ChangeIntent::Upsert,
            json!({"id": uuid::Uuid::new_v4().to_string(), "tag_number": "N-1", "weight": -3}),
        );
        let err = apply(&store, TenantId::random(), &batch).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }
}
