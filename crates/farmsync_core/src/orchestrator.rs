//! Sync orchestration.
//!
//! Every call runs in two steps. Pushed changes are applied in one write
//! transaction, stamped with a fresh clock tick. That transaction commits
//! or rolls back as a whole. Then a read transaction takes the clock's
//! current value and the deltas together, so the returned watermark covers
//! exactly the rows returned. A client's own changes are always part of
//! the deltas of the call that pushed them.

use crate::config::SyncConfig;
use crate::error::CoreResult;
use crate::extract::{count_rows, extract_deltas, Deltas, KindCounts};
use crate::ingest::{ChangeBatch, ChangeIngestion, IngestReport};
use crate::reconcile::IdMap;
use crate::stats::SyncStats;
use crate::store::{clock, Store};
use crate::types::TenantId;
use farmsync_protocol::{
    KindDelta, PullRequest, PushRequest, PushResponse, SyncRequest, SyncResponse, Watermark,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Deltas read from one snapshot, with the watermark that snapshot covers.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Latest committed write stamp visible in the snapshot.
    pub watermark: Watermark,
    /// Changed rows per kind; every kind is present.
    pub deltas: Deltas,
}

impl Extraction {
    /// Total rows across all kinds.
    pub fn row_count(&self) -> usize {
        self.deltas.values().map(Vec::len).sum()
    }
}

/// Entry point for sync, push and pull calls.
///
/// Cheap to share between threads; calls for different tenants (or the
/// same tenant) may run concurrently and are isolated by the store's
/// transactions.
#[derive(Debug)]
pub struct SyncOrchestrator {
    store: Arc<Store>,
    config: SyncConfig,
    stats: SyncStats,
}

impl SyncOrchestrator {
    /// Creates an orchestrator over an opened store.
    pub fn new(store: Arc<Store>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            stats: SyncStats::new(),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Returns the sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns call statistics.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Applies a request's changes, then returns every kind's deltas.
    ///
    /// On error nothing from the request is stored.
    pub fn sync(&self, tenant: TenantId, request: &SyncRequest) -> CoreResult<SyncResponse> {
        self.stats.record_call();

        for kind in &request.malformed_kinds {
            warn!(%tenant, kind = kind.as_str(), "ignoring changes that are not a list");
        }
        let report = match &request.changes {
            Some(changes) => {
                let batch = ChangeBatch::from_change_set(changes);
                self.ingest(tenant, &batch)?
            }
            None => None,
        };

        let extraction = self.extract_deltas(tenant, request.since_watermark)?;
        info!(
            %tenant,
            applied = report.as_ref().map_or(0, IngestReport::total_applied),
            skipped = report.as_ref().map_or(0, IngestReport::total_skipped),
            pulled = extraction.row_count(),
            watermark = extraction.watermark.as_millis(),
            "sync completed"
        );
        Ok(self.respond(extraction, report.as_ref().map(|r| &r.id_map)))
    }

    /// Applies a legacy flat change list without returning deltas.
    pub fn push(&self, tenant: TenantId, request: &PushRequest) -> CoreResult<PushResponse> {
        self.stats.record_call();

        let batch = ChangeBatch::from_legacy(&request.changes);
        let ignored = request.changes.len() - batch.len();
        let response = match self.ingest(tenant, &batch)? {
            Some(report) => {
                let response = PushResponse::new(
                    report.stamp,
                    report.total_applied(),
                    report.total_skipped() + ignored as u64,
                );
                if self.config.echo_id_mappings && !report.id_map.is_empty() {
                    response.with_id_mappings(report.id_map.to_wire())
                } else {
                    response
                }
            }
            None => {
                let watermark = self.store.read(|tx| clock::current(tx))?;
                PushResponse::new(watermark, 0, ignored as u64)
            }
        };

        info!(
            %tenant,
            applied = response.applied,
            skipped = response.skipped,
            watermark = response.new_watermark.as_millis(),
            "push completed"
        );
        Ok(response)
    }

    /// Returns every kind's rows changed after the request's watermark.
    pub fn pull(&self, tenant: TenantId, request: &PullRequest) -> CoreResult<SyncResponse> {
        self.stats.record_call();

        let extraction = self.extract_deltas(tenant, request.since_watermark)?;
        info!(
            %tenant,
            pulled = extraction.row_count(),
            watermark = extraction.watermark.as_millis(),
            "pull completed"
        );
        Ok(self.respond(extraction, None))
    }

    /// Applies a batch in its own write transaction.
    ///
    /// The transaction commits only if every row was applied or skipped;
    /// an integrity violation rolls everything back and is returned.
    pub fn apply_changes(&self, tenant: TenantId, batch: &ChangeBatch) -> CoreResult<IngestReport> {
        let ingestion = ChangeIngestion::new(self.store.registry(), &self.config);
        let result = self.store.write(|tx| {
            let stamp = clock::tick(tx)?;
            ingestion.apply_changes(tx, tenant, stamp, batch)
        });

        match result {
            Ok(report) => {
                self.stats.record_commit(
                    report.total_applied(),
                    report.total_skipped(),
                    report.synthesized.values().sum(),
                );
                Ok(report)
            }
            Err(err) => {
                self.stats.record_rollback();
                error!(%tenant, rows = batch.len(), error = %err, "change batch rolled back");
                Err(err)
            }
        }
    }

    /// Reads the tenant's deltas after `since` from one snapshot.
    pub fn extract_deltas(
        &self,
        tenant: TenantId,
        since: Option<Watermark>,
    ) -> CoreResult<Extraction> {
        let registry = self.store.registry();
        let extraction = self.store.read(|tx| {
            let watermark = clock::current(tx)?;
            let deltas = extract_deltas(tx, registry, tenant, since)?;
            Ok(Extraction { watermark, deltas })
        })?;
        self.stats.record_pulled(extraction.row_count() as u64);
        Ok(extraction)
    }

    /// Counts the tenant's live and tombstoned rows per kind.
    pub fn inspect(&self, tenant: TenantId) -> CoreResult<Vec<KindCounts>> {
        let registry = self.store.registry();
        self.store.read(|tx| count_rows(tx, registry, tenant))
    }

    fn ingest(&self, tenant: TenantId, batch: &ChangeBatch) -> CoreResult<Option<IngestReport>> {
        if batch.is_empty() {
            return Ok(None);
        }
        self.apply_changes(tenant, batch).map(Some)
    }

    fn respond(&self, extraction: Extraction, id_map: Option<&IdMap>) -> SyncResponse {
        let changes: BTreeMap<String, KindDelta> = extraction
            .deltas
            .into_iter()
            .map(|(kind, rows)| (kind.wire_name().to_string(), KindDelta::new(rows)))
            .collect();
        let response = SyncResponse::new(extraction.watermark, changes);
        match id_map {
            Some(map) if self.config.echo_id_mappings && !map.is_empty() => {
                response.with_id_mappings(map.to_wire())
            }
            _ => response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::registry::EntityKind;
    use farmsync_protocol::{LegacyChange, LegacyOperation};
    use serde_json::{json, Map, Value};

    fn orchestrator() -> SyncOrchestrator {
        SyncOrchestrator::new(
            Arc::new(Store::open_in_memory().unwrap()),
            SyncConfig::default(),
        )
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn sync_returns_every_kind() {
        let sync = orchestrator();
        let response = sync.sync(TenantId::random(), &SyncRequest::new()).unwrap();

        assert_eq!(response.changes.len(), EntityKind::ALL.len());
        assert!(response.is_empty());
        assert_eq!(response.new_watermark, Watermark::ORIGIN);
        assert_eq!(sync.stats().calls(), 1);
        assert_eq!(sync.stats().commits(), 0);
    }

    #[test]
    fn provisional_ids_are_echoed() {
        let sync = orchestrator();
        let request = SyncRequest::new()
            .with_rows("sections", vec![json!({"id": "tmp-1", "name": "Gestación"})]);

        let response = sync.sync(TenantId::random(), &request).unwrap();
        let section = &response.rows("sections")[0];
        assert_eq!(response.id_mappings["sections"]["tmp-1"], section["id"]);
    }

    #[test]
    fn echo_can_be_disabled() {
        let sync = SyncOrchestrator::new(
            Arc::new(Store::open_in_memory().unwrap()),
            SyncConfig::new().echo_id_mappings(false),
        );
        let request = SyncRequest::new()
            .with_rows("sections", vec![json!({"id": "tmp-1", "name": "Gestación"})]);

        let response = sync.sync(TenantId::random(), &request).unwrap();
        assert!(response.id_mappings.is_empty());
        assert_eq!(response.rows("sections").len(), 1);
    }

    #[test]
    fn push_counts_unknown_tables_as_skipped() {
        let sync = orchestrator();
        let request = PushRequest::new(vec![
            LegacyChange::new(
                "sections",
                LegacyOperation::Create,
                object(json!({"name": "Ceba"})),
            ),
            LegacyChange::new("tractors", LegacyOperation::Create, object(json!({"id": 1}))),
        ]);

        let response = sync.push(TenantId::random(), &request).unwrap();
        assert_eq!(response.applied, 1);
        assert_eq!(response.skipped, 1);
        assert!(response.new_watermark > Watermark::ORIGIN);
    }

    #[test]
    fn rollback_is_counted() {
        let sync = orchestrator();
        let request = SyncRequest::new().with_rows(
            "pens",
            vec![json!({"name": "Negativo", "capacity": -1})],
        );

        let err = sync.sync(TenantId::random(), &request).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(sync.stats().rollbacks(), 1);
    }

    #[test]
    fn inspect_counts_tombstones() {
        let sync = orchestrator();
        let tenant = TenantId::random();
        let id = uuid::Uuid::new_v4().to_string();
        let request = SyncRequest::new().with_rows(
            "medications",
            vec![json!({"id": id, "name": "Ivermectina", "deleted_at": "2024-01-01T00:00:00Z"})],
        );
        sync.sync(tenant, &request).unwrap();

        let counts = sync.inspect(tenant).unwrap();
        let medications = counts
            .iter()
            .find(|c| c.kind == EntityKind::Medication)
            .unwrap();
        assert_eq!(medications.live, 0);
        assert_eq!(medications.tombstoned, 1);
    }
}
