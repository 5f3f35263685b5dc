//! Inspect command implementation.

use farmsync_core::{KindCounts, TenantId};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Per-kind summary of one tenant's rows.
#[derive(Debug, Serialize)]
pub struct TenantReport {
    /// Tenant inspected.
    pub tenant: String,
    /// Schema version of the store.
    pub schema_version: u32,
    /// One entry per entity kind.
    pub kinds: Vec<KindReport>,
}

/// Row counts of one kind.
#[derive(Debug, Serialize)]
pub struct KindReport {
    /// Wire name of the kind.
    pub kind: &'static str,
    /// Rows not deleted.
    pub live: u64,
    /// Tombstoned rows.
    pub tombstoned: u64,
}

impl From<KindCounts> for KindReport {
    fn from(counts: KindCounts) -> Self {
        Self {
            kind: counts.kind.wire_name(),
            live: counts.live,
            tombstoned: counts.tombstoned,
        }
    }
}

/// Builds the report for `tenant`.
pub fn report(
    db_path: &Path,
    tenant: TenantId,
) -> Result<TenantReport, Box<dyn std::error::Error>> {
    let orchestrator = super::open(db_path)?;
    let kinds = orchestrator
        .inspect(tenant)?
        .into_iter()
        .map(KindReport::from)
        .collect();
    Ok(TenantReport {
        tenant: tenant.to_string(),
        schema_version: orchestrator.store().schema_version(),
        kinds,
    })
}

/// Prints the report in `format` (`text` or `json`).
pub fn run(
    db_path: &Path,
    tenant: TenantId,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Inspecting tenant {} in {:?}", tenant, db_path);

    let report = report(db_path, tenant)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "text" => print_text(&report),
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

fn print_text(report: &TenantReport) {
    println!("Tenant {}", report.tenant);
    println!("==================");
    println!("Schema version: {}", report.schema_version);
    println!();
    println!("{:<24} {:>8} {:>8}", "KIND", "LIVE", "DELETED");
    for kind in &report.kinds {
        println!("{:<24} {:>8} {:>8}", kind.kind, kind.live, kind.tombstoned);
    }
    let total: u64 = report.kinds.iter().map(|k| k.live).sum();
    println!();
    println!("Total live rows: {total}");
}
