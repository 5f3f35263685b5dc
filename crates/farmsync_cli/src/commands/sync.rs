//! Sync, push and pull commands.
//!
//! Request bodies are read as JSON from a file or stdin; responses are
//! printed to stdout as pretty JSON so they can be piped.

use farmsync_core::TenantId;
use farmsync_protocol::{PullRequest, PushRequest, SyncRequest, Watermark, WireMessage};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::info;

type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Applies a sync request read from `file` as `tenant`.
pub fn run_sync(
    db_path: &Path,
    tenant: TenantId,
    file: &Path,
    since: Option<Watermark>,
) -> CmdResult {
    let mut request = SyncRequest::decode(&read_body(file)?)?;
    if since.is_some() {
        request.since_watermark = since;
    }
    info!("Syncing {} rows for tenant {}", request.row_count(), tenant);

    let orchestrator = super::open(db_path)?;
    let response = orchestrator.sync(tenant, &request)?;
    print_json(&response)
}

/// Applies a legacy push request read from `file` as `tenant`.
pub fn run_push(db_path: &Path, tenant: TenantId, file: &Path) -> CmdResult {
    let request = PushRequest::decode(&read_body(file)?)?;
    info!(
        "Pushing {} changes for tenant {}",
        request.changes.len(),
        tenant
    );

    let orchestrator = super::open(db_path)?;
    let response = orchestrator.push(tenant, &request)?;
    print_json(&response)
}

/// Prints every row of `tenant` changed after `since`.
pub fn run_pull(db_path: &Path, tenant: TenantId, since: Option<Watermark>) -> CmdResult {
    let orchestrator = super::open(db_path)?;
    let response = orchestrator.pull(tenant, &PullRequest::new(since))?;
    print_json(&response)
}

fn read_body(file: &Path) -> CmdResult<Vec<u8>> {
    if file == Path::new("-") {
        let mut body = Vec::new();
        std::io::stdin().read_to_end(&mut body)?;
        Ok(body)
    } else {
        Ok(std::fs::read(file)?)
    }
}

fn print_json<T: Serialize>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
