//! Migration commands.

use farmsync_core::{known_migrations, Store, StoreConfig, LATEST_VERSION};
use std::path::Path;
use tracing::info;

/// Opens the store, applying pending migrations, and reports what ran.
pub fn run(db_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Migrating store at {:?}", db_path);

    let store = Store::open(StoreConfig::file(db_path))?;
    let run = store.migration();

    println!("Migration Status");
    println!("================");
    println!("  Initial version: {}", run.initial_version);
    println!("  Current version: {}", run.final_version);

    if run.applied.is_empty() {
        println!("  Up to date.");
    } else {
        println!("\nApplied Migrations:");
        for name in &run.applied {
            println!("  {name}");
        }
    }

    Ok(())
}

/// Lists the migrations this build knows.
pub fn list() {
    println!("Registered Migrations (latest v{LATEST_VERSION})");
    println!("====================");
    for (version, name) in known_migrations() {
        println!("  v{version}: {name}");
    }
}
