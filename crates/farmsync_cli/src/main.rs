//! farmsync CLI
//!
//! Command-line tools for farmsync stores.
//!
//! # Commands
//!
//! - `migrate` - Create or upgrade a store's schema
//! - `sync` - Apply a sync request as a tenant and print the response
//! - `push` - Apply a legacy push request
//! - `pull` - Print a tenant's changes since a watermark
//! - `inspect` - Show per-kind row counts for a tenant

mod commands;

use clap::{Parser, Subcommand};
use farmsync_core::TenantId;
use farmsync_protocol::Watermark;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// farmsync command-line store tools.
#[derive(Parser)]
#[command(name = "farmsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
    #[arg(global = true, short, long)]
    db: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store or bring its schema up to date
    Migrate {
        /// Only list known migrations
        #[arg(short, long)]
        list: bool,
    },

    /// Apply a sync request and print the response
    Sync {
        /// Tenant to act as
        #[arg(short, long)]
        tenant: TenantId,

        /// Request body file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        file: PathBuf,

        /// Override the request's watermark
        #[arg(short, long, value_parser = parse_watermark)]
        since: Option<Watermark>,
    },

    /// Apply a legacy push request
    Push {
        /// Tenant to act as
        #[arg(short, long)]
        tenant: TenantId,

        /// Request body file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        file: PathBuf,
    },

    /// Print the tenant's rows changed since a watermark
    Pull {
        /// Tenant to act as
        #[arg(short, long)]
        tenant: TenantId,

        /// Watermark (millis or RFC 3339); omit for everything
        #[arg(short, long, value_parser = parse_watermark)]
        since: Option<Watermark>,
    },

    /// Show per-kind row counts for a tenant
    Inspect {
        /// Tenant to inspect
        #[arg(short, long)]
        tenant: TenantId,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn parse_watermark(text: &str) -> Result<Watermark, String> {
    Watermark::parse(text).map_err(|e| e.to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Migrate { list } => {
            if list {
                commands::migrate::list();
            } else {
                let path = cli.db.ok_or("Store path required for migrate")?;
                commands::migrate::run(&path)?;
            }
        }
        Commands::Sync {
            tenant,
            file,
            since,
        } => {
            let path = cli.db.ok_or("Store path required for sync")?;
            commands::sync::run_sync(&path, tenant, &file, since)?;
        }
        Commands::Push { tenant, file } => {
            let path = cli.db.ok_or("Store path required for push")?;
            commands::sync::run_push(&path, tenant, &file)?;
        }
        Commands::Pull { tenant, since } => {
            let path = cli.db.ok_or("Store path required for pull")?;
            commands::sync::run_pull(&path, tenant, since)?;
        }
        Commands::Inspect { tenant, format } => {
            let path = cli.db.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, tenant, &format)?;
        }
        Commands::Version => {
            println!("farmsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("farmsync core v{}", farmsync_core::VERSION);
            println!("schema v{}", farmsync_core::LATEST_VERSION);
        }
    }

    Ok(())
}
