//! Tree Integrity Doctor
//!
//! Opens the configured tree database and prints the integrity report of
//! each tree given on the command line as JSON.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tree-doctor -- <tree-id> [<tree-id> ...]
//!
//! # Against another database file
//! cargo run --bin tree-doctor -- --db-path /tmp/trees.db <tree-id>
//! ```
//!
//! # Environment Variables
//!
//! - `CODETREE_DB_PATH`: database file, same as `--db-path` (default:
//!   `~/.codetree/database/codetree.db`)
//! - `CODETREE_BUSY_TIMEOUT_MS`: SQLite busy timeout (default: 5000)
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")
//!
//! Exits with status 1 if any tree has a violation, 2 on usage or lookup
//! errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use codetree_core::db::{DatabaseService, TursoStore};
use codetree_core::services::{AllowAll, TreeService};
use codetree_core::StoreConfig;

/// Print the integrity report of one or more trees
#[derive(Parser, Debug)]
#[command(name = "tree-doctor", about, long_about = None)]
struct Args {
    /// Trees to check
    #[arg(required = true, value_name = "TREE_ID")]
    tree_ids: Vec<String>,

    /// Database file to open
    #[arg(long, env = "CODETREE_DB_PATH")]
    db_path: Option<PathBuf>,
}

impl Args {
    fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig::from_env();
        if let Some(path) = &self.db_path {
            config.db_path = path.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.store_config();
    tracing::info!("Database: {}", config.db_path.display());

    let db = DatabaseService::from_config(&config).await?;
    let store = Arc::new(TursoStore::new(Arc::new(db)));
    let service = TreeService::from_config(store, Arc::new(AllowAll), &config);

    let mut clean = true;
    for tree_id in &args.tree_ids {
        match service.check_integrity(tree_id).await {
            Ok(report) => {
                clean &= report.is_clean();
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Err(e) => {
                tracing::error!("Cannot check tree {}: {} ({})", tree_id, e, e.kind());
                return Ok(ExitCode::from(2));
            }
        }
    }

    if clean {
        tracing::info!("{} tree(s) clean", args.tree_ids.len());
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}
