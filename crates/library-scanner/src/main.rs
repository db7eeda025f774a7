//! Library scanner CLI application.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use library_scanner::{LocalEnumerator, LocalPermissionProbe, RootRegistry, ScanCoordinator};
use shared::{
    Config, Database, NewRoot, RootSource, RootStore, ScanTrigger, ScanType, SqliteCatalog,
    TaskQueue,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage library roots
    Root {
        #[command(subcommand)]
        action: RootAction,
    },

    /// Scan one root, or every auto-sync root
    Scan {
        /// Root id; omit to scan all auto-sync roots
        #[arg(long)]
        root: Option<i64>,

        /// Re-validate every item instead of only changed ones
        #[arg(long)]
        full: bool,
    },

    /// Show queue status
    Status,
}

#[derive(Subcommand, Debug)]
enum RootAction {
    /// Register a new root
    Add {
        uri: String,

        #[arg(long, default_value = "local")]
        source: String,

        #[arg(long, default_value_t = 0)]
        sort_key: i64,

        /// Exclude this root from background sync
        #[arg(long)]
        no_auto_sync: bool,
    },

    /// List registered roots
    List,

    /// Remove a root and cancel its outstanding tasks
    Remove { id: i64 },

    /// Re-check a root's permission state
    Verify { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    shared::logging::init(shared::LogConfig {
        log_dir: config.log_dir().to_string_lossy().to_string(),
        component: "library-scanner".to_string(),
        default_level: log_level,
        console: true,
        file: true,
        json_format: false,
    })?;

    info!("Library scanner starting");
    info!(config_file = %args.config.display(), "Loaded configuration");

    // Initialize database and stores
    std::fs::create_dir_all(config.data_dir()).context("Failed to create data directory")?;
    let db_path = config.database_path();
    info!(db_path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path)
        .context("Failed to open database")?
        .into_shared();

    let catalog = Arc::new(SqliteCatalog::new(db.clone()));
    let queue = Arc::new(TaskQueue::new(db.clone(), config.scraper.max_retries));
    let registry = Arc::new(RootRegistry::new(
        RootStore::new(db),
        catalog.clone(),
        queue.clone(),
        Arc::new(LocalPermissionProbe),
    ));

    match args.command {
        Command::Root { action } => run_root_action(&registry, action).await?,
        Command::Scan { root, full } => {
            let enumerator = Arc::new(LocalEnumerator::new(config.scanner.extensions.clone()));
            let coordinator =
                ScanCoordinator::new(registry, catalog, queue.clone(), enumerator);

            let scan_type = if full {
                ScanType::Full
            } else {
                ScanType::Incremental
            };

            let results = match root {
                Some(root_id) => {
                    vec![
                        coordinator
                            .scan_root(root_id, scan_type, ScanTrigger::Manual)
                            .await?,
                    ]
                }
                None => coordinator.scan_all_roots(scan_type).await?,
            };

            info!("=== Scan Complete ===");
            for result in &results {
                if result.success {
                    info!(
                        root_id = result.root_id,
                        new = result.new_count,
                        updated = result.updated_count,
                        removed = result.removed_count,
                        new_chapters = result.new_chapter_count,
                        "Root scanned"
                    );
                } else {
                    warn!(
                        root_id = result.root_id,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Root scan failed"
                    );
                }
            }

            let status = queue.get_status()?;
            info!(
                pending = status.pending,
                running = status.running,
                "Queue after scan"
            );
        }
        Command::Status => {
            let status = queue.get_status()?;
            info!("=== Queue Status ===");
            info!("Pending: {}", status.pending);
            info!("Running: {}", status.running);
            info!("Completed: {}", status.completed);
            info!("Failed: {}", status.failed);
            info!("Cancelled: {}", status.cancelled);
            info!("Total: {}", status.total);
        }
    }

    info!("Library scanner finished");
    Ok(())
}

async fn run_root_action(registry: &RootRegistry, action: RootAction) -> Result<()> {
    match action {
        RootAction::Add {
            uri,
            source,
            sort_key,
            no_auto_sync,
        } => {
            let source: RootSource = source.parse()?;
            let root = registry.add_root(&NewRoot {
                uri,
                source,
                sort_key,
                auto_sync: !no_auto_sync,
            })?;
            info!(
                root_id = root.id,
                uri = %root.uri,
                source = %root.source,
                "Root registered"
            );
        }
        RootAction::List => {
            let roots = registry.get_all_roots()?;
            info!("=== Registered Roots ===");
            for root in roots {
                info!(
                    root_id = root.id,
                    uri = %root.uri,
                    source = %root.source,
                    permission = %root.permission,
                    auto_sync = root.auto_sync,
                    comics = root.comic_count,
                    last_scan = %root
                        .last_scan_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string()),
                    "Root"
                );
            }
        }
        RootAction::Remove { id } => {
            let cancelled = registry.delete_root(id)?;
            info!(root_id = id, cancelled_tasks = cancelled, "Root removed");
        }
        RootAction::Verify { id } => {
            let root = registry.verify_permission(id).await?;
            info!(root_id = id, permission = %root.permission, "Root verified");
        }
    }
    Ok(())
}
