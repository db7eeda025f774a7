//! Scrape worker CLI application.
//!
//! Drains the scrape task queue against the remote metadata source, with
//! deferred retries and terminal-task cleanup.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scrape_worker::executor::ExecutorConfig;
use scrape_worker::{CacheManager, MetadataClient, RetryScheduler, TaskExecutor};
use shared::{Config, Database, SqliteCatalog, TaskQueue};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

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
    /// Run the worker pool
    Run {
        /// Number of concurrent workers
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Exit when the queue is drained instead of waiting for more work
        #[arg(long)]
        oneshot: bool,

        /// Clear the metadata cache before running
        #[arg(long)]
        clear_cache: bool,
    },

    /// Reset retryable failed tasks to pending once
    Retry,

    /// Purge old terminal tasks
    Cleanup {
        /// Age threshold in hours; defaults to the configured value
        #[arg(long)]
        older_than_hours: Option<u64>,
    },

    /// Show queue status
    Status,
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
        component: "scrape-worker".to_string(),
        default_level: log_level,
        console: true,
        file: true,
        json_format: false,
    })?;

    info!("Scrape worker starting");
    info!(config_file = %args.config.display(), "Loaded configuration");

    // Initialize database and stores
    std::fs::create_dir_all(config.data_dir()).context("Failed to create data directory")?;
    let db_path = config.database_path();
    info!(db_path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path)
        .context("Failed to open database")?
        .into_shared();

    let queue = Arc::new(TaskQueue::new(db.clone(), config.scraper.max_retries));
    let catalog = Arc::new(SqliteCatalog::new(db));

    match args.command {
        Command::Run {
            workers,
            oneshot,
            clear_cache,
        } => {
            let cache = CacheManager::new(config.cache_dir(), config.scraper.cache.enabled)
                .context("Failed to initialize cache")?;

            if clear_cache {
                info!("Clearing cache");
                cache.clear().context("Failed to clear cache")?;
            }

            let cache_stats = cache.stats().context("Failed to get cache stats")?;
            info!(
                cached_files = cache_stats.total_files,
                cache_size_mb = cache_stats.total_size_bytes / 1_000_000,
                "Cache statistics"
            );

            let fetcher = Arc::new(
                MetadataClient::new(
                    config.scraper.base_url.clone(),
                    config.scraper.rate_limit.requests_per_second,
                    config.scraper.rate_limit.requests_per_minute,
                    config.scraper.max_retries,
                    config.scraper.fetch_retry_delay_ms,
                    cache,
                )
                .context("Failed to create metadata client")?,
            );

            let num_workers = workers.unwrap_or(config.scraper.workers);
            let status = queue.get_status()?;
            info!(
                pending = status.pending,
                running = status.running,
                failed = status.failed,
                "Initial queue status"
            );

            if oneshot && status.pending == 0 && status.running == 0 {
                info!("No tasks to process, exiting");
                return Ok(());
            }

            let executor = TaskExecutor::new(
                queue.clone(),
                catalog,
                fetcher,
                ExecutorConfig {
                    workers: num_workers,
                    poll_interval: Duration::from_secs(config.scraper.poll_interval_secs),
                    oneshot,
                },
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            // Ctrl-C requests a graceful stop; in-flight fetches finish
            // their attempt before the workers exit
            let signal_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                    let _ = signal_tx.send(true);
                }
            });

            // Deferred retries only make sense for a long-running pool
            let retry_handle = if !oneshot {
                let scheduler = RetryScheduler::new(
                    queue.clone(),
                    Duration::from_secs(config.scraper.retry_interval_secs),
                    Duration::from_secs(config.scraper.retry_interval_max_secs),
                );
                let retry_shutdown = shutdown_rx.clone();
                Some(tokio::spawn(async move {
                    scheduler.run(retry_shutdown).await;
                }))
            } else {
                None
            };

            let stats = executor.run(shutdown_rx).await?;

            let _ = shutdown_tx.send(true);
            if let Some(handle) = retry_handle {
                let _ = handle.await;
            }

            let final_status = queue.get_status()?;
            info!("=== Scrape Run Complete ===");
            info!("Completed this run: {}", stats.completed);
            info!("Failed this run: {}", stats.failed);
            info!("Pending: {}", final_status.pending);
            info!("Failed total: {}", final_status.failed);
        }
        Command::Retry => {
            let count = queue.retry_failed()?;
            info!(count, "Reset failed tasks to pending");
        }
        Command::Cleanup { older_than_hours } => {
            let hours = older_than_hours.unwrap_or(config.scraper.cleanup_age_hours);
            let removed = queue.cleanup(chrono::Duration::hours(hours as i64))?;
            info!(removed, older_than_hours = hours, "Purged terminal tasks");
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

    info!("Scrape worker finished");
    Ok(())
}
