//! Task executor.
//!
//! A bounded pool of workers drains the scrape queue. Each worker loops:
//! dequeue, fetch through the metadata collaborator, persist the outcome.
//! Idle workers suspend on queue events or a poll interval; nothing ever
//! busy-spins. Terminal updates go through the queue's state guard, so a
//! task cancelled mid-fetch keeps its cancelled tag and the fetched result
//! is dropped.

use crate::fetcher::MetadataFetcher;
use anyhow::{Context, Result};
use shared::catalog::CatalogStore;
use shared::models::{ScrapeTask, TaskErrorKind, TaskState};
use shared::queue::TaskQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// How long an idle worker sleeps between queue polls
    pub poll_interval: Duration,
    /// Exit once the queue is drained instead of waiting for more work
    pub oneshot: bool,
}

/// Aggregated outcome of an executor run
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorStats {
    pub completed: usize,
    pub failed: usize,
}

/// Bounded-concurrency task executor
pub struct TaskExecutor {
    queue: Arc<TaskQueue>,
    catalog: Arc<dyn CatalogStore>,
    fetcher: Arc<dyn MetadataFetcher>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        queue: Arc<TaskQueue>,
        catalog: Arc<dyn CatalogStore>,
        fetcher: Arc<dyn MetadataFetcher>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            queue,
            catalog,
            fetcher,
            config,
        }
    }

    /// Run the worker pool until shutdown (or, in oneshot mode, until the
    /// queue drains)
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<ExecutorStats> {
        info!(workers = self.config.workers, oneshot = self.config.oneshot, "Starting workers");

        let mut handles = Vec::new();
        for worker_id in 0..self.config.workers {
            let mut worker = ScrapeWorker {
                worker_id,
                queue: Arc::clone(&self.queue),
                catalog: Arc::clone(&self.catalog),
                fetcher: Arc::clone(&self.fetcher),
                poll_interval: self.config.poll_interval,
                oneshot: self.config.oneshot,
                shutdown: shutdown.clone(),
                completed: 0,
                failed: 0,
            };
            handles.push(tokio::spawn(async move {
                let result = worker.run().await;
                if let Err(e) = &result {
                    error!(worker_id = worker.worker_id, error = %e, "Worker failed");
                }
                result
            }));
        }

        let mut stats = ExecutorStats::default();
        for (worker_id, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(worker_stats)) => {
                    stats.completed += worker_stats.completed;
                    stats.failed += worker_stats.failed;
                }
                Ok(Err(_)) => {}
                Err(e) => {
                    error!(worker_id, error = %e, "Worker panicked");
                }
            }
        }

        info!(
            completed = stats.completed,
            failed = stats.failed,
            "Workers finished"
        );
        Ok(stats)
    }
}

/// One worker of the pool
struct ScrapeWorker {
    worker_id: usize,
    queue: Arc<TaskQueue>,
    catalog: Arc<dyn CatalogStore>,
    fetcher: Arc<dyn MetadataFetcher>,
    poll_interval: Duration,
    oneshot: bool,
    shutdown: watch::Receiver<bool>,
    completed: usize,
    failed: usize,
}

impl ScrapeWorker {
    async fn run(&mut self) -> Result<ExecutorStats> {
        info!(worker_id = self.worker_id, "Scrape worker started");
        let mut events = self.queue.subscribe();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let task = self
                .queue
                .dequeue()
                .context("Failed to dequeue task")?;

            let task = match task {
                Some(task) => task,
                None => {
                    if self.oneshot {
                        debug!(worker_id = self.worker_id, "Queue drained");
                        break;
                    }
                    // Suspend until something lands in the queue, the poll
                    // interval elapses, or shutdown is signalled
                    tokio::select! {
                        _ = events.recv() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        changed = self.shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
            };

            self.process(task).await;
        }

        info!(
            worker_id = self.worker_id,
            completed = self.completed,
            failed = self.failed,
            "Scrape worker finished"
        );
        Ok(ExecutorStats {
            completed: self.completed,
            failed: self.failed,
        })
    }

    async fn process(&mut self, mut task: ScrapeTask) {
        info!(
            worker_id = self.worker_id,
            task_id = task.id,
            comic_id = task.comic_id,
            comic_title = %task.comic_title,
            scrape_type = %task.scrape_type,
            "Processing task"
        );

        match self
            .fetcher
            .fetch(task.comic_id, &task.comic_title, task.scrape_type)
            .await
        {
            Ok(metadata) => {
                let applied = match self.catalog.apply_metadata(task.comic_id, &metadata) {
                    Ok(applied) => applied,
                    Err(e) => {
                        error!(task_id = task.id, error = %e, "Failed to persist metadata");
                        false
                    }
                };

                if applied {
                    task.state = TaskState::Completed;
                    task.error_kind = None;
                    task.last_error = None;
                } else {
                    // The comic vanished under us, usually because its root
                    // was deleted while the fetch was in flight
                    task.state = TaskState::Failed;
                    task.error_kind = Some(TaskErrorKind::Fatal);
                    task.last_error = Some("comic no longer in catalog".to_string());
                }
            }
            Err(e) => {
                warn!(
                    worker_id = self.worker_id,
                    task_id = task.id,
                    error = %e,
                    "Fetch failed"
                );
                // Transient failures wait for the retry pass; nothing is
                // retried inline
                task.state = TaskState::Failed;
                task.error_kind = Some(e.kind());
                task.last_error = Some(e.to_string());
            }
        }

        match self.queue.update_task(&task) {
            Ok(true) => match task.state {
                TaskState::Completed => self.completed += 1,
                _ => self.failed += 1,
            },
            Ok(false) => {
                // Cancelled while we were fetching; its terminal state is
                // already decided and our outcome is discarded
                info!(
                    worker_id = self.worker_id,
                    task_id = task.id,
                    "Task was cancelled mid-flight, dropping outcome"
                );
            }
            Err(e) => {
                error!(task_id = task.id, error = %e, "Failed to record task outcome");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchError;
    use async_trait::async_trait;
    use shared::catalog::SqliteCatalog;
    use shared::db::Database;
    use shared::models::{
        ComicMetadata, EnumeratedItem, NewRoot, NewTask, RootSource, ScrapeType,
    };
    use shared::roots::RootStore;
    use std::collections::HashMap;

    /// Scripted fetcher: outcome per comic id, with an optional delay.
    #[derive(Default)]
    struct FakeFetcher {
        failures: HashMap<i64, TaskErrorKind>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl MetadataFetcher for FakeFetcher {
        async fn fetch(
            &self,
            comic_id: i64,
            title: &str,
            _scrape_type: ScrapeType,
        ) -> Result<ComicMetadata, FetchError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.failures.get(&comic_id) {
                Some(TaskErrorKind::Transient) => {
                    Err(FetchError::Transient("remote flaked".to_string()))
                }
                Some(_) => Err(FetchError::Fatal("remote has no entry".to_string())),
                None => Ok(ComicMetadata {
                    title: Some(title.to_string()),
                    ..Default::default()
                }),
            }
        }
    }

    struct Fixture {
        db: shared::db::SharedDatabase,
        queue: Arc<TaskQueue>,
        catalog: Arc<SqliteCatalog>,
        root_id: i64,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap().into_shared();
        let roots = RootStore::new(db.clone());
        let root = roots
            .save_root(&NewRoot {
                uri: "/library".to_string(),
                source: RootSource::Local,
                sort_key: 0,
                auto_sync: true,
            })
            .unwrap();
        Fixture {
            queue: Arc::new(TaskQueue::new(db.clone(), 3)),
            catalog: Arc::new(SqliteCatalog::new(db.clone())),
            db,
            root_id: root.id,
        }
    }

    fn seed_comic(f: &Fixture, uri: &str) -> i64 {
        use shared::catalog::CatalogStore;
        let comic_id = f
            .catalog
            .insert_comic(
                f.root_id,
                &EnumeratedItem {
                    item_uri: uri.to_string(),
                    title: uri.to_string(),
                    signature: "sig".to_string(),
                    chapter_count: 1,
                    modified_at: chrono::Utc::now(),
                },
            )
            .unwrap();
        f.queue
            .enqueue(&NewTask {
                comic_id,
                comic_title: uri.to_string(),
                scrape_type: ScrapeType::Details,
                priority: 0,
            })
            .unwrap();
        comic_id
    }

    fn executor(f: &Fixture, fetcher: FakeFetcher, workers: usize) -> TaskExecutor {
        TaskExecutor::new(
            f.queue.clone(),
            f.catalog.clone(),
            Arc::new(fetcher),
            ExecutorConfig {
                workers,
                poll_interval: Duration::from_millis(50),
                oneshot: true,
            },
        )
    }

    #[tokio::test]
    async fn test_pool_drains_queue() -> Result<()> {
        use shared::catalog::CatalogStore;
        let f = fixture();
        let comics: Vec<i64> = (0..5).map(|i| seed_comic(&f, &format!("c{}.cbz", i))).collect();

        let (_tx, rx) = watch::channel(false);
        let stats = executor(&f, FakeFetcher::default(), 3).run(rx).await?;

        assert_eq!(stats.completed, 5);
        assert_eq!(stats.failed, 0);

        let status = f.queue.get_status()?;
        assert_eq!(status.completed, 5);
        assert_eq!(status.pending, 0);
        assert_eq!(status.running, 0);

        // Metadata landed in the catalog
        for comic_id in comics {
            assert!(f.catalog.get_comic(comic_id)?.unwrap().scraped_at.is_some());
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_failures_classified_not_retried_inline() -> Result<()> {
        let f = fixture();
        let ok = seed_comic(&f, "good.cbz");
        let flaky = seed_comic(&f, "flaky.cbz");
        let dead = seed_comic(&f, "dead.cbz");

        let fetcher = FakeFetcher {
            failures: HashMap::from([
                (flaky, TaskErrorKind::Transient),
                (dead, TaskErrorKind::Fatal),
            ]),
            delay: None,
        };

        let (_tx, rx) = watch::channel(false);
        let stats = executor(&f, fetcher, 2).run(rx).await?;

        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 2);

        let flaky_task = &f.queue.get_tasks_by_comic(flaky)?[0];
        assert_eq!(flaky_task.state, TaskState::Failed);
        assert_eq!(flaky_task.error_kind, Some(TaskErrorKind::Transient));
        assert!(flaky_task.last_error.as_deref().unwrap().contains("flaked"));

        let dead_task = &f.queue.get_tasks_by_comic(dead)?[0];
        assert_eq!(dead_task.error_kind, Some(TaskErrorKind::Fatal));

        let ok_task = &f.queue.get_tasks_by_comic(ok)?[0];
        assert_eq!(ok_task.state, TaskState::Completed);

        // The retry pass picks up only the transient failure
        assert_eq!(f.queue.retry_failed()?, 1);
        assert_eq!(
            f.queue.get_tasks_by_comic(flaky)?[0].state,
            TaskState::Pending
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_mid_fetch_wins() -> Result<()> {
        let f = fixture();
        let comic_id = seed_comic(&f, "slow.cbz");

        let fetcher = FakeFetcher {
            failures: HashMap::new(),
            delay: Some(Duration::from_millis(300)),
        };
        let executor = executor(&f, fetcher, 1);

        let (_tx, rx) = watch::channel(false);
        let queue = f.queue.clone();
        let run = tokio::spawn(async move { executor.run(rx).await });

        // Let the worker pick the task up and park inside the fetch
        tokio::time::sleep(Duration::from_millis(100)).await;
        let task = &queue.get_tasks_by_comic(comic_id)?[0];
        assert_eq!(task.state, TaskState::Running);
        assert!(queue.cancel_task(task.id)?);

        let stats = run.await.unwrap()?;
        assert_eq!(stats.completed, 0);

        // The cancelled tag survived the worker's completion attempt
        let task = &f.queue.get_tasks_by_comic(comic_id)?[0];
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error_kind, Some(TaskErrorKind::Cancelled));

        Ok(())
    }

    #[tokio::test]
    async fn test_vanished_comic_marks_task_failed() -> Result<()> {
        let f = fixture();
        let comic_id = seed_comic(&f, "gone.cbz");

        // The comic's root is deleted behind the queue's back, so the fetch
        // succeeds but there is nowhere to put the result
        assert!(RootStore::new(f.db.clone()).delete_root(f.root_id)?);

        let (_tx, rx) = watch::channel(false);
        let stats = executor(&f, FakeFetcher::default(), 1).run(rx).await?;
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.failed, 1);

        let task = &f.queue.get_tasks_by_comic(comic_id)?[0];
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error_kind, Some(TaskErrorKind::Fatal));
        assert!(task
            .last_error
            .as_deref()
            .unwrap()
            .contains("no longer in catalog"));

        Ok(())
    }
}
