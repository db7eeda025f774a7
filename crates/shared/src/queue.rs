//! Scrape task queue.
//!
//! This module provides the scheduling core on top of the SQLite task table:
//! deduplicated enqueue, atomic priority dequeue, retry bookkeeping and
//! cleanup. The scanner feeds it, the worker pool drains it.

use crate::db::SharedDatabase;
use crate::models::{NewTask, QueueStatus, ScrapeTask, ScrapeType, TaskErrorKind, TaskState};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, OptionalExtension};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// State-change notifications for callers that want push instead of polling.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Enqueued { task_id: i64 },
    StateChanged { task_id: i64, state: TaskState },
}

/// Task queue manager
pub struct TaskQueue {
    db: SharedDatabase,
    /// Retry ceiling; failed tasks at or beyond it stay failed.
    max_retries: u32,
    events: broadcast::Sender<QueueEvent>,
}

impl TaskQueue {
    /// Create a new task queue with the given database
    pub fn new(db: SharedDatabase, max_retries: u32) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            db,
            max_retries,
            events,
        }
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Enqueue a new task (with deduplication)
    ///
    /// If a non-terminal task already exists for the same (comic, scrape type)
    /// pair, return its id unchanged: no new row, no priority bump.
    pub fn enqueue(&self, task: &NewTask) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let now = Utc::now();

        // Try to insert; the partial unique index rejects a second
        // non-terminal task for the pair
        match db.conn().execute(
            "INSERT INTO tasks (comic_id, comic_title, scrape_type, priority,
                                state, retry_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
            params![
                task.comic_id,
                task.comic_title,
                task.scrape_type.to_string(),
                task.priority,
                now,
            ],
        ) {
            Ok(_) => {
                let id = db.conn().last_insert_rowid();
                debug!(
                    task_id = id,
                    comic_id = task.comic_id,
                    scrape_type = %task.scrape_type,
                    priority = task.priority,
                    "Enqueued new task"
                );
                drop(db);
                let _ = self.events.send(QueueEvent::Enqueued { task_id: id });
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Task already exists, return existing ID
                let existing_id: i64 = db.conn().query_row(
                    "SELECT id FROM tasks
                     WHERE comic_id = ?1 AND scrape_type = ?2
                       AND state IN ('pending', 'running')",
                    params![task.comic_id, task.scrape_type.to_string()],
                    |row| row.get(0),
                )?;

                debug!(
                    task_id = existing_id,
                    comic_id = task.comic_id,
                    scrape_type = %task.scrape_type,
                    "Task already queued"
                );

                Ok(existing_id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Enqueue several tasks; dedup applies per item, the batch is not atomic
    pub fn enqueue_all(&self, tasks: &[NewTask]) -> Result<Vec<i64>> {
        tasks.iter().map(|t| self.enqueue(t)).collect()
    }

    /// Dequeue the next pending task (atomic operation)
    ///
    /// Selects the pending task with the highest priority, tie-broken by
    /// earliest creation, and flips it to running in the same transaction.
    /// No two callers can ever receive the same task.
    pub fn dequeue(&self) -> Result<Option<ScrapeTask>> {
        let mut db = self.db.lock().unwrap();
        let tx = db.begin_transaction()?;

        let picked: Option<i64> = tx
            .query_row(
                "SELECT id FROM tasks
                 WHERE state = 'pending'
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let id = match picked {
            Some(id) => id,
            None => {
                tx.commit()?;
                return Ok(None);
            }
        };

        tx.execute(
            "UPDATE tasks SET state = 'running', updated_at = ?1 WHERE id = ?2",
            params![Utc::now(), id],
        )?;

        let task = tx.query_row(
            "SELECT * FROM tasks WHERE id = ?1",
            params![id],
            row_to_task,
        )?;

        tx.commit()?;
        drop(db);

        debug!(
            task_id = task.id,
            comic_id = task.comic_id,
            priority = task.priority,
            "Dequeued task"
        );
        let _ = self.events.send(QueueEvent::StateChanged {
            task_id: task.id,
            state: TaskState::Running,
        });

        Ok(Some(task))
    }

    /// Persist a caller-supplied terminal transition
    ///
    /// Only a task still running accepts the update; returns false when the
    /// row was concurrently cancelled (or never running), in which case the
    /// caller must not assume its outcome was recorded.
    pub fn update_task(&self, task: &ScrapeTask) -> Result<bool> {
        let db = self.db.lock().unwrap();

        let updated = db
            .conn()
            .execute(
                "UPDATE tasks SET state = ?1, error_kind = ?2, last_error = ?3,
                                  retry_count = ?4, updated_at = ?5
                 WHERE id = ?6 AND state = 'running'",
                params![
                    task.state.to_string(),
                    task.error_kind.map(|k| k.to_string()),
                    task.last_error,
                    task.retry_count,
                    Utc::now(),
                    task.id,
                ],
            )
            .context("Failed to update task")?;
        drop(db);

        if updated > 0 {
            debug!(task_id = task.id, state = %task.state, "Updated task");
            let _ = self.events.send(QueueEvent::StateChanged {
                task_id: task.id,
                state: task.state,
            });
        } else {
            debug!(task_id = task.id, "Task update lost; task no longer running");
        }

        Ok(updated > 0)
    }

    /// Cancel a pending or running task
    ///
    /// The task lands in the terminal failed state with the distinguished
    /// cancelled tag, which the retry pass never touches.
    pub fn cancel_task(&self, task_id: i64) -> Result<bool> {
        let db = self.db.lock().unwrap();

        let updated = db
            .conn()
            .execute(
                "UPDATE tasks SET state = 'failed', error_kind = 'cancelled',
                                  last_error = 'cancelled', updated_at = ?1
                 WHERE id = ?2 AND state IN ('pending', 'running')",
                params![Utc::now(), task_id],
            )
            .context("Failed to cancel task")?;
        drop(db);

        if updated > 0 {
            info!(task_id, "Cancelled task");
            let _ = self.events.send(QueueEvent::StateChanged {
                task_id,
                state: TaskState::Failed,
            });
        }

        Ok(updated > 0)
    }

    /// Cancel every non-terminal task belonging to the given comics
    ///
    /// Returns the number of tasks cancelled. Used by root deletion so no
    /// in-flight work outlives its root.
    pub fn cancel_for_comics(&self, comic_ids: &[i64]) -> Result<usize> {
        let mut cancelled = 0;

        {
            let db = self.db.lock().unwrap();
            let now = Utc::now();
            for comic_id in comic_ids {
                cancelled += db
                    .conn()
                    .execute(
                        "UPDATE tasks SET state = 'failed', error_kind = 'cancelled',
                                          last_error = 'cancelled', updated_at = ?1
                         WHERE comic_id = ?2 AND state IN ('pending', 'running')",
                        params![now, comic_id],
                    )
                    .context("Failed to cancel tasks for comic")?;
            }
        }

        if cancelled > 0 {
            info!(count = cancelled, "Cancelled tasks for removed comics");
        }
        Ok(cancelled)
    }

    /// Retry all failed tasks still under the retry ceiling
    ///
    /// Only transient failures are eligible; fatal and cancelled tasks stay
    /// failed permanently, as do tasks that exhausted their retries.
    pub fn retry_failed(&self) -> Result<usize> {
        let db = self.db.lock().unwrap();

        let updated = db
            .conn()
            .execute(
                "UPDATE tasks
                 SET state = 'pending', retry_count = retry_count + 1,
                     error_kind = NULL, last_error = NULL, updated_at = ?1
                 WHERE state = 'failed'
                   AND (error_kind IS NULL OR error_kind = 'transient')
                   AND retry_count < ?2",
                params![Utc::now(), self.max_retries],
            )
            .context("Failed to retry tasks")?;

        if updated > 0 {
            info!(count = updated, "Retrying failed tasks");
        }

        Ok(updated)
    }

    /// Delete terminal tasks older than the given age
    ///
    /// Pending and running tasks are never removed, regardless of age.
    pub fn cleanup(&self, older_than: Duration) -> Result<usize> {
        let cutoff = Utc::now() - older_than;
        let db = self.db.lock().unwrap();

        let deleted = db
            .conn()
            .execute(
                "DELETE FROM tasks
                 WHERE state IN ('completed', 'failed') AND updated_at < ?1",
                params![cutoff],
            )
            .context("Failed to clean up tasks")?;

        if deleted > 0 {
            info!(count = deleted, "Cleaned up terminal tasks");
        }
        Ok(deleted)
    }

    /// Get task counts per state, computed fresh
    pub fn get_status(&self) -> Result<QueueStatus> {
        let db = self.db.lock().unwrap();

        let mut stmt = db.conn().prepare(
            "SELECT state, COUNT(*) FROM tasks GROUP BY state",
        )?;
        let mut counts = std::collections::HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            counts.insert(state, count);
        }

        let cancelled: i64 = db.conn().query_row(
            "SELECT COUNT(*) FROM tasks WHERE state = 'failed' AND error_kind = 'cancelled'",
            [],
            |row| row.get(0),
        )?;

        let failed = *counts.get("failed").unwrap_or(&0) - cancelled;
        let status = QueueStatus {
            pending: *counts.get("pending").unwrap_or(&0) as usize,
            running: *counts.get("running").unwrap_or(&0) as usize,
            completed: *counts.get("completed").unwrap_or(&0) as usize,
            failed: failed as usize,
            cancelled: cancelled as usize,
            total: counts.values().sum::<i64>() as usize,
        };
        Ok(status)
    }

    /// All tasks recorded for a comic, newest first
    pub fn get_tasks_by_comic(&self, comic_id: i64) -> Result<Vec<ScrapeTask>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.conn().prepare(
            "SELECT * FROM tasks WHERE comic_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let tasks = stmt
            .query_map(params![comic_id], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Whether a non-terminal task exists for the pair
    pub fn has_pending_task(&self, comic_id: i64, scrape_type: ScrapeType) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.conn().query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE comic_id = ?1 AND scrape_type = ?2 AND state IN ('pending', 'running')",
            params![comic_id, scrape_type.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Fetch a task by id
    pub fn get_task(&self, task_id: i64) -> Result<Option<ScrapeTask>> {
        let db = self.db.lock().unwrap();
        db.conn()
            .query_row(
                "SELECT * FROM tasks WHERE id = ?1",
                params![task_id],
                row_to_task,
            )
            .optional()
            .context("Failed to query task by id")
    }
}

/// Helper: Convert a database row to a ScrapeTask
fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<ScrapeTask> {
    Ok(ScrapeTask {
        id: row.get(0)?,
        comic_id: row.get(1)?,
        comic_title: row.get(2)?,
        scrape_type: row
            .get::<_, String>(3)?
            .parse()
            .unwrap_or(ScrapeType::Details),
        priority: row.get(4)?,
        state: row
            .get::<_, String>(5)?
            .parse()
            .unwrap_or(TaskState::Pending),
        retry_count: row.get::<_, i64>(6)? as u32,
        error_kind: row
            .get::<_, Option<String>>(7)?
            .and_then(|k| k.parse::<TaskErrorKind>().ok()),
        last_error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
