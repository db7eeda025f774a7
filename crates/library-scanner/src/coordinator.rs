//! Scan coordinator.
//!
//! Walks a root through the enumeration collaborator, diffs the result
//! against the persisted catalog and turns the differences into scrape
//! tasks. Scans of distinct roots may run concurrently; a single root is
//! protected by a per-root lock and a second scan fails fast.

use crate::enumerate::ItemEnumerator;
use crate::registry::RootRegistry;
use chrono::Utc;
use futures::future::join_all;
use shared::catalog::CatalogStore;
use shared::error::LibraryError;
use shared::models::{
    NewTask, PermissionState, ScanResult, ScanTrigger, ScanType, ScrapeType,
};
use shared::queue::TaskQueue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Priority bands: explicit user actions outrank background sync, and
/// freshness-sensitive incremental updates outrank full-scan backlog.
const MANUAL_PRIORITY: i32 = 100;
const AUTO_PRIORITY: i32 = 10;
const INCREMENTAL_BUMP: i32 = 5;

fn task_priority(trigger: ScanTrigger, scan_type: ScanType) -> i32 {
    let band = match trigger {
        ScanTrigger::Manual => MANUAL_PRIORITY,
        ScanTrigger::Automatic => AUTO_PRIORITY,
    };
    match scan_type {
        ScanType::Incremental => band + INCREMENTAL_BUMP,
        ScanType::Full => band,
    }
}

/// Scan coordinator
pub struct ScanCoordinator {
    registry: Arc<RootRegistry>,
    catalog: Arc<dyn CatalogStore>,
    queue: Arc<TaskQueue>,
    enumerator: Arc<dyn ItemEnumerator>,
    scan_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ScanCoordinator {
    pub fn new(
        registry: Arc<RootRegistry>,
        catalog: Arc<dyn CatalogStore>,
        queue: Arc<TaskQueue>,
        enumerator: Arc<dyn ItemEnumerator>,
    ) -> Self {
        Self {
            registry,
            catalog,
            queue,
            enumerator,
            scan_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, root_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.scan_locks.lock().unwrap();
        locks
            .entry(root_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Scan a single root
    ///
    /// Root-level failures during enumeration come back as a
    /// `success = false` result with the error recorded and no scan-info
    /// mutation; a missing root, revoked permission or busy root surface as
    /// typed errors instead.
    pub async fn scan_root(
        &self,
        root_id: i64,
        scan_type: ScanType,
        trigger: ScanTrigger,
    ) -> Result<ScanResult, LibraryError> {
        let root = self.registry.get_root_by_id(root_id)?;
        if root.permission == PermissionState::Revoked {
            return Err(LibraryError::PermissionDenied(root_id));
        }

        let lock = self.lock_for(root_id);
        let _guard = lock
            .try_lock()
            .map_err(|_| LibraryError::ScanInProgress(root_id))?;

        info!(
            root_id,
            uri = %root.uri,
            scan_type = ?scan_type,
            trigger = ?trigger,
            "Starting scan"
        );

        // Items changing while we enumerate must land in the next
        // incremental window, so the recorded timestamp is taken up front.
        let started_at = Utc::now();

        let since = match scan_type {
            ScanType::Incremental => root.last_scan_at,
            ScanType::Full => None,
        };

        let items = match self.enumerator.enumerate(&root, since).await {
            Ok(items) => items,
            Err(e) => {
                warn!(root_id, error = %format!("{:#}", e), "Enumeration failed");
                return Ok(ScanResult::failure(root_id, format!("{:#}", e)));
            }
        };

        let snapshot = self.catalog.comics_under_root(root_id)?;
        let mut by_uri: HashMap<String, _> = snapshot
            .into_iter()
            .map(|c| (c.item_uri.clone(), c))
            .collect();

        let priority = task_priority(trigger, scan_type);
        let mut result = ScanResult {
            root_id,
            success: true,
            new_count: 0,
            updated_count: 0,
            removed_count: 0,
            new_chapter_count: 0,
            error: None,
        };
        let mut to_enqueue = Vec::new();

        for item in &items {
            match by_uri.remove(&item.item_uri) {
                None => {
                    let comic_id = self.catalog.insert_comic(root_id, item)?;
                    result.new_count += 1;
                    result.new_chapter_count += item.chapter_count.max(0) as usize;
                    to_enqueue.push(NewTask {
                        comic_id,
                        comic_title: item.title.clone(),
                        scrape_type: ScrapeType::Details,
                        priority,
                    });
                }
                Some(existing) => {
                    if existing.removed || existing.signature != item.signature {
                        self.catalog.update_entry(existing.id, item)?;
                        result.updated_count += 1;
                        let delta = item.chapter_count - existing.chapter_count;
                        if delta > 0 {
                            result.new_chapter_count += delta as usize;
                        }
                        to_enqueue.push(NewTask {
                            comic_id: existing.id,
                            comic_title: item.title.clone(),
                            scrape_type: ScrapeType::Details,
                            priority,
                        });
                    }
                }
            }
        }

        // Absence only means "gone" when the enumeration was complete; an
        // incremental listing is filtered, so no removal detection there.
        if scan_type == ScanType::Full {
            for leftover in by_uri.values() {
                if !leftover.removed {
                    self.catalog.mark_removed(leftover.id)?;
                    result.removed_count += 1;
                }
            }
        }

        // A comic failing to enqueue must not sink the scan
        for task in &to_enqueue {
            if let Err(e) = self.queue.enqueue(task) {
                warn!(
                    comic_id = task.comic_id,
                    error = %e,
                    "Failed to enqueue scrape task"
                );
            }
        }

        let live = self.catalog.count_comics(root_id)?;
        self.registry.record_scan(root_id, live, started_at)?;

        info!(
            root_id,
            new = result.new_count,
            updated = result.updated_count,
            removed = result.removed_count,
            new_chapters = result.new_chapter_count,
            comic_count = live,
            "Scan complete"
        );

        Ok(result)
    }

    /// Scan every auto-sync root
    ///
    /// Roots scan concurrently and independently: one root failing, busy or
    /// disappearing mid-batch still yields its entry in the returned list.
    pub async fn scan_all_roots(
        &self,
        scan_type: ScanType,
    ) -> Result<Vec<ScanResult>, LibraryError> {
        let roots = self.registry.auto_sync_roots()?;
        info!(roots = roots.len(), scan_type = ?scan_type, "Scanning all roots");

        let scans = roots.iter().map(|root| {
            let root_id = root.id;
            async move {
                match self
                    .scan_root(root_id, scan_type, ScanTrigger::Automatic)
                    .await
                {
                    Ok(result) => result,
                    Err(e) => ScanResult::failure(root_id, e.to_string()),
                }
            }
        });

        Ok(join_all(scans).await)
    }
}
