//! Root registry.
//!
//! Owns the lifecycle of library roots. Deletion is the delicate part: every
//! non-terminal scrape task for the root's comics is cancelled before the
//! root row goes away, so no in-flight work outlives its root.

use crate::permission::PermissionProbe;
use shared::catalog::CatalogStore;
use shared::error::LibraryError;
use shared::models::{LibraryRoot, NewRoot, RootSource};
use shared::queue::TaskQueue;
use shared::roots::RootStore;
use std::sync::Arc;
use tracing::info;

/// Registry over the persisted root store
pub struct RootRegistry {
    roots: RootStore,
    catalog: Arc<dyn CatalogStore>,
    queue: Arc<TaskQueue>,
    probe: Arc<dyn PermissionProbe>,
}

impl RootRegistry {
    pub fn new(
        roots: RootStore,
        catalog: Arc<dyn CatalogStore>,
        queue: Arc<TaskQueue>,
        probe: Arc<dyn PermissionProbe>,
    ) -> Self {
        Self {
            roots,
            catalog,
            queue,
            probe,
        }
    }

    /// Register a new root
    ///
    /// A uri already registered is rejected, never silently merged.
    pub fn add_root(&self, new: &NewRoot) -> Result<LibraryRoot, LibraryError> {
        if self.roots.exists_by_uri(&new.uri)? {
            return Err(LibraryError::DuplicateRoot(new.uri.clone()));
        }
        Ok(self.roots.save_root(new)?)
    }

    /// Persist caller-side changes to a root
    pub fn update_root(&self, root: &LibraryRoot) -> Result<(), LibraryError> {
        if !self.roots.update_root(root)? {
            return Err(LibraryError::RootNotFound(root.id));
        }
        Ok(())
    }

    /// Delete a root, cancelling its outstanding work first
    ///
    /// Returns the number of tasks that were cancelled.
    pub fn delete_root(&self, id: i64) -> Result<usize, LibraryError> {
        let root = self.require_root(id)?;

        let comic_ids = self.catalog.comic_ids_under_root(root.id)?;
        let cancelled = self.queue.cancel_for_comics(&comic_ids)?;
        self.roots.delete_root(root.id)?;

        info!(
            root_id = id,
            uri = %root.uri,
            cancelled_tasks = cancelled,
            "Removed root and cancelled its outstanding tasks"
        );
        Ok(cancelled)
    }

    pub fn get_root_by_id(&self, id: i64) -> Result<LibraryRoot, LibraryError> {
        self.require_root(id)
    }

    pub fn get_all_roots(&self) -> Result<Vec<LibraryRoot>, LibraryError> {
        Ok(self.roots.get_all_roots()?)
    }

    pub fn get_roots_by_source(&self, source: RootSource) -> Result<Vec<LibraryRoot>, LibraryError> {
        Ok(self.roots.get_roots_by_source(source)?)
    }

    /// Roots participating in background sync
    pub fn auto_sync_roots(&self) -> Result<Vec<LibraryRoot>, LibraryError> {
        Ok(self.roots.get_auto_sync_roots()?)
    }

    pub fn exists_by_uri(&self, uri: &str) -> Result<bool, LibraryError> {
        Ok(self.roots.exists_by_uri(uri)?)
    }

    /// Record a successful scan against the root
    pub fn record_scan(
        &self,
        id: i64,
        comic_count: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), LibraryError> {
        if !self.roots.update_scan_info(id, comic_count, timestamp)? {
            return Err(LibraryError::RootNotFound(id));
        }
        Ok(())
    }

    /// Re-check the permission collaborator and persist the refreshed state
    pub async fn verify_permission(&self, id: i64) -> Result<LibraryRoot, LibraryError> {
        let root = self.require_root(id)?;

        let state = self.probe.check(&root).await?;
        self.roots.update_permission(id, state)?;

        info!(root_id = id, state = %state, "Verified root permission");
        self.require_root(id)
    }

    fn require_root(&self, id: i64) -> Result<LibraryRoot, LibraryError> {
        self.roots
            .get_root_by_id(id)?
            .ok_or(LibraryError::RootNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use shared::catalog::SqliteCatalog;
    use shared::db::Database;
    use shared::models::{
        EnumeratedItem, NewTask, PermissionState, ScrapeType, TaskState,
    };
    use chrono::Utc;

    struct FixedProbe(PermissionState);

    #[async_trait]
    impl PermissionProbe for FixedProbe {
        async fn check(&self, _root: &LibraryRoot) -> Result<PermissionState> {
            Ok(self.0)
        }
    }

    fn registry_with(probe: PermissionState) -> (RootRegistry, Arc<dyn CatalogStore>, Arc<TaskQueue>) {
        let db = Database::open_in_memory().unwrap().into_shared();
        let catalog: Arc<dyn CatalogStore> = Arc::new(SqliteCatalog::new(db.clone()));
        let queue = Arc::new(TaskQueue::new(db.clone(), 3));
        let registry = RootRegistry::new(
            RootStore::new(db),
            catalog.clone(),
            queue.clone(),
            Arc::new(FixedProbe(probe)),
        );
        (registry, catalog, queue)
    }

    fn new_root(uri: &str) -> NewRoot {
        NewRoot {
            uri: uri.to_string(),
            source: RootSource::Local,
            sort_key: 0,
            auto_sync: true,
        }
    }

    fn item(uri: &str) -> EnumeratedItem {
        EnumeratedItem {
            item_uri: uri.to_string(),
            title: uri.to_string(),
            signature: "sig".to_string(),
            chapter_count: 1,
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_root_rejected() {
        let (registry, _, _) = registry_with(PermissionState::Granted);

        registry.add_root(&new_root("/library")).unwrap();
        match registry.add_root(&new_root("/library")) {
            Err(LibraryError::DuplicateRoot(uri)) => assert_eq!(uri, "/library"),
            other => panic!("expected DuplicateRoot, got {:?}", other),
        }
    }

    #[test]
    fn test_delete_root_cascades_cancellation() -> Result<()> {
        let (registry, catalog, queue) = registry_with(PermissionState::Granted);

        let root = registry.add_root(&new_root("/library")).unwrap();
        let comic_a = catalog.insert_comic(root.id, &item("a.cbz"))?;
        let comic_b = catalog.insert_comic(root.id, &item("b.cbz"))?;

        // One pending, one running
        queue.enqueue(&NewTask {
            comic_id: comic_a,
            comic_title: "a".to_string(),
            scrape_type: ScrapeType::Details,
            priority: 0,
        })?;
        queue.enqueue(&NewTask {
            comic_id: comic_b,
            comic_title: "b".to_string(),
            scrape_type: ScrapeType::Details,
            priority: 0,
        })?;
        queue.dequeue()?.unwrap();

        let cancelled = registry.delete_root(root.id).unwrap();
        assert_eq!(cancelled, 2);

        // Both tasks terminal, root gone
        for comic_id in [comic_a, comic_b] {
            let tasks = queue.get_tasks_by_comic(comic_id)?;
            assert!(tasks.iter().all(|t| t.state == TaskState::Failed));
        }
        assert!(matches!(
            registry.get_root_by_id(root.id),
            Err(LibraryError::RootNotFound(_))
        ));

        Ok(())
    }

    #[test]
    fn test_delete_missing_root() {
        let (registry, _, _) = registry_with(PermissionState::Granted);
        assert!(matches!(
            registry.delete_root(404),
            Err(LibraryError::RootNotFound(404))
        ));
    }

    #[tokio::test]
    async fn test_verify_permission_persists_state() -> Result<()> {
        let (registry, _, _) = registry_with(PermissionState::Revoked);

        let root = registry.add_root(&new_root("/library")).unwrap();
        assert_eq!(root.permission, PermissionState::Unknown);

        let refreshed = registry.verify_permission(root.id).await.unwrap();
        assert_eq!(refreshed.permission, PermissionState::Revoked);

        // State survives a re-read
        let again = registry.get_root_by_id(root.id).unwrap();
        assert_eq!(again.permission, PermissionState::Revoked);

        Ok(())
    }
}
