//! Persisted root store.
//!
//! Owns the `roots` table. Mutation goes through the registry; this layer
//! only knows rows and ordering.

use crate::db::SharedDatabase;
use crate::models::{LibraryRoot, NewRoot, PermissionState, RootSource};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

/// Root store over the shared database handle
#[derive(Clone)]
pub struct RootStore {
    db: SharedDatabase,
}

impl RootStore {
    /// Create a new root store with the given database
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Insert a new root and return the stored row
    pub fn save_root(&self, new: &NewRoot) -> Result<LibraryRoot> {
        let db = self.db.lock().unwrap();
        let now = Utc::now();

        db.conn()
            .execute(
                "INSERT INTO roots (uri, source, sort_key, auto_sync, permission,
                                    comic_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'unknown', 0, ?5, ?5)",
                params![
                    new.uri,
                    new.source.to_string(),
                    new.sort_key,
                    new.auto_sync,
                    now,
                ],
            )
            .with_context(|| format!("Failed to insert root {}", new.uri))?;

        let id = db.conn().last_insert_rowid();
        info!(root_id = id, uri = %new.uri, "Registered new root");

        db.conn()
            .query_row("SELECT * FROM roots WHERE id = ?1", params![id], row_to_root)
            .context("Failed to read back inserted root")
    }

    /// Insert several roots; not atomic as a whole
    pub fn save_roots(&self, roots: &[NewRoot]) -> Result<Vec<LibraryRoot>> {
        roots.iter().map(|r| self.save_root(r)).collect()
    }

    /// Fetch a root by id
    pub fn get_root_by_id(&self, id: i64) -> Result<Option<LibraryRoot>> {
        let db = self.db.lock().unwrap();
        db.conn()
            .query_row("SELECT * FROM roots WHERE id = ?1", params![id], row_to_root)
            .optional()
            .context("Failed to query root by id")
    }

    /// All roots, ordered by sort key
    pub fn get_all_roots(&self) -> Result<Vec<LibraryRoot>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .conn()
            .prepare("SELECT * FROM roots ORDER BY sort_key ASC, id ASC")?;
        let roots = stmt
            .query_map([], row_to_root)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roots)
    }

    /// Roots backed by the given source kind
    pub fn get_roots_by_source(&self, source: RootSource) -> Result<Vec<LibraryRoot>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.conn().prepare(
            "SELECT * FROM roots WHERE source = ?1 ORDER BY sort_key ASC, id ASC",
        )?;
        let roots = stmt
            .query_map(params![source.to_string()], row_to_root)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roots)
    }

    /// Roots participating in background sync
    pub fn get_auto_sync_roots(&self) -> Result<Vec<LibraryRoot>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.conn().prepare(
            "SELECT * FROM roots WHERE auto_sync = 1 ORDER BY sort_key ASC, id ASC",
        )?;
        let roots = stmt
            .query_map([], row_to_root)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roots)
    }

    /// Persist caller-side changes to uri, sort key and auto-sync
    pub fn update_root(&self, root: &LibraryRoot) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let updated = db
            .conn()
            .execute(
                "UPDATE roots SET uri = ?1, sort_key = ?2, auto_sync = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![root.uri, root.sort_key, root.auto_sync, Utc::now(), root.id],
            )
            .context("Failed to update root")?;
        Ok(updated > 0)
    }

    /// Record the outcome of a successful scan
    pub fn update_scan_info(
        &self,
        id: i64,
        comic_count: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let updated = db
            .conn()
            .execute(
                "UPDATE roots SET comic_count = ?1, last_scan_at = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![comic_count, timestamp, Utc::now(), id],
            )
            .context("Failed to update scan info")?;

        debug!(root_id = id, comic_count, "Updated scan info");
        Ok(updated > 0)
    }

    /// Persist a refreshed permission state
    pub fn update_permission(&self, id: i64, state: PermissionState) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let updated = db
            .conn()
            .execute(
                "UPDATE roots SET permission = ?1, updated_at = ?2 WHERE id = ?3",
                params![state.to_string(), Utc::now(), id],
            )
            .context("Failed to update permission state")?;
        Ok(updated > 0)
    }

    /// Delete a root; comics under it fall with the foreign key cascade
    pub fn delete_root(&self, id: i64) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let deleted = db
            .conn()
            .execute("DELETE FROM roots WHERE id = ?1", params![id])
            .context("Failed to delete root")?;

        if deleted > 0 {
            info!(root_id = id, "Deleted root");
        }
        Ok(deleted > 0)
    }

    /// Whether any root is registered under the given uri
    pub fn exists_by_uri(&self, uri: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.conn().query_row(
            "SELECT COUNT(*) FROM roots WHERE uri = ?1",
            params![uri],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// Helper: Convert a database row to a LibraryRoot
fn row_to_root(row: &rusqlite::Row) -> rusqlite::Result<LibraryRoot> {
    Ok(LibraryRoot {
        id: row.get(0)?,
        uri: row.get(1)?,
        source: row
            .get::<_, String>(2)?
            .parse()
            .unwrap_or(RootSource::Local),
        sort_key: row.get(3)?,
        auto_sync: row.get(4)?,
        permission: row
            .get::<_, String>(5)?
            .parse()
            .unwrap_or(PermissionState::Unknown),
        last_scan_at: row.get(6)?,
        comic_count: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn test_store() -> RootStore {
        RootStore::new(Database::open_in_memory().unwrap().into_shared())
    }

    fn new_root(uri: &str, sort_key: i64) -> NewRoot {
        NewRoot {
            uri: uri.to_string(),
            source: RootSource::Local,
            sort_key,
            auto_sync: true,
        }
    }

    #[test]
    fn test_save_and_get() -> Result<()> {
        let store = test_store();

        let root = store.save_root(&new_root("/library/comics", 0))?;
        assert_eq!(root.uri, "/library/comics");
        assert_eq!(root.permission, PermissionState::Unknown);
        assert_eq!(root.comic_count, 0);
        assert!(root.last_scan_at.is_none());

        let fetched = store.get_root_by_id(root.id)?.unwrap();
        assert_eq!(fetched.uri, root.uri);

        Ok(())
    }

    #[test]
    fn test_sort_key_ordering() -> Result<()> {
        let store = test_store();

        store.save_root(&new_root("/c", 2))?;
        store.save_root(&new_root("/a", 0))?;
        store.save_root(&new_root("/b", 1))?;

        let uris: Vec<String> = store
            .get_all_roots()?
            .into_iter()
            .map(|r| r.uri)
            .collect();
        assert_eq!(uris, vec!["/a", "/b", "/c"]);

        Ok(())
    }

    #[test]
    fn test_exists_by_uri() -> Result<()> {
        let store = test_store();

        assert!(!store.exists_by_uri("/library")?);
        store.save_root(&new_root("/library", 0))?;
        assert!(store.exists_by_uri("/library")?);

        Ok(())
    }

    #[test]
    fn test_duplicate_uri_rejected_by_constraint() -> Result<()> {
        let store = test_store();

        store.save_root(&new_root("/library", 0))?;
        assert!(store.save_root(&new_root("/library", 1)).is_err());

        Ok(())
    }

    #[test]
    fn test_auto_sync_filter() -> Result<()> {
        let store = test_store();

        store.save_root(&new_root("/on", 0))?;
        let mut off = new_root("/off", 1);
        off.auto_sync = false;
        store.save_root(&off)?;

        let roots = store.get_auto_sync_roots()?;
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].uri, "/on");

        Ok(())
    }

    #[test]
    fn test_update_scan_info() -> Result<()> {
        let store = test_store();
        let root = store.save_root(&new_root("/library", 0))?;

        let now = Utc::now();
        assert!(store.update_scan_info(root.id, 42, now)?);

        let fetched = store.get_root_by_id(root.id)?.unwrap();
        assert_eq!(fetched.comic_count, 42);
        assert_eq!(fetched.last_scan_at, Some(now));

        Ok(())
    }
}
