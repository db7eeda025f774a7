//! Persisted comic catalog.
//!
//! The scan coordinator diffs enumerations against this store and the
//! executor writes fetched metadata back into it. Both sides go through the
//! `CatalogStore` trait so tests can substitute an in-memory double.

use crate::db::SharedDatabase;
use crate::models::{ComicEntry, ComicMetadata, EnumeratedItem};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

/// Read/write contract the orchestration core holds on the catalog.
pub trait CatalogStore: Send + Sync {
    /// Snapshot of every comic recorded under a root, removed ones included.
    fn comics_under_root(&self, root_id: i64) -> Result<Vec<ComicEntry>>;

    /// Ids only; used for cascade cancellation on root deletion.
    fn comic_ids_under_root(&self, root_id: i64) -> Result<Vec<i64>>;

    /// Number of live (non-removed) comics under a root.
    fn count_comics(&self, root_id: i64) -> Result<i64>;

    /// Insert a newly discovered item, or return the existing id if the
    /// (root, item uri) pair is already recorded.
    fn insert_comic(&self, root_id: i64, item: &EnumeratedItem) -> Result<i64>;

    /// Refresh signature, title and chapter count for a changed item and
    /// clear its removed flag.
    fn update_entry(&self, comic_id: i64, item: &EnumeratedItem) -> Result<bool>;

    /// Soft-delete: the item vanished from a full enumeration.
    fn mark_removed(&self, comic_id: i64) -> Result<bool>;

    /// Persist scraped metadata for a comic.
    fn apply_metadata(&self, comic_id: i64, metadata: &ComicMetadata) -> Result<bool>;

    fn get_comic(&self, comic_id: i64) -> Result<Option<ComicEntry>>;
}

/// Catalog store over the shared database handle
#[derive(Clone)]
pub struct SqliteCatalog {
    db: SharedDatabase,
}

impl SqliteCatalog {
    /// Create a new catalog with the given database
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

impl CatalogStore for SqliteCatalog {
    fn comics_under_root(&self, root_id: i64) -> Result<Vec<ComicEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .conn()
            .prepare("SELECT * FROM comics WHERE root_id = ?1 ORDER BY id ASC")?;
        let comics = stmt
            .query_map(params![root_id], row_to_comic)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comics)
    }

    fn comic_ids_under_root(&self, root_id: i64) -> Result<Vec<i64>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .conn()
            .prepare("SELECT id FROM comics WHERE root_id = ?1")?;
        let ids = stmt
            .query_map(params![root_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn count_comics(&self, root_id: i64) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.conn().query_row(
            "SELECT COUNT(*) FROM comics WHERE root_id = ?1 AND removed = 0",
            params![root_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn insert_comic(&self, root_id: i64, item: &EnumeratedItem) -> Result<i64> {
        let db = self.db.lock().unwrap();

        // Try to find an existing entry first
        let existing_id: Option<i64> = db
            .conn()
            .query_row(
                "SELECT id FROM comics WHERE root_id = ?1 AND item_uri = ?2",
                params![root_id, item.item_uri],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query for existing comic")?;

        if let Some(id) = existing_id {
            debug!(comic_id = id, item_uri = %item.item_uri, "Comic already recorded");
            return Ok(id);
        }

        let now = Utc::now();
        db.conn()
            .execute(
                "INSERT INTO comics (root_id, item_uri, title, signature, chapter_count,
                                     removed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
                params![
                    root_id,
                    item.item_uri,
                    item.title,
                    item.signature,
                    item.chapter_count,
                    now,
                ],
            )
            .context("Failed to insert comic")?;

        let id = db.conn().last_insert_rowid();
        info!(comic_id = id, title = %item.title, "Recorded new comic");

        Ok(id)
    }

    fn update_entry(&self, comic_id: i64, item: &EnumeratedItem) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let updated = db
            .conn()
            .execute(
                "UPDATE comics SET title = ?1, signature = ?2, chapter_count = ?3,
                                   removed = 0, updated_at = ?4
                 WHERE id = ?5",
                params![item.title, item.signature, item.chapter_count, Utc::now(), comic_id],
            )
            .context("Failed to update comic entry")?;
        Ok(updated > 0)
    }

    fn mark_removed(&self, comic_id: i64) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let updated = db
            .conn()
            .execute(
                "UPDATE comics SET removed = 1, updated_at = ?1 WHERE id = ?2",
                params![Utc::now(), comic_id],
            )
            .context("Failed to mark comic removed")?;

        if updated > 0 {
            debug!(comic_id, "Marked comic removed");
        }
        Ok(updated > 0)
    }

    fn apply_metadata(&self, comic_id: i64, metadata: &ComicMetadata) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let now = Utc::now();

        let updated = db
            .conn()
            .execute(
                "UPDATE comics SET
                     title = COALESCE(?1, title),
                     summary = ?2,
                     authors = ?3,
                     tags = ?4,
                     cover_url = ?5,
                     chapter_count = MAX(chapter_count, ?6),
                     scraped_at = ?7,
                     updated_at = ?7
                 WHERE id = ?8",
                params![
                    metadata.title,
                    metadata.summary,
                    serde_json::to_string(&metadata.authors)?,
                    serde_json::to_string(&metadata.tags)?,
                    metadata.cover_url,
                    metadata.chapters.len() as i64,
                    now,
                    comic_id,
                ],
            )
            .context("Failed to apply metadata")?;

        debug!(comic_id, applied = updated > 0, "Applied scraped metadata");
        Ok(updated > 0)
    }

    fn get_comic(&self, comic_id: i64) -> Result<Option<ComicEntry>> {
        let db = self.db.lock().unwrap();
        db.conn()
            .query_row(
                "SELECT * FROM comics WHERE id = ?1",
                params![comic_id],
                row_to_comic,
            )
            .optional()
            .context("Failed to query comic by id")
    }
}

/// Helper: Convert a database row to a ComicEntry
fn row_to_comic(row: &rusqlite::Row) -> rusqlite::Result<ComicEntry> {
    Ok(ComicEntry {
        id: row.get(0)?,
        root_id: row.get(1)?,
        item_uri: row.get(2)?,
        title: row.get(3)?,
        signature: row.get(4)?,
        chapter_count: row.get(5)?,
        removed: row.get(6)?,
        scraped_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}
