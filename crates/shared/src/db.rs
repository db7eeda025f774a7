//! Database operations for SQLite.
//!
//! This module handles all database connections, schema creation, and migrations.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Shared handle to one connection; the mutex is the serialization point
/// for every check-and-set the stores perform.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_new = !path.exists();

        debug!(path = %path.display(), "Opening database");

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        Self::configure(conn, is_new)
    }

    /// Open an in-memory database (tests)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::configure(conn, true)
    }

    fn configure(conn: Connection, is_new: bool) -> Result<Self> {
        // Enable foreign keys
        conn.execute("PRAGMA foreign_keys = ON", [])
            .context("Failed to enable foreign keys")?;

        // The scanner and the worker may hold the file at the same time
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        let mut db = Self { conn };

        if is_new {
            info!("Creating new database schema");
            db.create_schema()?;
        } else {
            debug!("Database already exists");
            // Run migrations for existing databases
            db.run_migrations()?;
        }

        Ok(db)
    }

    /// Create the database schema
    fn create_schema(&mut self) -> Result<()> {
        self.conn
            .execute_batch(include_str!("../schema.sql"))
            .context("Failed to create database schema")?;

        info!("Database schema created successfully");
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Get a mutable reference to the underlying connection
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Check if a table exists
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Check if a column exists on a table
    pub fn column_exists(&self, table_name: &str, column_name: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", table_name))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name == column_name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Get the database version (from user_version pragma)
    pub fn get_version(&self) -> Result<i32> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    /// Set the database version
    pub fn set_version(&self, version: i32) -> Result<()> {
        self.conn
            .execute(&format!("PRAGMA user_version = {}", version), [])?;
        Ok(())
    }

    /// Run migrations for existing databases
    fn run_migrations(&mut self) -> Result<()> {
        // Re-run the schema batch first: every statement is IF NOT EXISTS,
        // so a database created by an older build picks up new tables.
        self.conn
            .execute_batch(include_str!("../schema.sql"))
            .context("Failed to refresh database schema")?;

        // Databases created before failure classification lack error_kind
        if !self.column_exists("tasks", "error_kind")? {
            info!("Running migration: adding tasks.error_kind");
            self.conn
                .execute_batch(
                    "ALTER TABLE tasks ADD COLUMN error_kind TEXT
                         CHECK(error_kind IN ('transient', 'fatal', 'cancelled'));",
                )
                .context("Failed to add tasks.error_kind column")?;
            info!("Migration completed: tasks.error_kind added");
        }

        Ok(())
    }

    /// Begin a transaction
    pub fn begin_transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        self.conn.transaction().context("Failed to begin transaction")
    }

    /// Wrap the database in the shared handle used by the stores
    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_database() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("test.db");

        let db = Database::open(&db_path)?;
        assert!(db_path.exists());

        // Check that tables were created
        assert!(db.table_exists("roots")?);
        assert!(db.table_exists("comics")?);
        assert!(db.table_exists("tasks")?);

        Ok(())
    }

    #[test]
    fn test_reopen_runs_migrations() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("test.db");

        drop(Database::open(&db_path)?);
        let db = Database::open(&db_path)?;

        assert!(db.column_exists("tasks", "error_kind")?);

        Ok(())
    }

    #[test]
    fn test_version() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("test.db");

        let db = Database::open(&db_path)?;

        let version = db.get_version()?;
        assert_eq!(version, 0); // Default version

        db.set_version(1)?;
        assert_eq!(db.get_version()?, 1);

        Ok(())
    }
}
