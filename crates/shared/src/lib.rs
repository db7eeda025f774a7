//! Shared library for the comicdex catalog application.
//!
//! This crate provides common functionality used by the scanner and the
//! scrape worker binaries:
//! - Configuration management
//! - Database wrapper and schema
//! - Data models and error taxonomy
//! - Persisted root and catalog stores
//! - The scrape task queue
//! - Logging infrastructure

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod queue;
pub mod roots;

// Re-export commonly used types
pub use catalog::{CatalogStore, SqliteCatalog};
pub use config::Config;
pub use db::{Database, SharedDatabase};
pub use error::LibraryError;
pub use logging::LogConfig;
pub use models::*;
pub use queue::{QueueEvent, TaskQueue};
pub use roots::RootStore;

/// Common result type using anyhow::Error
pub type Result<T> = anyhow::Result<T>;
