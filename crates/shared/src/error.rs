//! Domain error taxonomy.
//!
//! Storage plumbing stays on `anyhow` with context; the cases callers need
//! to match on are spelled out here.

use thiserror::Error;

/// Errors surfaced by the registry and the scan coordinator.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("root {0} not found")]
    RootNotFound(i64),

    #[error("task {0} not found")]
    TaskNotFound(i64),

    #[error("root uri already registered: {0}")]
    DuplicateRoot(String),

    #[error("access to root {0} has been revoked")]
    PermissionDenied(i64),

    #[error("a scan is already running for root {0}")]
    ScanInProgress(i64),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
