//! Metadata fetch collaborator.
//!
//! The executor talks to the remote metadata source through this trait and
//! never sees transport details; what it does see is the transient/fatal
//! classification that decides retry eligibility.

use async_trait::async_trait;
use shared::models::{ComicMetadata, ScrapeType, TaskErrorKind};
use thiserror::Error;

/// Classified fetch failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network or remote hiccup; eligible for a later retry pass.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// The remote answered definitively; retrying cannot help.
    #[error("fatal scrape failure: {0}")]
    Fatal(String),
}

impl FetchError {
    /// The error kind recorded on the failed task.
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            FetchError::Transient(_) => TaskErrorKind::Transient,
            FetchError::Fatal(_) => TaskErrorKind::Fatal,
        }
    }
}

/// Fetches one kind of metadata for one comic.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(
        &self,
        comic_id: i64,
        title: &str,
        scrape_type: ScrapeType,
    ) -> Result<ComicMetadata, FetchError>;
}
