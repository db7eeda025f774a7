//! Data models for the catalog.
//!
//! This module defines the data structures shared across the scanner and the
//! scrape worker: library roots, catalog entries, scrape tasks and the
//! aggregates derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-registered storage location that is periodically scanned for comics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryRoot {
    pub id: i64,
    /// Unique across all roots; duplicate registration is rejected.
    pub uri: String,
    pub source: RootSource,
    /// Stable ordering key for display.
    pub sort_key: i64,
    pub auto_sync: bool,
    pub permission: PermissionState,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub comic_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A root to be registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRoot {
    pub uri: String,
    pub source: RootSource,
    pub sort_key: i64,
    pub auto_sync: bool,
}

/// Kind of storage backing a root.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RootSource {
    Local,
    Cloud,
}

impl std::fmt::Display for RootSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RootSource::Local => write!(f, "local"),
            RootSource::Cloud => write!(f, "cloud"),
        }
    }
}

impl std::str::FromStr for RootSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(RootSource::Local),
            "cloud" => Ok(RootSource::Cloud),
            _ => Err(anyhow::anyhow!("Invalid root source: {}", s)),
        }
    }
}

/// Current grant state of a root, as last reported by the permission probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Revoked,
    Unknown,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Revoked => write!(f, "revoked"),
            PermissionState::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for PermissionState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "granted" => Ok(PermissionState::Granted),
            "revoked" => Ok(PermissionState::Revoked),
            "unknown" => Ok(PermissionState::Unknown),
            _ => Err(anyhow::anyhow!("Invalid permission state: {}", s)),
        }
    }
}

/// Scan depth.
///
/// `Full` re-validates every enumerable item under a root; `Incremental`
/// only considers items changed since the root's last successful scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Full,
    Incremental,
}

/// What started a scan. Manual scans outrank background syncs in the
/// priority of the tasks they enqueue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanTrigger {
    Manual,
    Automatic,
}

/// Kind of metadata a scrape task fetches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeType {
    Details,
    Cover,
    Chapters,
}

impl std::fmt::Display for ScrapeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeType::Details => write!(f, "details"),
            ScrapeType::Cover => write!(f, "cover"),
            ScrapeType::Chapters => write!(f, "chapters"),
        }
    }
}

impl std::str::FromStr for ScrapeType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "details" => Ok(ScrapeType::Details),
            "cover" => Ok(ScrapeType::Cover),
            "chapters" => Ok(ScrapeType::Chapters),
            _ => Err(anyhow::anyhow!("Invalid scrape type: {}", s)),
        }
    }
}

/// Lifecycle state of a scrape task.
///
/// Transitions are one-directional: pending -> running -> completed | failed.
/// A failed task goes back to pending only through an explicit retry pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    /// Terminal states receive no further automatic transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "running" => Ok(TaskState::Running),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            _ => Err(anyhow::anyhow!("Invalid task state: {}", s)),
        }
    }
}

/// Classification recorded alongside a failed task.
///
/// Only `Transient` failures are eligible for the retry pass; `Fatal` and
/// `Cancelled` are permanent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskErrorKind {
    Transient,
    Fatal,
    Cancelled,
}

impl std::fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskErrorKind::Transient => write!(f, "transient"),
            TaskErrorKind::Fatal => write!(f, "fatal"),
            TaskErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskErrorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(TaskErrorKind::Transient),
            "fatal" => Ok(TaskErrorKind::Fatal),
            "cancelled" => Ok(TaskErrorKind::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid error kind: {}", s)),
        }
    }
}

/// A scrape task: fetch one kind of metadata for one comic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeTask {
    pub id: i64,
    pub comic_id: i64,
    /// Denormalized for display and log lines.
    pub comic_title: String,
    pub scrape_type: ScrapeType,
    /// Higher is more urgent.
    pub priority: i32,
    pub state: TaskState,
    pub retry_count: u32,
    pub error_kind: Option<TaskErrorKind>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A task to be enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub comic_id: i64,
    pub comic_title: String,
    pub scrape_type: ScrapeType,
    pub priority: i32,
}

/// Per-state task counts, computed fresh on each call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    /// Failed tasks, cancelled ones excluded.
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

/// Outcome of scanning a single root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub root_id: i64,
    pub success: bool,
    pub new_count: usize,
    pub updated_count: usize,
    pub removed_count: usize,
    pub new_chapter_count: usize,
    /// Root-level failure only; per-comic scrape failures live on the tasks.
    pub error: Option<String>,
}

impl ScanResult {
    pub fn failure(root_id: i64, error: impl Into<String>) -> Self {
        Self {
            root_id,
            success: false,
            new_count: 0,
            updated_count: 0,
            removed_count: 0,
            new_chapter_count: 0,
            error: Some(error.into()),
        }
    }
}

/// A catalog row for one comic under a root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComicEntry {
    pub id: i64,
    pub root_id: i64,
    /// Identity of the item within its root, as reported by the enumerator.
    pub item_uri: String,
    pub title: String,
    /// Opaque change signal; a different signature means the item changed.
    pub signature: String,
    pub chapter_count: i64,
    /// Soft-delete flag set when the item disappears from a full scan.
    pub removed: bool,
    pub scraped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One item produced by the enumeration collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumeratedItem {
    pub item_uri: String,
    pub title: String,
    pub signature: String,
    pub chapter_count: i64,
    pub modified_at: DateTime<Utc>,
}

/// Metadata fetched for a comic by the scrape worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComicMetadata {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub authors: Vec<String>,
    pub tags: Vec<String>,
    pub cover_url: Option<String>,
    pub chapters: Vec<ChapterInfo>,
}

/// A single chapter as reported by the metadata source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub number: u32,
    pub title: Option<String>,
}
