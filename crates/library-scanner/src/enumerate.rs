//! Enumeration collaborator.
//!
//! The scan coordinator consumes `(item, change signal, modified time)`
//! sequences through the `ItemEnumerator` trait and never walks storage
//! itself. The local implementation here treats a top-level directory under
//! the root as one comic (its archive files are chapters) and a bare archive
//! file as a single-chapter comic.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{EnumeratedItem, LibraryRoot};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Produces the items currently present under a root.
///
/// When `since` is given, only items whose change signal is newer need to be
/// returned; this is what makes incremental scans cheap.
#[async_trait]
pub trait ItemEnumerator: Send + Sync {
    async fn enumerate(
        &self,
        root: &LibraryRoot,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EnumeratedItem>>;
}

/// Local filesystem enumerator.
pub struct LocalEnumerator {
    extensions: Vec<String>,
}

impl LocalEnumerator {
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }
}

#[async_trait]
impl ItemEnumerator for LocalEnumerator {
    async fn enumerate(
        &self,
        root: &LibraryRoot,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EnumeratedItem>> {
        let root_path = PathBuf::from(&root.uri);
        let extensions = self.extensions.clone();
        let root_id = root.id;

        let mut items = tokio::task::spawn_blocking(move || {
            enumerate_dir(&root_path, &extensions)
        })
        .await??;

        if let Some(since) = since {
            items.retain(|item| item.modified_at > since);
        }

        debug!(root_id, items = items.len(), "Enumerated root");
        Ok(items)
    }
}

fn enumerate_dir(root: &Path, extensions: &[String]) -> Result<Vec<EnumeratedItem>> {
    let mut items = Vec::new();

    let entries = std::fs::read_dir(root)
        .with_context(|| format!("Failed to enumerate root {}", root.display()))?;

    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", path.display()))?;

        let item = if metadata.is_dir() {
            let stats = collect_archive_stats(&path, extensions)?;
            if stats.count == 0 {
                continue;
            }
            EnumeratedItem {
                item_uri: name.clone(),
                title: name,
                signature: stats.signature(),
                chapter_count: stats.count,
                modified_at: stats.modified_at(),
            }
        } else if has_archive_extension(&path, extensions) {
            let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let stats = ArchiveStats {
                count: 1,
                total_size: metadata.len(),
                latest_mtime: mtime,
            };
            EnumeratedItem {
                item_uri: name.clone(),
                title: title_from_filename(&name),
                signature: stats.signature(),
                chapter_count: 1,
                modified_at: stats.modified_at(),
            }
        } else {
            continue;
        };

        items.push(item);
    }

    Ok(items)
}

/// Aggregate over the archive files of one comic directory.
struct ArchiveStats {
    count: i64,
    total_size: u64,
    latest_mtime: SystemTime,
}

impl ArchiveStats {
    fn signature(&self) -> String {
        format!(
            "{}:{}:{}",
            self.count,
            self.total_size,
            self.modified_at().timestamp_millis()
        )
    }

    fn modified_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.latest_mtime)
    }
}

fn collect_archive_stats(dir: &Path, extensions: &[String]) -> Result<ArchiveStats> {
    let mut stats = ArchiveStats {
        count: 0,
        total_size: 0,
        latest_mtime: SystemTime::UNIX_EPOCH,
    };

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?;

    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", path.display()))?;

        if metadata.is_dir() {
            let nested = collect_archive_stats(&path, extensions)?;
            stats.count += nested.count;
            stats.total_size += nested.total_size;
            if nested.latest_mtime > stats.latest_mtime {
                stats.latest_mtime = nested.latest_mtime;
            }
        } else if has_archive_extension(&path, extensions) {
            stats.count += 1;
            stats.total_size += metadata.len();
            let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if mtime > stats.latest_mtime {
                stats.latest_mtime = mtime;
            }
        }
    }

    Ok(stats)
}

fn has_archive_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|known| known.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn title_from_filename(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{PermissionState, RootSource};

    fn root_for(dir: &Path) -> LibraryRoot {
        LibraryRoot {
            id: 1,
            uri: dir.to_string_lossy().into_owned(),
            source: RootSource::Local,
            sort_key: 0,
            auto_sync: true,
            permission: PermissionState::Granted,
            last_scan_at: None,
            comic_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn enumerator() -> LocalEnumerator {
        LocalEnumerator::new(vec!["cbz".to_string(), "cbr".to_string()])
    }

    #[tokio::test]
    async fn test_enumerates_files_and_series_dirs() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        std::fs::write(dir.path().join("one-shot.cbz"), b"x")?;
        std::fs::write(dir.path().join("notes.txt"), b"x")?;
        let series = dir.path().join("Long Series");
        std::fs::create_dir(&series)?;
        std::fs::write(series.join("ch01.cbz"), b"xx")?;
        std::fs::write(series.join("ch02.cbr"), b"xx")?;

        let mut items = enumerator().enumerate(&root_for(dir.path()), None).await?;
        items.sort_by(|a, b| a.item_uri.cmp(&b.item_uri));

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_uri, "Long Series");
        assert_eq!(items[0].chapter_count, 2);
        assert_eq!(items[1].item_uri, "one-shot.cbz");
        assert_eq!(items[1].title, "one-shot");
        assert_eq!(items[1].chapter_count, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_signature_tracks_content_change() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let series = dir.path().join("Series");
        std::fs::create_dir(&series)?;
        std::fs::write(series.join("ch01.cbz"), b"xx")?;

        let before = enumerator().enumerate(&root_for(dir.path()), None).await?;
        std::fs::write(series.join("ch02.cbz"), b"yy")?;
        let after = enumerator().enumerate(&root_for(dir.path()), None).await?;

        assert_ne!(before[0].signature, after[0].signature);
        assert_eq!(after[0].chapter_count, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_since_filters_unchanged_items() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        std::fs::write(dir.path().join("old.cbz"), b"x")?;

        let all = enumerator().enumerate(&root_for(dir.path()), None).await?;
        assert_eq!(all.len(), 1);

        let since = all[0].modified_at + chrono::Duration::seconds(1);
        let filtered = enumerator()
            .enumerate(&root_for(dir.path()), Some(since))
            .await?;
        assert!(filtered.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_root_fails() {
        let root = root_for(Path::new("/does/not/exist"));
        assert!(enumerator().enumerate(&root, None).await.is_err());
    }
}
