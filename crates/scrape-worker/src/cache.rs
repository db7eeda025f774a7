//! Cache management for fetched metadata.
//!
//! Responses from the metadata source are cached permanently on disk so
//! re-scrapes of the same comic never hit the network again.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use shared::models::ScrapeType;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Cache manager for metadata responses
pub struct CacheManager {
    /// Root cache directory
    cache_dir: PathBuf,
    /// Whether caching is enabled
    enabled: bool,
}

impl CacheManager {
    /// Create a new cache manager
    pub fn new(cache_dir: impl AsRef<Path>, enabled: bool) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();

        if enabled {
            std::fs::create_dir_all(&cache_dir).with_context(|| {
                format!("Failed to create cache directory: {}", cache_dir.display())
            })?;
            info!(cache_dir = %cache_dir.display(), "Cache initialized");
        }

        Ok(Self { cache_dir, enabled })
    }

    /// Cache key for a comic's metadata of one scrape type
    pub fn key_for(scrape_type: ScrapeType, comic_id: i64) -> String {
        format!("{}/{}", scrape_type, comic_id)
    }

    /// Get a cached item if it exists
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        if !self.enabled {
            return Ok(None);
        }

        let path = self.cache_path(key);
        if !path.exists() {
            debug!(key = key, "Cache miss");
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", path.display()))?;

        let data: T = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache file: {}", path.display()))?;

        debug!(key = key, "Cache hit");
        Ok(Some(data))
    }

    /// Store an item in the cache
    pub fn set<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let path = self.cache_path(key);

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache subdirectory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(data)
            .context("Failed to serialize cache data")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write cache file: {}", path.display()))?;

        debug!(key = key, path = %path.display(), "Cache stored");
        Ok(())
    }

    /// Check if a cache entry exists
    pub fn exists(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }
        self.cache_path(key).exists()
    }

    /// Get the cache file path for a given key
    fn cache_path(&self, key: &str) -> PathBuf {
        // Keys use '/' for subdirectories; everything else unsafe becomes '_'
        let mut path = self.cache_dir.clone();
        for part in key.split('/') {
            let safe = part.replace(['\\', ':', '*', '?', '"', '<', '>', '|'], "_");
            path.push(safe);
        }
        path.set_extension("json");
        path
    }

    /// Clear all cache
    pub fn clear(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.cache_dir.exists() {
            std::fs::remove_dir_all(&self.cache_dir).with_context(|| {
                format!("Failed to remove cache directory: {}", self.cache_dir.display())
            })?;
            std::fs::create_dir_all(&self.cache_dir).with_context(|| {
                format!("Failed to recreate cache directory: {}", self.cache_dir.display())
            })?;
            info!("Cache cleared");
        }

        Ok(())
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats> {
        if !self.enabled || !self.cache_dir.exists() {
            return Ok(CacheStats {
                total_files: 0,
                total_size_bytes: 0,
            });
        }

        let mut stats = CacheStats {
            total_files: 0,
            total_size_bytes: 0,
        };
        count_files(&self.cache_dir, &mut stats)?;
        Ok(stats)
    }
}

fn count_files(dir: &Path, stats: &mut CacheStats) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            count_files(&path, stats)?;
        } else {
            stats.total_files += 1;
            stats.total_size_bytes += entry.metadata()?.len();
        }
    }
    Ok(())
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_files: usize,
    pub total_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::ComicMetadata;
    use tempfile::TempDir;

    fn sample_metadata() -> ComicMetadata {
        ComicMetadata {
            title: Some("Sample".to_string()),
            summary: None,
            authors: vec!["Author".to_string()],
            tags: vec![],
            cover_url: None,
            chapters: vec![],
        }
    }

    #[test]
    fn test_cache_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let cache = CacheManager::new(temp_dir.path(), true)?;
        let key = CacheManager::key_for(ScrapeType::Details, 42);

        cache.set(&key, &sample_metadata())?;
        assert!(cache.exists(&key));

        let retrieved: Option<ComicMetadata> = cache.get(&key)?;
        assert_eq!(retrieved.unwrap().title.as_deref(), Some("Sample"));

        Ok(())
    }

    #[test]
    fn test_cache_disabled() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let cache = CacheManager::new(temp_dir.path(), false)?;
        let key = CacheManager::key_for(ScrapeType::Details, 42);

        // Store should succeed but do nothing
        cache.set(&key, &sample_metadata())?;
        assert!(!cache.exists(&key));

        let retrieved: Option<ComicMetadata> = cache.get(&key)?;
        assert!(retrieved.is_none());

        Ok(())
    }

    #[test]
    fn test_keys_are_namespaced_by_type() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let cache = CacheManager::new(temp_dir.path(), true)?;

        cache.set(&CacheManager::key_for(ScrapeType::Details, 1), &sample_metadata())?;
        cache.set(&CacheManager::key_for(ScrapeType::Cover, 1), &sample_metadata())?;

        let stats = cache.stats()?;
        assert_eq!(stats.total_files, 2);

        Ok(())
    }

    #[test]
    fn test_clear() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let cache = CacheManager::new(temp_dir.path(), true)?;
        let key = CacheManager::key_for(ScrapeType::Details, 7);

        cache.set(&key, &sample_metadata())?;
        cache.clear()?;

        assert!(!cache.exists(&key));
        assert_eq!(cache.stats()?.total_files, 0);

        Ok(())
    }
}
