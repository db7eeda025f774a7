//! Metadata API client with rate limiting and retry logic.

use crate::cache::CacheManager;
use crate::fetcher::{FetchError, MetadataFetcher};
use crate::rate_limiter::RateLimiter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shared::models::{ComicMetadata, ScrapeType};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// HTTP client for the comic metadata API
pub struct MetadataClient {
    /// HTTP client
    client: Client,
    /// Base URL for the metadata API
    base_url: String,
    /// Rate limiter shared across workers
    rate_limiter: RateLimiter,
    /// Response cache
    cache: CacheManager,
    /// Extra in-attempt retries for transient statuses
    max_attempts: u32,
    /// Base delay for retry (exponential backoff)
    retry_delay_ms: u64,
}

impl MetadataClient {
    /// Create a new metadata client
    pub fn new(
        base_url: String,
        requests_per_second: f64,
        requests_per_minute: u32,
        max_attempts: u32,
        retry_delay_ms: u64,
        cache: CacheManager,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("comicdex-scrape-worker/0.1.0")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            rate_limiter: RateLimiter::new(requests_per_second, requests_per_minute),
            cache,
            max_attempts,
            retry_delay_ms,
        })
    }

    fn endpoint(&self, scrape_type: ScrapeType) -> String {
        match scrape_type {
            ScrapeType::Details => format!("{}/comics/details", self.base_url),
            ScrapeType::Cover => format!("{}/comics/cover", self.base_url),
            ScrapeType::Chapters => format!("{}/comics/chapters", self.base_url),
        }
    }

    /// Make the lookup request, classifying failures
    async fn get_metadata(&self, url: &str, title: &str) -> Result<ComicMetadata, FetchError> {
        for attempt in 0..=self.max_attempts {
            // Apply rate limiting before each request
            self.rate_limiter.acquire().await;

            debug!(url = %url, title = title, attempt = attempt + 1, "Making API request");

            let response = match self
                .client
                .get(url)
                .query(&[("title", title)])
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, error = %e, "Request error");
                    if attempt < self.max_attempts {
                        let delay =
                            Duration::from_millis(self.retry_delay_ms * 2u64.pow(attempt));
                        debug!(delay_ms = delay.as_millis(), "Retrying after delay");
                        sleep(delay).await;
                        continue;
                    }
                    return Err(FetchError::Transient(format!("request failed: {}", e)));
                }
            };

            let status = response.status();

            if status.is_success() {
                return match response.json::<ComicMetadata>().await {
                    Ok(data) => {
                        debug!(url = %url, "Request successful");
                        Ok(data)
                    }
                    Err(e) => Err(FetchError::Fatal(format!(
                        "malformed metadata payload: {}",
                        e
                    ))),
                };
            }

            if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                // The remote answered: this item does not exist
                return Err(FetchError::Fatal(format!(
                    "remote has no entry for '{}' ({})",
                    title, status
                )));
            }

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                warn!(url = %url, status = %status, "Retryable response status");
                if attempt < self.max_attempts {
                    let delay = Duration::from_millis(self.retry_delay_ms * 2u64.pow(attempt));
                    debug!(delay_ms = delay.as_millis(), "Retrying after delay");
                    sleep(delay).await;
                    continue;
                }
                return Err(FetchError::Transient(format!(
                    "remote kept answering {} for '{}'",
                    status, title
                )));
            }

            // Any other client error is not going to get better on retry
            return Err(FetchError::Fatal(format!(
                "request rejected with status {}",
                status
            )));
        }

        Err(FetchError::Transient(format!(
            "request to {} exhausted {} attempts",
            url,
            self.max_attempts + 1
        )))
    }
}

#[async_trait]
impl MetadataFetcher for MetadataClient {
    async fn fetch(
        &self,
        comic_id: i64,
        title: &str,
        scrape_type: ScrapeType,
    ) -> Result<ComicMetadata, FetchError> {
        let key = CacheManager::key_for(scrape_type, comic_id);

        // Cache failures are non-fatal; fall through to the network
        match self.cache.get::<ComicMetadata>(&key) {
            Ok(Some(cached)) => {
                debug!(comic_id, scrape_type = %scrape_type, "Serving metadata from cache");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => warn!(comic_id, error = %e, "Cache read failed"),
        }

        let url = self.endpoint(scrape_type);
        let metadata = self.get_metadata(&url, title).await?;

        if let Err(e) = self.cache.set(&key, &metadata) {
            warn!(comic_id, error = %e, "Cache write failed");
        }

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn client_with_cache(temp_dir: &TempDir, base_url: &str) -> MetadataClient {
        MetadataClient::new(
            base_url.to_string(),
            1000.0,
            10_000,
            0,
            1,
            CacheManager::new(temp_dir.path(), true).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() -> Result<()> {
        let temp_dir = TempDir::new()?;
        // Nothing listens here; only the cache can answer
        let client = client_with_cache(&temp_dir, "http://127.0.0.1:1");

        let cached = ComicMetadata {
            title: Some("Cached".to_string()),
            ..Default::default()
        };
        client
            .cache
            .set(&CacheManager::key_for(ScrapeType::Details, 9), &cached)?;

        let fetched = client.fetch(9, "Cached", ScrapeType::Details).await.unwrap();
        assert_eq!(fetched.title.as_deref(), Some("Cached"));

        Ok(())
    }

    #[tokio::test]
    async fn test_connection_error_is_transient() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let client = client_with_cache(&temp_dir, "http://127.0.0.1:1");

        match client.fetch(1, "Unreachable", ScrapeType::Details).await {
            Err(FetchError::Transient(_)) => {}
            other => panic!("expected transient failure, got {:?}", other.map(|m| m.title)),
        }

        Ok(())
    }
}
