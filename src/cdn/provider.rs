//! Edge Providers
//!
//! The contract an edge network implements, and the in-process provider
//! registered as `default`.

use crate::cache::health::HealthStatus;
use crate::cache::metrics::hit_rate;
use crate::cdn::asset::Asset;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Name of the provider every manager starts with
pub const DEFAULT_PROVIDER: &str = "default";

/// Purge pattern matching every key
pub const PURGE_ALL: &str = "*";

// =============================================================================
// Requests and Reports
// =============================================================================

/// How an asset is stored at the edge
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeWrite {
    pub ttl: Duration,
    pub regions: Vec<String>,
    pub tags: Vec<String>,
}

/// Purge selection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurgeOptions {
    /// Provider to purge; the configured default when `None`
    pub provider: Option<String>,
    /// Empty means every region
    pub regions: Vec<String>,
    /// Entries carrying any of these tags are purged as well
    pub tags: Vec<String>,
    pub recursive: bool,
}

impl PurgeOptions {
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of one provider health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub healthy: bool,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Traffic counters reported by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub name: String,
    pub status: HealthStatus,
    /// Percentage of edge lookups that hit
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
    pub total_requests: u64,
    pub errors: u64,
    /// Assets currently held, when the provider knows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<u64>,
}

// =============================================================================
// CdnProvider Trait
// =============================================================================

/// Contract every edge network implements
///
/// An `Err` means the provider itself failed; a key that is absent or
/// expired at the edge is `Ok(None)`.
#[async_trait]
pub trait CdnProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Store an asset under `key`
    async fn cache(&self, key: &str, asset: &Asset, write: &EdgeWrite) -> Result<bool>;

    /// Fetch a live asset
    async fn get(&self, key: &str) -> Result<Option<Asset>>;

    /// Invalidate keys containing `pattern` (`*` for all) and entries
    /// carrying any of `options.tags`
    async fn purge(&self, pattern: &str, options: &PurgeOptions) -> Result<bool>;

    async fn health_check(&self) -> Result<ProviderHealth>;

    fn stats(&self) -> ProviderStats;
}

/// Shared handle to a provider
pub type SharedCdnProvider = Arc<dyn CdnProvider>;

impl fmt::Debug for dyn CdnProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdnProvider")
            .field("name", &self.name())
            .finish()
    }
}

// =============================================================================
// In-Process Provider
// =============================================================================

struct EdgeEntry {
    asset: Asset,
    tags: Vec<String>,
    expires_at: DateTime<Utc>,
}

impl EdgeEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Single-region edge cache held in process memory
///
/// Expired entries are dropped when read. Regions are accepted and ignored.
pub struct InProcessProvider {
    name: String,
    entries: DashMap<String, EdgeEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    lookup_micros: AtomicU64,
}

impl Default for InProcessProvider {
    fn default() -> Self {
        Self::new(DEFAULT_PROVIDER)
    }
}

impl InProcessProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            lookup_micros: AtomicU64::new(0),
        }
    }

    /// Entries held, expired ones included until read
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn record_lookup(&self, hit: bool, started: Instant) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        self.lookup_micros.fetch_add(
            u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }
}

#[async_trait]
impl CdnProvider for InProcessProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn cache(&self, key: &str, asset: &Asset, write: &EdgeWrite) -> Result<bool> {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(write.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries.insert(
            key.to_string(),
            EdgeEntry {
                asset: asset.clone(),
                tags: write.tags.clone(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Asset>> {
        let started = Instant::now();
        let now = Utc::now();

        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let asset = entry.asset.clone();
                drop(entry);
                self.record_lookup(true, started);
                return Ok(Some(asset));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        self.record_lookup(false, started);
        Ok(None)
    }

    async fn purge(&self, pattern: &str, options: &PurgeOptions) -> Result<bool> {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let by_key = pattern == PURGE_ALL || (!pattern.is_empty() && key.contains(pattern));
            let by_tag = entry.tags.iter().any(|tag| options.tags.contains(tag));
            !(by_key || by_tag)
        });
        debug!(
            provider = %self.name,
            pattern = %pattern,
            removed = before.saturating_sub(self.entries.len()),
            "Purged edge entries"
        );
        Ok(true)
    }

    async fn health_check(&self) -> Result<ProviderHealth> {
        Ok(ProviderHealth {
            healthy: true,
            latency_ms: 0.0,
            error: None,
        })
    }

    fn stats(&self) -> ProviderStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            self.lookup_micros.load(Ordering::Relaxed) as f64 / total as f64 / 1000.0
        };

        ProviderStats {
            name: self.name.clone(),
            status: HealthStatus::Healthy,
            cache_hit_rate: hit_rate(hits, misses),
            avg_latency_ms,
            total_requests: total,
            errors: 0,
            entries: Some(self.entries.len() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(ttl: Duration, tags: &[&str]) -> EdgeWrite {
        EdgeWrite {
            ttl,
            regions: vec!["global".to_string()],
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_cache_and_get() {
        let provider = InProcessProvider::default();
        let asset = Asset::new("/app.js", "run()");

        let stored = provider
            .cache("/app.js", &asset, &write(Duration::from_secs(60), &[]))
            .await
            .unwrap();
        assert!(stored);
        assert_eq!(provider.get("/app.js").await.unwrap(), Some(asset));
        assert_eq!(provider.get("/other.js").await.unwrap(), None);

        let stats = provider.stats();
        assert_eq!(stats.name, "default");
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cache_hit_rate, 50.0);
        assert_eq!(stats.entries, Some(1));
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped_on_read() {
        let provider = InProcessProvider::default();
        let asset = Asset::new("/old.css", "a{}");

        provider.cache("/old.css", &asset, &write(Duration::ZERO, &[])).await.unwrap();
        assert_eq!(provider.len(), 1);

        assert_eq!(provider.get("/old.css").await.unwrap(), None);
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_purge_by_key_and_tag() {
        let provider = InProcessProvider::default();
        let ttl = Duration::from_secs(60);
        for (path, tags) in [
            ("/api/users", &["api"][..]),
            ("/api/orders", &["api"][..]),
            ("/static/app.js", &["js", "static"][..]),
            ("/index.html", &["html"][..]),
        ] {
            provider.cache(path, &Asset::new(path, "x"), &write(ttl, tags)).await.unwrap();
        }

        provider.purge("/api/", &PurgeOptions::default()).await.unwrap();
        assert_eq!(provider.len(), 2);

        // An empty pattern purges by tag only
        provider
            .purge("", &PurgeOptions::default().tags(["static"]))
            .await
            .unwrap();
        assert!(provider.get("/static/app.js").await.unwrap().is_none());
        assert!(provider.get("/index.html").await.unwrap().is_some());

        provider.purge(PURGE_ALL, &PurgeOptions::default()).await.unwrap();
        assert!(provider.is_empty());
    }
}
