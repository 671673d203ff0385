//! In-Memory Layer
//!
//! Bounded in-process cache with lazy TTL expiry and true LRU eviction.

use crate::cache::entry::{CacheData, CacheEntry};
use crate::cache::lru::LruIndex;
use crate::cache::storage::{BatchCacheLayer, CacheLayer, LayerKind};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Memory Cache Configuration
// =============================================================================

/// Configuration for the memory layer
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries
    pub max_size: usize,
    /// TTL used by callers that do not pass one
    pub default_ttl: Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

// =============================================================================
// Memory Cache
// =============================================================================

/// In-process layer backed by an [`LruIndex`]
pub struct MemoryCache {
    index: Mutex<LruIndex>,
    max_size: usize,
    default_ttl: Duration,
    evictions: AtomicU64,
    /// Last access (Unix millis, 0 = never)
    last_access_ms: AtomicI64,
}

impl MemoryCache {
    /// Create with default config
    pub fn new() -> Self {
        Self::with_config(MemoryCacheConfig::default())
    }

    /// Create with a given entry bound
    pub fn with_max_size(max_size: usize) -> Self {
        Self::with_config(MemoryCacheConfig {
            max_size,
            ..Default::default()
        })
    }

    /// Create with full config
    pub fn with_config(config: MemoryCacheConfig) -> Self {
        Self {
            index: Mutex::new(LruIndex::new()),
            max_size: config.max_size.max(1),
            default_ttl: config.default_ttl,
            evictions: AtomicU64::new(0),
            last_access_ms: AtomicI64::new(0),
        }
    }

    /// Default TTL for this layer
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Total stored bytes
    pub fn size_bytes(&self) -> u64 {
        self.index.lock().total_bytes()
    }

    /// Number of entries evicted to make room
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.last_access_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }

    fn get_locked(index: &mut LruIndex, key: &str, now: DateTime<Utc>) -> Option<CacheData> {
        index.get(key, now).map(|entry| entry.data.clone())
    }

    fn insert_locked(&self, index: &mut LruIndex, key: String, data: CacheData, ttl: Duration) {
        if !index.contains(&key) {
            while index.len() >= self.max_size {
                match index.evict_lru() {
                    Some((evicted, _)) => {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        debug!(key = %evicted, "Evicted least recently used entry");
                    }
                    None => break,
                }
            }
        }
        index.insert(key, CacheEntry::new(data, ttl));
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheLayer for MemoryCache {
    fn kind(&self) -> LayerKind {
        LayerKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<CacheData>> {
        let now = Utc::now();
        let data = Self::get_locked(&mut self.index.lock(), key, now);
        if data.is_some() {
            self.touch(now);
        }
        Ok(data)
    }

    async fn set(&self, key: &str, data: CacheData, ttl: Duration) -> Result<bool> {
        self.insert_locked(&mut self.index.lock(), key.to_string(), data, ttl);
        self.touch(Utc::now());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.index.lock().remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.index.lock().clear();
        Ok(())
    }

    async fn cleanup(&self) -> Result<u64> {
        let removed = self.index.lock().remove_expired(Utc::now());
        if removed > 0 {
            debug!(removed, "Memory layer removed expired entries");
        }
        Ok(removed)
    }

    fn size(&self) -> u64 {
        self.index.lock().len() as u64
    }

    fn max_size(&self) -> Option<u64> {
        Some(self.max_size as u64)
    }

    fn last_accessed(&self) -> Option<DateTime<Utc>> {
        match self.last_access_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    fn as_batch(&self) -> Option<&dyn BatchCacheLayer> {
        Some(self)
    }
}

#[async_trait]
impl BatchCacheLayer for MemoryCache {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheData>>> {
        let now = Utc::now();
        let values: Vec<Option<CacheData>> = {
            let mut index = self.index.lock();
            keys.iter()
                .map(|key| Self::get_locked(&mut index, key, now))
                .collect()
        };
        if values.iter().any(Option::is_some) {
            self.touch(now);
        }
        Ok(values)
    }

    async fn set_many(&self, entries: Vec<(String, CacheData)>, ttl: Duration) -> Result<bool> {
        {
            let mut index = self.index.lock();
            for (key, data) in entries {
                self.insert_locked(&mut index, key, data, ttl);
            }
        }
        self.touch(Utc::now());
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================
