//! Redis Layer
//!
//! Shared remote cache. Entries are JSON [`StoredEntry`] documents under a
//! key prefix, expired by Redis itself via `PX`.

use crate::cache::entry::{CacheData, StoredEntry};
use crate::cache::storage::{BatchCacheLayer, CacheLayer, LayerKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 100;

// =============================================================================
// Redis Cache Configuration
// =============================================================================

/// Configuration for the Redis layer
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Connection URL (`redis://host:port/db`)
    pub url: String,
    /// Prefix applied to every key
    pub key_prefix: String,
    /// Time allowed to establish the connection
    pub connect_timeout: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "cache:".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Redis Cache
// =============================================================================

/// Remote layer over a multiplexed Redis connection
pub struct RedisCache {
    client: redis::Client,
    config: RedisCacheConfig,
    /// Opened on first use and shared by all callers
    connection: Mutex<Option<MultiplexedConnection>>,
    closed: AtomicBool,
    /// Key count as of the last cleanup sweep
    approx_size: AtomicU64,
    /// Last access (Unix millis, 0 = never)
    last_access_ms: AtomicI64,
}

impl RedisCache {
    /// Create the layer; the connection is opened lazily
    pub fn new(config: RedisCacheConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            config,
            connection: Mutex::new(None),
            closed: AtomicBool::new(false),
            approx_size: AtomicU64::new(0),
            last_access_ms: AtomicI64::new(0),
        })
    }

    /// Create with the default prefix
    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisCacheConfig {
            url: url.into(),
            ..Default::default()
        })
    }

    fn unavailable() -> Error {
        Error::BackendUnavailable {
            backend: "redis".to_string(),
        }
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::unavailable());
        }
        let cached = self.connection.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let conn = tokio::time::timeout(
            self.config.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Self::unavailable())??;

        info!(url = %self.config.url, "Connected to Redis cache");
        *self.connection.lock() = Some(conn.clone());
        Ok(conn)
    }

    /// Build the full key with prefix
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn decode(&self, key: &str, raw: Option<Vec<u8>>) -> Result<Option<CacheData>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let stored: StoredEntry = serde_json::from_slice(&raw)?;
        if stored.key != key || stored.is_expired() {
            return Ok(None);
        }
        Ok(Some(stored.into_data()))
    }

    fn encode(key: &str, data: &CacheData, ttl: Duration) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&StoredEntry::new(key, data, ttl))?)
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }

    /// SCAN every key under the prefix, feeding each page to `page`
    async fn scan_prefix(
        &self,
        conn: &mut MultiplexedConnection,
        mut page: impl FnMut(Vec<String>) -> Option<Vec<String>>,
    ) -> Result<u64> {
        let pattern = format!("{}*", self.config.key_prefix);
        let mut cursor: u64 = 0;
        let mut total = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(conn)
                .await?;

            total += keys.len() as u64;
            if let Some(to_delete) = page(keys) {
                if !to_delete.is_empty() {
                    let _: i64 = conn.del(&to_delete).await?;
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(total)
    }

    fn touch(&self) {
        self.last_access_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

#[async_trait]
impl CacheLayer for RedisCache {
    fn kind(&self) -> LayerKind {
        LayerKind::Redis
    }

    async fn get(&self, key: &str) -> Result<Option<CacheData>> {
        let mut conn = self.conn().await?;
        let raw: Option<Vec<u8>> = conn.get(self.full_key(key)).await?;
        let data = self.decode(key, raw)?;
        if data.is_some() {
            self.touch();
        }
        Ok(data)
    }

    async fn set(&self, key: &str, data: CacheData, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let body = Self::encode(key, &data, ttl)?;

        let _: () = redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(body)
            .arg("PX")
            .arg(Self::ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        self.touch();
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = conn.del(self.full_key(key)).await?;
        Ok(deleted > 0)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let deleted = self.scan_prefix(&mut conn, Some).await?;
        self.approx_size.store(0, Ordering::Relaxed);
        info!(deleted, "Cleared Redis cache entries");
        Ok(())
    }

    async fn cleanup(&self) -> Result<u64> {
        // Redis expires entries itself; only refresh the key count
        let mut conn = self.conn().await?;
        let count = self.scan_prefix(&mut conn, |_| None).await?;
        self.approx_size.store(count, Ordering::Relaxed);
        debug!(keys = count, "Refreshed Redis key count");
        Ok(0)
    }

    fn size(&self) -> u64 {
        self.approx_size.load(Ordering::Relaxed)
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

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.connection.lock().take();
        Ok(())
    }
}

#[async_trait]
impl BatchCacheLayer for RedisCache {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheData>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let full_keys: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();

        let raw: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(&full_keys)
            .query_async(&mut conn)
            .await?;

        let values = keys
            .iter()
            .zip(raw)
            .map(|(key, raw)| self.decode(key, raw).unwrap_or(None))
            .collect::<Vec<_>>();
        if values.iter().any(Option::is_some) {
            self.touch();
        }
        Ok(values)
    }

    async fn set_many(&self, entries: Vec<(String, CacheData)>, ttl: Duration) -> Result<bool> {
        if entries.is_empty() {
            return Ok(true);
        }
        let mut conn = self.conn().await?;
        let ttl_ms = Self::ttl_millis(ttl);

        let mut pipe = redis::pipe();
        for (key, data) in &entries {
            pipe.cmd("SET")
                .arg(self.full_key(key))
                .arg(Self::encode(key, data, ttl)?)
                .arg("PX")
                .arg(ttl_ms)
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        self.touch();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::tests::test_data;
    use assert_matches::assert_matches;

    #[test]
    fn test_invalid_url_is_rejected() {
        assert_matches!(RedisCache::with_url("not a redis url").err(), Some(Error::Redis(_)));
    }

    #[test]
    fn test_key_prefix() {
        let cache = RedisCache::new(RedisCacheConfig {
            key_prefix: "app:".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cache.full_key("user:1"), "app:user:1");
        assert_eq!(cache.kind(), LayerKind::Redis);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_ttl_is_at_least_one_millisecond() {
        assert_eq!(RedisCache::ttl_millis(Duration::ZERO), 1);
        assert_eq!(RedisCache::ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[tokio::test]
    async fn test_closed_layer_is_unavailable() {
        let cache = RedisCache::with_url("redis://127.0.0.1:6379").unwrap();
        cache.close().await.unwrap();

        assert_matches!(
            cache.get("user:1").await,
            Err(Error::BackendUnavailable { .. })
        );
        assert_matches!(
            cache.set("user:1", test_data("1"), Duration::from_secs(1)).await,
            Err(Error::BackendUnavailable { .. })
        );
    }

    #[test]
    fn test_decode_rejects_foreign_key() {
        let cache = RedisCache::with_url("redis://127.0.0.1:6379").unwrap();
        let body = RedisCache::encode("a", &test_data("1"), Duration::from_secs(60)).unwrap();

        assert!(cache.decode("a", Some(body.clone())).unwrap().is_some());
        assert!(cache.decode("b", Some(body)).unwrap().is_none());
        assert!(cache.decode("a", None).unwrap().is_none());
    }
}
