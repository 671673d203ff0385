//! Cache Storage Backends
//!
//! Implementations of the cache layer contract: in-process memory,
//! Redis and the local filesystem.

mod filesystem;
mod memory;
mod redis;

pub use self::filesystem::{FileSystemCache, FileSystemCacheConfig};
pub use self::memory::{MemoryCache, MemoryCacheConfig};
pub use self::redis::{RedisCache, RedisCacheConfig};

use crate::cache::entry::CacheData;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Layer Kind
// =============================================================================

/// Backend family of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Memory,
    Redis,
    #[serde(rename = "fs")]
    FileSystem,
    /// Layers registered by callers
    Custom,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Memory => write!(f, "memory"),
            LayerKind::Redis => write!(f, "redis"),
            LayerKind::FileSystem => write!(f, "fs"),
            LayerKind::Custom => write!(f, "custom"),
        }
    }
}

// =============================================================================
// CacheLayer Trait
// =============================================================================

/// Contract every cache backend implements
///
/// Layers store already-encoded [`CacheData`]; serialization and compression
/// happen in the manager. An `Err` means the backend itself failed; a
/// missing or expired key is `Ok(None)`.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Backend family
    fn kind(&self) -> LayerKind;

    /// Get a live value
    async fn get(&self, key: &str) -> Result<Option<CacheData>>;

    /// Insert or overwrite a value expiring `ttl` from now
    async fn set(&self, key: &str, data: CacheData, ttl: Duration) -> Result<bool>;

    /// Remove a value; deleting an absent key is not an error
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every value owned by this layer
    async fn clear(&self) -> Result<()>;

    /// Sweep expired values, returning how many were removed
    async fn cleanup(&self) -> Result<u64>;

    /// Current entry count (approximate for remote backends)
    fn size(&self) -> u64;

    /// Entry bound, `None` when unbounded
    fn max_size(&self) -> Option<u64> {
        None
    }

    /// Most recent read or write
    fn last_accessed(&self) -> Option<DateTime<Utc>>;

    /// Native batch support, if any
    fn as_batch(&self) -> Option<&dyn BatchCacheLayer> {
        None
    }

    /// Release connections and other resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Multi-key operations a backend can perform in one round trip
#[async_trait]
pub trait BatchCacheLayer: Send + Sync {
    /// Get several values; the result is aligned with `keys`
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheData>>>;

    /// Set several values with a shared TTL
    async fn set_many(&self, entries: Vec<(String, CacheData)>, ttl: Duration) -> Result<bool>;
}

/// Shared handle to a layer
pub type SharedCacheLayer = Arc<dyn CacheLayer>;

impl fmt::Debug for dyn CacheLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLayer")
            .field("kind", &self.kind())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;

    /// Helper to create uncompressed test data
    pub fn test_data(value: &str) -> CacheData {
        CacheData::uncompressed(Bytes::copy_from_slice(value.as_bytes()))
    }

    #[test]
    fn test_layer_kind_names() {
        assert_eq!(LayerKind::FileSystem.to_string(), "fs");
        assert_eq!(serde_json::to_value(LayerKind::FileSystem).unwrap(), "fs");
        assert_eq!(serde_json::to_value(LayerKind::Memory).unwrap(), "memory");
    }
}
