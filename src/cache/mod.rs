//! Multi-Layer Caching System
//!
//! Named cache layers behind a single manager:
//! - **memory**: bounded in-process LRU map
//! - **redis**: shared remote store, registered when a URL is configured
//! - **fs**: one file per key on local disk
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Cache Manager                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  get / set / delete / get_or_set / write_through / write_behind / tags  │
//! │         │                                                               │
//! │  ┌──────┴───────┐   ┌──────────────┐   ┌──────────────┐                 │
//! │  │ serde_json + │   │   Metrics    │   │    Events    │                 │
//! │  │ compression  │   │ (per layer)  │   │ (broadcast)  │                 │
//! │  └──────┬───────┘   └──────────────┘   └──────────────┘                 │
//! │         │                                                               │
//! │  ┌──────┴───────┐  ┌──────────────┐  ┌──────────────────────────────┐   │
//! │  │    memory    │  │    redis     │  │             fs               │   │
//! │  │  (LRU+TTL)   │  │  (SET PX)    │  │   (<sanitized key>.cache)    │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────────────────┘   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  • Per-call layer selection      • Background propagation to layers    │
//! │  • Stale fallback on fetch error • Periodic expiry sweep               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use strata_cache::cache::{CacheManager, GetOptions, SetOptions};
//! use std::time::Duration;
//!
//! let cache = CacheManager::new().await?;
//!
//! cache.set("user:1", &user, SetOptions::default().ttl(Duration::from_secs(60))).await?;
//! let user: Option<User> = cache.get("user:1", GetOptions::default()).await?;
//!
//! let user: User = cache
//!     .get_or_set("user:2", || async { load_user(2).await }, Default::default())
//!     .await?;
//!
//! cache.destroy().await;
//! ```

pub mod compression;
pub mod entry;
pub mod events;
pub mod health;
pub mod lru;
pub mod manager;
pub mod metrics;
pub mod options;
pub mod storage;
pub mod strategy;

pub use compression::{CompressionConfig, CompressionManager};
pub use entry::{CacheData, CacheEntry, CompressionAlgorithm, StoredEntry};
pub use events::{CacheEvent, MissReason};
pub use health::{CacheHealthStatus, HealthStatus, LayerHealth, LayerInfo};
pub use manager::{CacheManager, WarmEntry, WarmReport};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use options::{DeleteOptions, GetOptions, GetOrSetOptions, SetOptions};
pub use storage::{
    BatchCacheLayer, CacheLayer, FileSystemCache, FileSystemCacheConfig, LayerKind, MemoryCache,
    MemoryCacheConfig, RedisCache, RedisCacheConfig, SharedCacheLayer,
};
pub use strategy::{CacheStrategy, Loader, StrategyKind, Writer};
