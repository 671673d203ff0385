//! Strata Cache - Multi-Layer Cache Manager
//!
//! A cache manager that fronts several named storage layers (memory, Redis,
//! filesystem) with one API for reads, writes, cache-aside loading,
//! write-through and write-behind persistence, tag invalidation and warming.
//! An edge delivery manager optimizes assets and caches them at CDN providers.
//!
//! # Modules
//!
//! - [`cache`]: Cache manager, layers, strategies, metrics and events
//! - [`cdn`]: Edge delivery manager, providers and path rules
//! - [`config`]: Configuration from environment or YAML
//! - [`error`]: Error types and handling

pub mod cache;
pub mod cdn;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheEvent, CacheHealthStatus, CacheLayer, CacheManager, CacheMetricsSnapshot, CacheStrategy,
    DeleteOptions, GetOptions, GetOrSetOptions, HealthStatus, LayerInfo, LayerKind, SetOptions,
    StrategyKind, WarmEntry, WarmReport,
};

pub use cdn::{Asset, CdnEvent, CdnManager, CdnProvider, ContentRequest, EdgeCacheOptions};

pub use config::{CacheManagerConfig, CdnConfig, LayersConfig};

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
