//! Edge Delivery
//!
//! Optimizes assets and stores them at edge providers, driven by path rules:
//! - **rules**: glob-matched cache rules (TTL, browser caching, tags) and
//!   optimization rules (minification, compression, image techniques)
//! - **providers**: edge networks behind the [`CdnProvider`] trait; an
//!   in-process provider is registered as `default`
//! - **delivery**: edge lookup with origin fallback, then optimize and cache
//!
//! # Usage
//!
//! ```ignore
//! use strata_cache::cdn::{Asset, CdnManager, ContentRequest, EdgeCacheOptions};
//! use strata_cache::config::CdnConfig;
//!
//! let cdn = CdnManager::new(CdnConfig::default())?;
//!
//! cdn.warm_cache(vec![Asset::new("/static/app.js", bundle)], &EdgeCacheOptions::default())
//!     .await?;
//!
//! let response = cdn
//!     .deliver_content(&ContentRequest::new("/index.html"), || async { load_page().await })
//!     .await?;
//! ```

pub mod asset;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod provider;
pub mod rules;

pub use asset::{
    Asset, AssetOptimizer, AssetType, DefaultOptimizer, OptimizationReport, OptimizedAsset,
    Technique,
};
pub use events::CdnEvent;
pub use manager::{
    CdnHealthStatus, CdnManager, ContentRequest, ContentResponse, ContentSource, EdgeCacheOptions,
};
pub use metrics::{CdnMetrics, CdnMetricsSnapshot};
pub use provider::{
    CdnProvider, EdgeWrite, InProcessProvider, ProviderHealth, ProviderStats, PurgeOptions,
    SharedCdnProvider,
};
pub use rules::{CacheRule, EdgeCachePolicy, OptimizationRule, RuleSet};
