//! CDN Manager
//!
//! Optimizes assets, stores them at registered edge providers according to
//! the cache rules, purges and pre-warms the edge, and serves content from
//! the edge with an origin fallback.

use crate::cache::health::HealthStatus;
use crate::cache::manager::WarmReport;
use crate::cdn::asset::{
    Asset, AssetOptimizer, DefaultOptimizer, OptimizationReport, OptimizedAsset, Technique,
};
use crate::cdn::events::CdnEvent;
use crate::cdn::metrics::{CdnMetrics, CdnMetricsSnapshot};
use crate::cdn::provider::{
    EdgeWrite, InProcessProvider, ProviderHealth, ProviderStats, PurgeOptions, SharedCdnProvider,
    DEFAULT_PROVIDER,
};
use crate::cdn::rules::{CacheRule, OptimizationRule, RuleSet};
use crate::config::CdnConfig;
use crate::error::{Error, Result};
use chrono::Utc;
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Region used when a write names none
pub const GLOBAL_REGION: &str = "global";

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Edge key of `path` under the given variations (`path|dim=value|...`)
fn edge_key(path: &str, vary_by: &[(String, String)]) -> String {
    vary_by
        .iter()
        .fold(path.to_string(), |key, (dim, value)| format!("{}|{}={}", key, dim, value))
}

// =============================================================================
// Options
// =============================================================================

/// Where and how to store an asset at the edge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeCacheOptions {
    /// Provider name; the configured default when `None`
    pub provider: Option<String>,
    /// `global` when empty
    pub regions: Vec<String>,
    /// Added to the tags of the matching cache rule
    pub tags: Vec<String>,
    /// Request dimensions the stored variant depends on
    pub vary_by: Vec<(String, String)>,
}

impl EdgeCacheOptions {
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

    pub fn vary(mut self, dimension: impl Into<String>, value: impl Into<String>) -> Self {
        self.vary_by.push((dimension.into(), value.into()));
        self
    }
}

/// A request for content at `path`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentRequest {
    pub path: String,
    /// Provider to serve from; the configured default when `None`
    pub provider: Option<String>,
    /// Variant selection, e.g. `("accept-encoding", "zstd")`
    pub vary_by: Vec<(String, String)>,
}

impl ContentRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn vary(mut self, dimension: impl Into<String>, value: impl Into<String>) -> Self {
        self.vary_by.push((dimension.into(), value.into()));
        self
    }
}

/// Where delivered content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Edge,
    Origin,
}

/// Delivered content
#[derive(Debug, Clone, PartialEq)]
pub struct ContentResponse {
    pub asset: Asset,
    pub source: ContentSource,
    pub latency_ms: f64,
}

/// Aggregated provider health
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnHealthStatus {
    pub status: HealthStatus,
    pub providers: IndexMap<String, ProviderHealth>,
    pub issues: Vec<String>,
}

impl CdnHealthStatus {
    /// Degraded when any provider is unhealthy, unhealthy when all are
    ///
    /// An empty registry cannot serve anything and is unhealthy.
    pub fn from_providers(providers: IndexMap<String, ProviderHealth>, issues: Vec<String>) -> Self {
        let unhealthy = providers.values().filter(|h| !h.healthy).count();
        let status = if unhealthy == providers.len() {
            HealthStatus::Unhealthy
        } else if unhealthy > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            providers,
            issues,
        }
    }
}

// =============================================================================
// CDN Manager
// =============================================================================

/// Edge delivery over a registry of providers
pub struct CdnManager {
    config: CdnConfig,
    providers: RwLock<IndexMap<String, SharedCdnProvider>>,
    rules: RwLock<RuleSet>,
    optimizer: Arc<dyn AssetOptimizer>,
    metrics: CdnMetrics,
    events: broadcast::Sender<CdnEvent>,
}

impl CdnManager {
    /// Create with the default rules, optimizer and in-process provider
    pub fn new(config: CdnConfig) -> Result<Self> {
        Self::with_optimizer(config, Arc::new(DefaultOptimizer::default()))
    }

    pub fn with_optimizer(config: CdnConfig, optimizer: Arc<dyn AssetOptimizer>) -> Result<Self> {
        config.validate()?;

        let rules = RuleSet::defaults(&config)?;
        let (events, _) = broadcast::channel(config.event_channel_capacity);

        let mut providers: IndexMap<String, SharedCdnProvider> = IndexMap::new();
        providers.insert(
            DEFAULT_PROVIDER.to_string(),
            Arc::new(InProcessProvider::default()),
        );

        info!(
            default_provider = %config.default_provider,
            minification = config.enable_minification,
            image_optimization = config.enable_image_optimization,
            compression = config.enable_compression,
            "CDN manager initialized"
        );

        Ok(Self {
            config,
            providers: RwLock::new(providers),
            rules: RwLock::new(rules),
            optimizer,
            metrics: CdnMetrics::new(),
            events,
        })
    }

    fn emit(&self, event: CdnEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Registry
    // =========================================================================

    pub fn config(&self) -> &CdnConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CdnEvent> {
        self.events.subscribe()
    }

    /// Register (or replace) a provider under its name
    pub fn register_provider(&self, provider: SharedCdnProvider) {
        let name = provider.name().to_string();
        info!(provider = %name, "Registered CDN provider");
        self.providers.write().insert(name, provider);
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    pub fn add_cache_rule(&self, rule: CacheRule) {
        self.rules.write().add_cache_rule(rule);
    }

    pub fn add_optimization_rule(&self, rule: OptimizationRule) {
        self.rules.write().add_optimization_rule(rule);
    }

    fn provider(&self, name: Option<&str>) -> Result<SharedCdnProvider> {
        let name = name.unwrap_or(&self.config.default_provider);
        self.providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound {
                provider: name.to_string(),
            })
    }

    fn snapshot(&self) -> Vec<(String, SharedCdnProvider)> {
        self.providers
            .read()
            .iter()
            .map(|(name, provider)| (name.clone(), provider.clone()))
            .collect()
    }

    // =========================================================================
    // Optimization
    // =========================================================================

    /// Apply the matching optimization rules and attach caching headers
    ///
    /// A failing optimizer never fails the call: the original content is
    /// returned with headers and the error in the report.
    pub async fn optimize_asset(&self, asset: &Asset) -> OptimizedAsset {
        let started = Instant::now();

        let mut techniques = self.rules.read().techniques_for(&asset.path);
        if !self.config.enable_compression {
            techniques.retain(|t| *t != Technique::Compression);
        }

        match self.optimizer.optimize(asset, &techniques).await {
            Ok((mut optimized, applied)) => {
                let headers = self.rules.read().cache_headers(&optimized, Utc::now());
                optimized.headers.extend(headers);

                let mut report =
                    OptimizationReport::new(asset.size(), optimized.size(), elapsed_ms(started));
                report.techniques = applied;

                self.metrics.record_optimization(
                    asset.asset_type.as_str(),
                    report.savings,
                    started.elapsed(),
                );
                debug!(
                    path = %asset.path,
                    savings = report.savings,
                    techniques = ?report.techniques,
                    "Asset optimized"
                );
                self.emit(CdnEvent::AssetOptimized {
                    path: asset.path.clone(),
                    savings: report.savings,
                });

                OptimizedAsset {
                    asset: optimized,
                    optimization: report,
                }
            }
            Err(err) => {
                self.metrics.record_error(asset.asset_type.as_str());
                warn!(path = %asset.path, error = %err, "Asset optimization failed, serving original");
                self.emit(CdnEvent::OptimizationFailed {
                    path: asset.path.clone(),
                    error: err.to_string(),
                });

                let mut original = asset.clone();
                let headers = self.rules.read().cache_headers(asset, Utc::now());
                original.headers.extend(headers);

                let mut report =
                    OptimizationReport::new(asset.size(), asset.size(), elapsed_ms(started));
                report.error = Some(format!("{:#}", err));

                OptimizedAsset {
                    asset: original,
                    optimization: report,
                }
            }
        }
    }

    // =========================================================================
    // Edge Operations
    // =========================================================================

    /// Store an asset at a provider with the TTL and tags of its cache rule
    ///
    /// Unknown providers are an error. Provider failures are recorded and
    /// reported as `false`.
    pub async fn cache_at_edge(&self, asset: &Asset, options: &EdgeCacheOptions) -> Result<bool> {
        let provider = self.provider(options.provider.as_deref())?;
        let policy = self.rules.read().resolve(&asset.path);
        let key = edge_key(&asset.path, &options.vary_by);

        let mut tags = policy.tags;
        for tag in &options.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        let regions = if options.regions.is_empty() {
            vec![GLOBAL_REGION.to_string()]
        } else {
            options.regions.clone()
        };
        let write = EdgeWrite {
            ttl: policy.ttl,
            regions,
            tags,
        };

        match provider.cache(&key, asset, &write).await {
            Ok(stored) => {
                if stored {
                    self.metrics.record_edge_set();
                    debug!(key = %key, provider = %provider.name(), ttl = ?write.ttl, "Cached at edge");
                    self.emit(CdnEvent::EdgeCached {
                        key,
                        provider: provider.name().to_string(),
                    });
                }
                Ok(stored)
            }
            Err(err) => {
                self.metrics.record_error("cache");
                warn!(key = %key, provider = %provider.name(), error = %err, "Edge cache write failed");
                self.emit(CdnEvent::EdgeCacheFailed {
                    path: asset.path.clone(),
                    provider: provider.name().to_string(),
                    error: err.to_string(),
                });
                Ok(false)
            }
        }
    }

    /// Invalidate edge keys containing `pattern` (`*` for all) and entries
    /// tagged with any of `options.tags`
    pub async fn purge_cache(&self, pattern: &str, options: &PurgeOptions) -> Result<bool> {
        let provider = self.provider(options.provider.as_deref())?;

        match provider.purge(pattern, options).await {
            Ok(purged) => {
                if purged {
                    info!(pattern = %pattern, provider = %provider.name(), "Purged edge cache");
                    self.emit(CdnEvent::Purged {
                        pattern: pattern.to_string(),
                        provider: provider.name().to_string(),
                    });
                }
                Ok(purged)
            }
            Err(err) => {
                self.metrics.record_error("purge");
                warn!(pattern = %pattern, provider = %provider.name(), error = %err, "Edge purge failed");
                self.emit(CdnEvent::PurgeFailed {
                    pattern: pattern.to_string(),
                    provider: provider.name().to_string(),
                    error: err.to_string(),
                });
                Ok(false)
            }
        }
    }

    /// Optimize and store every asset concurrently
    ///
    /// One asset failing does not affect the others; the report lists the
    /// paths on each side.
    pub async fn warm_cache(
        &self,
        assets: Vec<Asset>,
        options: &EdgeCacheOptions,
    ) -> Result<WarmReport> {
        self.provider(options.provider.as_deref())?;

        let jobs = assets.into_iter().map(|asset| async move {
            let optimized = self.optimize_asset(&asset).await;
            let outcome = match self.cache_at_edge(&optimized.asset, options).await {
                Ok(true) => Ok(()),
                Ok(false) => Err("edge cache write was not stored".to_string()),
                Err(err) => Err(err.to_string()),
            };
            (asset.path, outcome)
        });

        let mut report = WarmReport::default();
        for (path, outcome) in join_all(jobs).await {
            match outcome {
                Ok(()) => {
                    self.emit(CdnEvent::Warmed { path: path.clone() });
                    report.warmed.push(path);
                }
                Err(error) => {
                    warn!(path = %path, error = %error, "Edge warming failed for asset");
                    self.emit(CdnEvent::WarmFailed {
                        path: path.clone(),
                        error: error.clone(),
                    });
                    report.failed.push((path, error));
                }
            }
        }

        info!(
            warmed = report.warmed.len(),
            failed = report.failed.len(),
            "Edge warming finished"
        );
        Ok(report)
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Serve from the edge, or fetch from origin, optimize and cache
    ///
    /// Edge read failures count as a miss. Origin failures are returned.
    pub async fn deliver_content<F, Fut>(
        &self,
        request: &ContentRequest,
        fetch: F,
    ) -> Result<ContentResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Asset>>,
    {
        let started = Instant::now();
        let provider = self.provider(request.provider.as_deref())?;
        let key = edge_key(&request.path, &request.vary_by);

        match provider.get(&key).await {
            Ok(Some(asset)) => {
                self.metrics.record_hit();
                self.emit(CdnEvent::ContentHit {
                    path: request.path.clone(),
                });
                return Ok(ContentResponse {
                    asset,
                    source: ContentSource::Edge,
                    latency_ms: elapsed_ms(started),
                });
            }
            Ok(None) => {}
            Err(err) => {
                self.metrics.record_error("get");
                warn!(key = %key, provider = %provider.name(), error = %err, "Edge read failed, going to origin");
            }
        }

        let content = match fetch().await {
            Ok(content) => content,
            Err(source) => {
                error!(path = %request.path, error = %source, "Origin fetch failed");
                self.emit(CdnEvent::DeliveryFailed {
                    path: request.path.clone(),
                    error: format!("{:#}", source),
                });
                return Err(Error::fetch(request.path.clone(), source));
            }
        };

        let optimized = self.optimize_asset(&content).await;
        let options = EdgeCacheOptions {
            provider: Some(provider.name().to_string()),
            regions: vec![GLOBAL_REGION.to_string()],
            tags: content.default_tags(),
            vary_by: request.vary_by.clone(),
        };
        // Stored under the request path, which the origin may have normalized
        let mut stored = optimized.asset.clone();
        stored.path = request.path.clone();
        self.cache_at_edge(&stored, &options).await?;

        self.metrics.record_miss();
        self.emit(CdnEvent::ContentMiss {
            path: request.path.clone(),
        });

        Ok(ContentResponse {
            asset: optimized.asset,
            source: ContentSource::Origin,
            latency_ms: elapsed_ms(started),
        })
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn get_metrics(&self) -> CdnMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn provider_stats(&self) -> IndexMap<String, ProviderStats> {
        self.snapshot()
            .into_iter()
            .map(|(name, provider)| {
                let stats = provider.stats();
                (name, stats)
            })
            .collect()
    }

    /// Check every provider concurrently
    pub async fn health_check(&self) -> CdnHealthStatus {
        let checks = self.snapshot().into_iter().map(|(name, provider)| async move {
            let started = Instant::now();
            let result = provider.health_check().await;
            (name, result, elapsed_ms(started))
        });

        let mut providers = IndexMap::new();
        let mut issues = Vec::new();
        for (name, result, latency_ms) in join_all(checks).await {
            let health = match result {
                Ok(health) => {
                    if !health.healthy {
                        issues.push(format!(
                            "Provider '{}' is unhealthy: {}",
                            name,
                            health.error.as_deref().unwrap_or("no reason given")
                        ));
                    }
                    health
                }
                Err(err) => {
                    issues.push(format!("Provider '{}' health check failed: {}", name, err));
                    ProviderHealth {
                        healthy: false,
                        latency_ms,
                        error: Some(err.to_string()),
                    }
                }
            };
            providers.insert(name, health);
        }

        let health = CdnHealthStatus::from_providers(providers, issues);
        if health.status != HealthStatus::Healthy {
            warn!(status = %health.status, issues = ?health.issues, "CDN providers not healthy");
        }
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdn::asset::CONTENT_ENCODING;
    use crate::cdn::rules::STATIC_ASSET_TTL;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use crate::cdn::provider::CdnProvider;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_cdn() -> CdnManager {
        CdnManager::new(CdnConfig::default()).unwrap()
    }

    /// Records writes and fails those whose key contains `fail_on`
    struct RecordingProvider {
        name: &'static str,
        fail_on: Option<&'static str>,
        healthy: bool,
        writes: Mutex<Vec<(String, EdgeWrite)>>,
    }

    impl RecordingProvider {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                fail_on: None,
                healthy: true,
                writes: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(mut self, fragment: &'static str) -> Self {
            self.fail_on = Some(fragment);
            self
        }

        fn unhealthy(mut self) -> Self {
            self.healthy = false;
            self
        }
    }

    fn provider_down() -> Error {
        Error::BackendUnavailable {
            backend: "edge".into(),
        }
    }

    #[async_trait]
    impl CdnProvider for RecordingProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn cache(&self, key: &str, _asset: &Asset, write: &EdgeWrite) -> Result<bool> {
            if self.fail_on.is_some_and(|fragment| key.contains(fragment)) {
                return Err(provider_down());
            }
            self.writes.lock().push((key.to_string(), write.clone()));
            Ok(true)
        }

        async fn get(&self, _key: &str) -> Result<Option<Asset>> {
            Err(provider_down())
        }

        async fn purge(&self, _pattern: &str, _options: &PurgeOptions) -> Result<bool> {
            Err(provider_down())
        }

        async fn health_check(&self) -> Result<ProviderHealth> {
            if self.healthy {
                Ok(ProviderHealth {
                    healthy: true,
                    latency_ms: 1.0,
                    error: None,
                })
            } else {
                Ok(ProviderHealth {
                    healthy: false,
                    latency_ms: 1.0,
                    error: Some("origin shield offline".into()),
                })
            }
        }

        fn stats(&self) -> ProviderStats {
            ProviderStats {
                name: self.name.to_string(),
                status: if self.healthy {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                },
                cache_hit_rate: 0.0,
                avg_latency_ms: 1.0,
                total_requests: 0,
                errors: 0,
                entries: None,
            }
        }
    }

    /// Rejects every asset
    struct FailingOptimizer;

    #[async_trait]
    impl AssetOptimizer for FailingOptimizer {
        async fn optimize(
            &self,
            _asset: &Asset,
            _techniques: &[Technique],
        ) -> anyhow::Result<(Asset, Vec<Technique>)> {
            anyhow::bail!("optimizer crashed")
        }
    }

    #[tokio::test]
    async fn test_cache_at_edge_follows_rules() {
        let cdn = test_cdn();
        let recorder = Arc::new(RecordingProvider::new("edge"));
        cdn.register_provider(recorder.clone());
        let mut events = cdn.subscribe();

        let options = EdgeCacheOptions::default().provider("edge").tags(["release-42"]);
        assert!(cdn.cache_at_edge(&Asset::new("/static/app.js", "run()"), &options).await.unwrap());
        assert!(cdn.cache_at_edge(&Asset::new("/api/users", "[]"), &options).await.unwrap());

        let writes = recorder.writes.lock().clone();
        assert_eq!(writes[0].0, "/static/app.js");
        assert_eq!(writes[0].1.ttl, STATIC_ASSET_TTL);
        assert_eq!(writes[0].1.regions, vec!["global"]);
        assert_eq!(writes[0].1.tags, vec!["release-42"]);
        assert_eq!(writes[1].1.ttl, Duration::from_secs(60));
        assert_eq!(writes[1].1.tags, vec!["api", "release-42"]);

        assert_eq!(events.recv().await.unwrap().name(), "edge:cached");
        assert_eq!(cdn.get_metrics().edge_sets, 2);
    }

    #[tokio::test]
    async fn test_vary_by_extends_edge_key() {
        let cdn = test_cdn();
        let recorder = Arc::new(RecordingProvider::new("edge"));
        cdn.register_provider(recorder.clone());

        let options = EdgeCacheOptions::default()
            .provider("edge")
            .vary("accept-encoding", "zstd")
            .vary("device", "mobile");
        cdn.cache_at_edge(&Asset::new("/index.html", "<p>hi</p>"), &options)
            .await
            .unwrap();

        assert_eq!(
            recorder.writes.lock()[0].0,
            "/index.html|accept-encoding=zstd|device=mobile"
        );
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let cdn = test_cdn();
        let options = EdgeCacheOptions::default().provider("nope");

        let result = cdn.cache_at_edge(&Asset::new("/a.js", "a"), &options).await;
        assert_matches!(result, Err(Error::ProviderNotFound { provider }) if provider == "nope");

        let result = cdn.purge_cache("/a", &PurgeOptions::default().provider("nope")).await;
        assert_matches!(result, Err(Error::ProviderNotFound { .. }));

        let result = cdn.warm_cache(vec![], &options).await;
        assert_matches!(result.err(), Some(Error::ProviderNotFound { .. }));
    }

    #[tokio::test]
    async fn test_provider_failure_is_reported_as_false() {
        let cdn = test_cdn();
        cdn.register_provider(Arc::new(RecordingProvider::new("edge").failing_on("/")));
        let mut events = cdn.subscribe();
        let options = EdgeCacheOptions::default().provider("edge");

        assert!(!cdn.cache_at_edge(&Asset::new("/a.js", "a"), &options).await.unwrap());
        assert!(!cdn
            .purge_cache("/a", &PurgeOptions::default().provider("edge"))
            .await
            .unwrap());

        assert_eq!(events.recv().await.unwrap().name(), "edge:cache_failed");
        assert_eq!(events.recv().await.unwrap().name(), "edge:purge_failed");
        let metrics = cdn.get_metrics();
        assert_eq!(metrics.errors, 2);
        assert_eq!(metrics.edge_sets, 0);
    }

    #[tokio::test]
    async fn test_purge_cache_on_default_provider() {
        let cdn = test_cdn();
        let options = EdgeCacheOptions::default();
        for path in ["/api/users", "/api/orders", "/index.html"] {
            cdn.cache_at_edge(&Asset::new(path, "x"), &options).await.unwrap();
        }
        let mut events = cdn.subscribe();

        assert!(cdn.purge_cache("/api/", &PurgeOptions::default()).await.unwrap());
        assert_matches!(events.recv().await.unwrap(), CdnEvent::Purged { pattern, .. } if pattern == "/api/");

        let stats = cdn.provider_stats();
        assert_eq!(stats["default"].entries, Some(1));
    }

    #[tokio::test]
    async fn test_optimize_asset_minifies_and_sets_headers() {
        let cdn = test_cdn();
        let asset = Asset::new("/styles/site.css", "body {\n  margin: 0;\n}\n");

        let optimized = cdn.optimize_asset(&asset).await;

        assert_eq!(&optimized.asset.content[..], b"body{margin: 0}");
        assert_eq!(optimized.optimization.techniques, vec![Technique::Minification]);
        assert!(optimized.optimization.savings > 0.0);
        assert!(optimized.optimization.error.is_none());
        assert_eq!(
            optimized.asset.headers["Cache-Control"],
            "public, max-age=31536000, immutable"
        );
        assert_eq!(optimized.asset.headers["ETag"], optimized.asset.etag());

        let metrics = cdn.get_metrics();
        assert_eq!(metrics.optimizations, 1);
        assert_eq!(metrics.optimizations_by_type["css"], 1);
    }

    #[tokio::test]
    async fn test_compression_can_be_disabled() {
        let body = "const answer = 42;\nconsole.log(answer);\n".repeat(100);
        let asset = Asset::new("/app.js", body);

        let optimized = test_cdn().optimize_asset(&asset).await;
        assert!(optimized.optimization.techniques.contains(&Technique::Compression));
        assert_eq!(optimized.asset.headers[CONTENT_ENCODING], "zstd");

        let cdn = CdnManager::new(CdnConfig {
            enable_compression: false,
            ..Default::default()
        })
        .unwrap();
        let optimized = cdn.optimize_asset(&asset).await;
        assert_eq!(optimized.optimization.techniques, vec![Technique::Minification]);
        assert!(!optimized.asset.headers.contains_key(CONTENT_ENCODING));
    }

    #[tokio::test]
    async fn test_optimization_failure_serves_original() {
        let cdn = CdnManager::with_optimizer(CdnConfig::default(), Arc::new(FailingOptimizer)).unwrap();
        let mut events = cdn.subscribe();
        let asset = Asset::new("/index.html", "<p> hi </p>");

        let optimized = cdn.optimize_asset(&asset).await;

        assert_eq!(optimized.asset.content, asset.content);
        assert_eq!(optimized.asset.headers["Cache-Control"], "no-cache, no-store, must-revalidate");
        assert_eq!(optimized.optimization.savings, 0.0);
        assert_eq!(optimized.optimization.compression_ratio, 1.0);
        assert_eq!(optimized.optimization.error.as_deref(), Some("optimizer crashed"));
        assert_eq!(events.recv().await.unwrap().name(), "asset:optimization_failed");
        assert_eq!(cdn.get_metrics().errors_by_kind["html"], 1);
    }

    #[tokio::test]
    async fn test_warm_cache_isolates_failures() {
        let cdn = test_cdn();
        cdn.register_provider(Arc::new(RecordingProvider::new("edge").failing_on("broken")));
        let options = EdgeCacheOptions::default().provider("edge");

        let report = cdn
            .warm_cache(
                vec![
                    Asset::new("/static/app.js", "run()"),
                    Asset::new("/static/broken.js", "oops()"),
                    Asset::new("/index.html", "<p>hi</p>"),
                ],
                &options,
            )
            .await
            .unwrap();

        assert_eq!(report.warmed, vec!["/static/app.js", "/index.html"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "/static/broken.js");
    }

    #[tokio::test]
    async fn test_deliver_content_fetches_once_then_hits_edge() {
        let cdn = test_cdn();
        let fetches = AtomicUsize::new(0);
        let counter = &fetches;
        let request = ContentRequest::new("/docs/guide.html");

        let origin = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(Asset::new(
                "/docs/guide.html",
                "<h1>Guide</h1>\n  <p>Read me</p>",
            ))
        };

        let first = cdn.deliver_content(&request, origin).await.unwrap();
        assert_eq!(first.source, ContentSource::Origin);
        assert_eq!(&first.asset.content[..], b"<h1>Guide</h1><p>Read me</p>");

        let second = cdn.deliver_content(&request, origin).await.unwrap();
        assert_eq!(second.source, ContentSource::Edge);
        assert_eq!(second.asset.content, first.asset.content);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let metrics = cdn.get_metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.cache_hit_rate, 50.0);
    }

    #[tokio::test]
    async fn test_deliver_content_variants_are_separate() {
        let cdn = test_cdn();
        let mobile = ContentRequest::new("/home.json").vary("device", "mobile");
        let desktop = ContentRequest::new("/home.json").vary("device", "desktop");

        cdn.deliver_content(&mobile, || async {
            Ok::<_, anyhow::Error>(Asset::new("/home.json", "{\"m\": 1}"))
        })
            .await
            .unwrap();

        let response = cdn
            .deliver_content(&desktop, || async {
                Ok::<_, anyhow::Error>(Asset::new("/home.json", "{\"d\": 1}"))
            })
            .await
            .unwrap();
        assert_eq!(response.source, ContentSource::Origin);
        assert_eq!(&response.asset.content[..], b"{\"d\":1}");

        let response = cdn
            .deliver_content(&mobile, || async {
                Err::<Asset, _>(anyhow::anyhow!("origin must not be called"))
            })
            .await
            .unwrap();
        assert_eq!(&response.asset.content[..], b"{\"m\":1}");
    }

    #[tokio::test]
    async fn test_deliver_content_origin_failure() {
        let cdn = test_cdn();
        let mut events = cdn.subscribe();

        let result = cdn
            .deliver_content(&ContentRequest::new("/missing.js"), || async {
                Err::<Asset, _>(anyhow::anyhow!("origin returned 503"))
            })
            .await;

        assert_matches!(result, Err(Error::Fetch { key, .. }) if key == "/missing.js");
        assert_matches!(events.recv().await.unwrap(), CdnEvent::DeliveryFailed { error, .. } if error == "origin returned 503");
    }

    #[tokio::test]
    async fn test_edge_read_failure_falls_back_to_origin() {
        let cdn = test_cdn();
        cdn.register_provider(Arc::new(RecordingProvider::new("edge")));
        let mut request = ContentRequest::new("/app.js");
        request.provider = Some("edge".to_string());

        let response = cdn
            .deliver_content(&request, || async {
                Ok::<_, anyhow::Error>(Asset::new("/app.js", "run()"))
            })
            .await
            .unwrap();

        assert_eq!(response.source, ContentSource::Origin);
        assert_eq!(cdn.get_metrics().errors_by_kind["get"], 1);
    }

    #[tokio::test]
    async fn test_health_check_aggregates_providers() {
        let cdn = test_cdn();
        assert_eq!(cdn.health_check().await.status, HealthStatus::Healthy);

        cdn.register_provider(Arc::new(RecordingProvider::new("edge").unhealthy()));
        let health = cdn.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(
            health.issues,
            vec!["Provider 'edge' is unhealthy: origin shield offline"]
        );
        assert!(health.providers["default"].healthy);

        cdn.register_provider(Arc::new(RecordingProvider::new("default").unhealthy()));
        let health = cdn.health_check().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.issues.len(), 2);
        assert_eq!(cdn.provider_names(), vec!["default", "edge"]);
    }

    #[test]
    fn test_empty_registry_is_unhealthy() {
        let health = CdnHealthStatus::from_providers(IndexMap::new(), Vec::new());
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }
}
