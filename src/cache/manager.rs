//! Cache Manager
//!
//! Coordinates the registered layers: routes keys to a layer, serializes and
//! compresses values, records metrics, emits events, propagates writes and
//! runs the periodic expiry sweep.

use crate::cache::compression::CompressionManager;
use crate::cache::entry::CacheData;
use crate::cache::events::{CacheEvent, MissReason};
use crate::cache::health::{CacheHealthStatus, HealthStatus, LayerHealth, LayerInfo};
use crate::cache::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::cache::options::{DeleteOptions, GetOptions, GetOrSetOptions, SetOptions};
use crate::cache::storage::{
    FileSystemCache, FileSystemCacheConfig, MemoryCache, MemoryCacheConfig, RedisCache,
    RedisCacheConfig, SharedCacheLayer,
};
use crate::cache::strategy::{CacheStrategy, StrategyKind};
use crate::config::CacheManagerConfig;
use crate::error::{Error, Result};
use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Key prefix of tag index entries
pub const TAG_PREFIX: &str = "__tag:";

/// Key prefix of health probe entries
pub const HEALTH_CHECK_PREFIX: &str = "__health_check_";

/// Lifetime of a health probe entry
const HEALTH_CHECK_TTL: Duration = Duration::from_secs(1);

fn tag_key(tag: &str) -> String {
    format!("{}{}", TAG_PREFIX, tag)
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// Warming
// =============================================================================

/// A key to preload, with the future producing its value
pub struct WarmEntry<T> {
    pub key: String,
    pub fetch: BoxFuture<'static, anyhow::Result<T>>,
    pub options: SetOptions,
}

impl<T: Send + 'static> WarmEntry<T> {
    pub fn new<F>(key: impl Into<String>, fetch: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            fetch: fetch.boxed(),
            options: SetOptions::default(),
        }
    }

    pub fn options(mut self, options: SetOptions) -> Self {
        self.options = options;
        self
    }
}

/// Outcome of [`CacheManager::warm`] and of edge warming
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmReport {
    pub warmed: Vec<String>,
    /// Key and error message of every entry that failed
    pub failed: Vec<(String, String)>,
}

// =============================================================================
// Reporter
// =============================================================================

/// Metrics and event sink, shared with background tasks
#[derive(Clone)]
struct Reporter {
    metrics: Arc<CacheMetrics>,
    events: broadcast::Sender<CacheEvent>,
}

impl Reporter {
    fn emit(&self, event: CacheEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Record a swallowed layer failure
    fn failure(&self, key: Option<&str>, layer: &str, operation: &str, err: &Error) {
        self.metrics.record_error(layer);
        if err.is_transient() {
            warn!(key = ?key, layer = %layer, operation, error = %err, "Cache layer operation failed");
        } else {
            error!(key = ?key, layer = %layer, operation, error = %err, "Cache layer operation failed");
        }
        self.emit(CacheEvent::error(key, Some(layer), operation, err));
    }
}

// =============================================================================
// Cache Manager
// =============================================================================

/// Multi-layer cache manager
///
/// Construct one per application context and share the returned `Arc`.
pub struct CacheManager {
    config: CacheManagerConfig,
    /// Registered layers in lookup order
    layers: RwLock<IndexMap<String, SharedCacheLayer>>,
    strategies: RwLock<IndexMap<String, Arc<dyn CacheStrategy>>>,
    compression: CompressionManager,
    reporter: Reporter,
    /// Serializes tag index read-modify-write cycles
    tag_lock: AsyncMutex<()>,
    /// Propagation and write-behind tasks
    tasks: TaskTracker,
    shutdown: CancellationToken,
    destroyed: AtomicBool,
}

impl CacheManager {
    /// Create a manager with default configuration
    pub async fn new() -> Result<Arc<Self>> {
        Self::with_config(CacheManagerConfig::default()).await
    }

    /// Create a manager, building the layers described by `config.layers`
    pub async fn with_config(config: CacheManagerConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let mut layers: IndexMap<String, SharedCacheLayer> = IndexMap::new();
        layers.insert(
            "memory".to_string(),
            Arc::new(MemoryCache::with_config(MemoryCacheConfig {
                max_size: config.layers.memory.max_size,
                default_ttl: config.default_ttl,
            })),
        );

        if let Some(redis) = &config.layers.redis {
            let layer = RedisCache::new(RedisCacheConfig {
                url: redis.url.clone(),
                key_prefix: redis.key_prefix.clone(),
                ..Default::default()
            })?;
            layers.insert("redis".to_string(), Arc::new(layer));
        }

        if let Some(fs) = &config.layers.fs {
            let layer = FileSystemCache::with_config(FileSystemCacheConfig {
                directory: fs.directory.clone(),
            })
            .await?;
            layers.insert("fs".to_string(), Arc::new(layer));
        }

        Self::with_layers(config, layers).await
    }

    /// Create a manager over an explicit layer set, ignoring `config.layers`
    pub async fn with_layers(
        config: CacheManagerConfig,
        layers: IndexMap<String, SharedCacheLayer>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        if !layers.contains_key(&config.default_layer) {
            return Err(Error::Configuration(format!(
                "default layer '{}' is not configured",
                config.default_layer
            )));
        }

        let strategies = StrategyKind::ALL
            .into_iter()
            .map(|kind| (kind.as_str().to_string(), kind.build()))
            .collect();

        let (events, _) = broadcast::channel(config.event_channel_capacity);
        let layer_names: Vec<String> = layers.keys().cloned().collect();

        let manager = Arc::new(Self {
            compression: CompressionManager::with_config(config.compression_config()),
            reporter: Reporter {
                metrics: Arc::new(CacheMetrics::new(config.enable_metrics)),
                events,
            },
            layers: RwLock::new(layers),
            strategies: RwLock::new(strategies),
            tag_lock: AsyncMutex::new(()),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            destroyed: AtomicBool::new(false),
            config,
        });

        Self::spawn_cleanup(&manager);

        info!(
            layers = ?layer_names,
            default_layer = %manager.config.default_layer,
            disabled = manager.config.disabled,
            "Cache manager initialized"
        );
        Ok(manager)
    }

    /// Run the expiry sweep every `cleanup_interval` until shutdown
    fn spawn_cleanup(manager: &Arc<Self>) {
        let period = manager.config.cleanup_interval;
        if period.is_zero() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(manager);
        let shutdown = manager.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        manager.cleanup().await;
                    }
                }
            }
            debug!("Cache cleanup task stopped");
        });
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Active configuration
    pub fn config(&self) -> &CacheManagerConfig {
        &self.config
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.reporter.events.subscribe()
    }

    /// Register (or replace) a layer under `name`
    pub fn register_layer(&self, name: impl Into<String>, layer: SharedCacheLayer) {
        let name = name.into();
        info!(layer = %name, kind = %layer.kind(), "Registered cache layer");
        self.layers.write().insert(name, layer);
    }

    /// Layer names in lookup order
    pub fn layer_names(&self) -> Vec<String> {
        self.layers.read().keys().cloned().collect()
    }

    /// Look up a strategy by name
    pub fn strategy(&self, name: &str) -> Result<Arc<dyn CacheStrategy>> {
        self.strategies
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::StrategyNotFound {
                strategy: name.to_string(),
            })
    }

    /// Register (or replace) a strategy under `name`
    pub fn register_strategy(&self, name: impl Into<String>, strategy: Arc<dyn CacheStrategy>) {
        self.strategies.write().insert(name.into(), strategy);
    }

    fn resolve(&self, layer: Option<&str>) -> Result<(String, SharedCacheLayer)> {
        let name = layer.unwrap_or(&self.config.default_layer);
        self.layers
            .read()
            .get(name)
            .map(|layer| (name.to_string(), layer.clone()))
            .ok_or_else(|| Error::LayerNotFound {
                layer: name.to_string(),
            })
    }

    fn snapshot(&self) -> Vec<(String, SharedCacheLayer)> {
        self.layers
            .read()
            .iter()
            .map(|(name, layer)| (name.clone(), layer.clone()))
            .collect()
    }

    fn others(&self, exclude: &str) -> Vec<(String, SharedCacheLayer)> {
        self.snapshot()
            .into_iter()
            .filter(|(name, _)| name != exclude)
            .collect()
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<CacheData> {
        Ok(self.compression.encode(serde_json::to_vec(value)?))
    }

    fn decode<T: DeserializeOwned>(&self, data: &CacheData) -> Result<T> {
        let bytes = match self.compression.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(algorithm = %data.compression, error = %e, "Decompression failed, reading raw bytes");
                data.bytes.clone()
            }
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    // =========================================================================
    // Core Operations
    // =========================================================================

    fn miss(&self, key: &str, layer: &str, reason: MissReason) {
        if reason != MissReason::Error {
            self.reporter.metrics.record_miss(layer);
        }
        self.reporter.emit(CacheEvent::Miss {
            key: key.to_string(),
            layer: layer.to_string(),
            reason,
        });
    }

    fn finish_get<T: DeserializeOwned>(
        &self,
        key: &str,
        layer: &str,
        data: Option<CacheData>,
        latency: Duration,
    ) -> Option<T> {
        let Some(data) = data else {
            self.miss(key, layer, MissReason::NotFound);
            return None;
        };

        match self.decode(&data) {
            Ok(value) => {
                self.reporter.metrics.record_hit(layer, latency);
                self.reporter.emit(CacheEvent::Hit {
                    key: key.to_string(),
                    layer: layer.to_string(),
                });
                Some(value)
            }
            Err(err) => {
                self.reporter.failure(Some(key), layer, "get", &err);
                self.miss(key, layer, MissReason::Error);
                None
            }
        }
    }

    /// Read a value
    ///
    /// Returns `Ok(None)` on a miss, when caching is disabled and when the
    /// layer fails. Only an unknown layer name is an error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, options: GetOptions) -> Result<Option<T>> {
        let (name, layer) = self.resolve(options.layer.as_deref())?;

        if self.config.disabled || options.skip_cache {
            self.miss(key, &name, MissReason::Disabled);
            return Ok(None);
        }

        let start = Instant::now();
        match layer.get(key).await {
            Ok(data) => Ok(self.finish_get(key, &name, data, start.elapsed())),
            Err(err) => {
                self.reporter.failure(Some(key), &name, "get", &err);
                self.miss(key, &name, MissReason::Error);
                Ok(None)
            }
        }
    }

    async fn store(
        &self,
        name: &str,
        layer: &SharedCacheLayer,
        key: &str,
        data: CacheData,
        ttl: Duration,
    ) -> bool {
        let compressed = data.is_compressed();
        let start = Instant::now();

        match layer.set(key, data, ttl).await {
            Ok(true) => {
                self.reporter.metrics.record_set(name, start.elapsed());
                self.reporter.emit(CacheEvent::Set {
                    key: key.to_string(),
                    layer: name.to_string(),
                    ttl_ms: ttl_millis(ttl),
                    compressed,
                });
                debug!(key = %key, layer = %name, ttl_ms = ttl_millis(ttl), compressed, "Stored cache entry");
                true
            }
            Ok(false) => false,
            Err(err) => {
                self.reporter.failure(Some(key), name, "set", &err);
                false
            }
        }
    }

    /// Write a value
    ///
    /// Returns whether the chosen layer stored it. With `propagate`, the same
    /// encoded value is written to every other layer in the background.
    pub async fn set<T>(&self, key: &str, value: &T, options: SetOptions) -> Result<bool>
    where
        T: Serialize + Sync + ?Sized,
    {
        let (name, layer) = self.resolve(options.layer.as_deref())?;
        if self.config.disabled {
            return Ok(false);
        }

        let data = match self.encode(value) {
            Ok(data) => data,
            Err(err) => {
                self.reporter.failure(Some(key), &name, "set", &err);
                return Ok(false);
            }
        };

        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let stored = self.store(&name, &layer, key, data.clone(), ttl).await;
        if stored && options.propagate {
            self.propagate_set(&name, key, data, ttl);
        }
        Ok(stored)
    }

    fn propagate_set(&self, origin: &str, key: &str, data: CacheData, ttl: Duration) {
        let targets = self.others(origin);
        if targets.is_empty() {
            return;
        }

        let reporter = self.reporter.clone();
        let key = key.to_string();

        self.tasks.spawn(async move {
            let key = key.as_str();
            let writes = targets.iter().map(|(name, layer)| {
                let data = data.clone();
                async move { (name, layer.set(key, data, ttl).await) }
            });

            for (name, result) in join_all(writes).await {
                if let Err(err) = result {
                    reporter.failure(Some(key), name, "propagate_set", &err);
                }
            }
            debug!(key = %key, layers = targets.len(), "Propagated cache entry");
        });
    }

    /// Remove a value
    pub async fn delete(&self, key: &str, options: DeleteOptions) -> Result<bool> {
        let (name, layer) = self.resolve(options.layer.as_deref())?;

        let deleted = match layer.delete(key).await {
            Ok(deleted) => {
                self.reporter.emit(CacheEvent::Delete {
                    key: key.to_string(),
                    layer: name.clone(),
                });
                deleted
            }
            Err(err) => {
                self.reporter.failure(Some(key), &name, "delete", &err);
                false
            }
        };

        if options.propagate {
            self.propagate_delete(&name, key);
        }
        Ok(deleted)
    }

    fn propagate_delete(&self, origin: &str, key: &str) {
        let targets = self.others(origin);
        if targets.is_empty() {
            return;
        }

        let reporter = self.reporter.clone();
        let key = key.to_string();

        self.tasks.spawn(async move {
            let key = key.as_str();
            let deletes = targets
                .iter()
                .map(|(name, layer)| async move { (name, layer.delete(key).await) });

            for (name, result) in join_all(deletes).await {
                if let Err(err) = result {
                    reporter.failure(Some(key), name, "propagate_delete", &err);
                }
            }
        });
    }

    /// Clear one layer, or every layer when `layer` is `None`
    pub async fn clear(&self, layer: Option<&str>) -> Result<()> {
        let targets = match layer {
            Some(name) => vec![self.resolve(Some(name))?],
            None => self.snapshot(),
        };

        for (name, layer) in targets {
            match layer.clear().await {
                Ok(()) => {
                    info!(layer = %name, "Cleared cache layer");
                    self.reporter.emit(CacheEvent::Clear { layer: name });
                }
                Err(err) => self.reporter.failure(None, &name, "clear", &err),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Access Patterns
    // =========================================================================

    /// Cache-aside read: return the cached value or fetch, cache and return it
    ///
    /// `fetch` is not invoked on a hit. When it fails and
    /// `return_stale_on_error` is set, a copy held by any layer is served
    /// instead of the error.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        options: GetOrSetOptions,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let (name, _) = self.resolve(options.layer.as_deref())?;

        if let Some(value) = self.get::<T>(key, options.get_options()).await? {
            return Ok(value);
        }

        match fetch().await {
            Ok(value) => {
                if !options.skip_cache {
                    self.set(key, &value, options.set_options()).await?;
                }
                Ok(value)
            }
            Err(source) => {
                if options.return_stale_on_error {
                    if let Some((layer, value)) = self.find_stale::<T>(&name, key).await {
                        warn!(key = %key, layer = %layer, error = %source, "Fetch failed, serving stale value");
                        self.reporter.emit(CacheEvent::StaleServed {
                            key: key.to_string(),
                            layer,
                        });
                        return Ok(value);
                    }
                }
                error!(key = %key, error = %source, "Fetch failed");
                self.reporter
                    .emit(CacheEvent::error(Some(key), Some(&name), "fetch", &source));
                Err(Error::fetch(key, source))
            }
        }
    }

    /// First decodable copy of `key` outside `origin`, in registry order
    async fn find_stale<T: DeserializeOwned>(&self, origin: &str, key: &str) -> Option<(String, T)> {
        for (name, layer) in self.others(origin) {
            if let Ok(Some(data)) = layer.get(key).await {
                if let Ok(value) = self.decode::<T>(&data) {
                    return Some((name, value));
                }
            }
        }
        None
    }

    /// Persist through `write_fn`, then cache
    ///
    /// A persistence failure caches nothing and is returned to the caller.
    pub async fn write_through<T, F, Fut>(
        &self,
        key: &str,
        value: T,
        write_fn: F,
        options: SetOptions,
    ) -> Result<bool>
    where
        T: Serialize + Clone + Send + Sync,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let (name, _) = self.resolve(options.layer.as_deref())?;

        if let Err(source) = write_fn(value.clone()).await {
            error!(key = %key, error = %source, "Write-through persistence failed");
            self.reporter
                .emit(CacheEvent::error(Some(key), Some(&name), "write_through", &source));
            return Err(Error::write(key, source));
        }

        self.set(key, &value, options).await
    }

    /// Cache now, persist through `write_fn` in the background
    ///
    /// Persistence outcome is reported only through events.
    pub async fn write_behind<T, F, Fut>(
        &self,
        key: &str,
        value: T,
        write_fn: F,
        options: SetOptions,
    ) -> Result<bool>
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cached = self.set(key, &value, options).await?;

        let reporter = self.reporter.clone();
        let key = key.to_string();
        self.tasks.spawn(async move {
            match write_fn(value).await {
                Ok(()) => {
                    debug!(key = %key, "Write-behind persisted");
                    reporter.emit(CacheEvent::WriteBehindSucceeded { key });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Write-behind persistence failed");
                    reporter.emit(CacheEvent::WriteBehindFailed {
                        key,
                        error: format!("{:#}", e),
                    });
                }
            }
        });

        Ok(cached)
    }

    /// Fetch unconditionally and overwrite the cached value
    pub async fn refresh<T, F, Fut>(&self, key: &str, fetch: F, options: SetOptions) -> Result<T>
    where
        T: Serialize + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let (name, _) = self.resolve(options.layer.as_deref())?;

        match fetch().await {
            Ok(value) => {
                self.set(key, &value, options).await?;
                self.reporter.emit(CacheEvent::Refreshed {
                    key: key.to_string(),
                });
                Ok(value)
            }
            Err(source) => {
                error!(key = %key, error = %source, "Refresh fetch failed");
                self.reporter
                    .emit(CacheEvent::error(Some(key), Some(&name), "refresh", &source));
                Err(Error::fetch(key, source))
            }
        }
    }

    // =========================================================================
    // Batch Operations
    // =========================================================================

    /// Read several keys; the result is aligned with `keys`
    pub async fn get_many<T, K>(&self, keys: &[K], options: GetOptions) -> Result<Vec<Option<T>>>
    where
        T: DeserializeOwned,
        K: AsRef<str> + Sync,
    {
        let (name, layer) = self.resolve(options.layer.as_deref())?;

        if self.config.disabled || options.skip_cache {
            return Ok(keys
                .iter()
                .map(|key| {
                    self.miss(key.as_ref(), &name, MissReason::Disabled);
                    None
                })
                .collect());
        }

        if let Some(batch) = layer.as_batch() {
            let owned: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
            let start = Instant::now();

            return match batch.get_many(&owned).await {
                Ok(mut values) => {
                    let latency = start.elapsed();
                    values.resize(owned.len(), None);
                    Ok(owned
                        .iter()
                        .zip(values)
                        .map(|(key, data)| self.finish_get(key, &name, data, latency))
                        .collect())
                }
                Err(err) => {
                    self.reporter.failure(None, &name, "get_many", &err);
                    Ok(owned
                        .iter()
                        .map(|key| {
                            self.miss(key, &name, MissReason::Error);
                            None
                        })
                        .collect())
                }
            };
        }

        let reads = keys
            .iter()
            .map(|key| self.get::<T>(key.as_ref(), options.clone()));
        join_all(reads).await.into_iter().collect()
    }

    /// Write several entries, reporting `true` only if every key was stored
    ///
    /// Entries that did succeed stay cached even when the result is `false`.
    pub async fn set_many<T>(&self, entries: Vec<(String, T)>, options: SetOptions) -> Result<bool>
    where
        T: Serialize + Send + Sync,
    {
        let results = self.set_many_each(entries, options).await?;
        Ok(results.values().all(|stored| *stored))
    }

    /// Write several entries, reporting the outcome per key
    pub async fn set_many_each<T>(
        &self,
        entries: Vec<(String, T)>,
        options: SetOptions,
    ) -> Result<IndexMap<String, bool>>
    where
        T: Serialize + Send + Sync,
    {
        let (name, layer) = self.resolve(options.layer.as_deref())?;
        let mut results: IndexMap<String, bool> =
            entries.iter().map(|(key, _)| (key.clone(), false)).collect();
        if self.config.disabled {
            return Ok(results);
        }

        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in &entries {
            match self.encode(value) {
                Ok(data) => encoded.push((key.clone(), data)),
                Err(err) => self.reporter.failure(Some(key), &name, "set_many", &err),
            }
        }

        if let Some(batch) = layer.as_batch() {
            let start = Instant::now();
            match batch.set_many(encoded.clone(), ttl).await {
                Ok(true) => {
                    let latency = start.elapsed();
                    for (key, data) in &encoded {
                        self.reporter.metrics.record_set(&name, latency);
                        self.reporter.emit(CacheEvent::Set {
                            key: key.clone(),
                            layer: name.clone(),
                            ttl_ms: ttl_millis(ttl),
                            compressed: data.is_compressed(),
                        });
                        results.insert(key.clone(), true);
                    }
                }
                Ok(false) => {}
                Err(err) => self.reporter.failure(None, &name, "set_many", &err),
            }
        } else {
            let (name_ref, layer_ref) = (&name, &layer);
            let writes = encoded.iter().map(|(key, data)| async move {
                let stored = self.store(name_ref, layer_ref, key, data.clone(), ttl).await;
                (key.clone(), stored)
            });
            for (key, stored) in join_all(writes).await {
                results.insert(key, stored);
            }
        }

        if options.propagate {
            for (key, data) in encoded {
                if results.get(&key).copied().unwrap_or(false) {
                    self.propagate_set(&name, &key, data, ttl);
                }
            }
        }

        debug!(
            layer = %name,
            total = results.len(),
            stored = results.values().filter(|s| **s).count(),
            "Batch write finished"
        );
        Ok(results)
    }

    // =========================================================================
    // Tags
    // =========================================================================

    async fn read_tag_index(&self, name: &str, layer: &SharedCacheLayer, index_key: &str) -> Vec<String> {
        match layer.get(index_key).await {
            Ok(Some(data)) => match self.decode(&data) {
                Ok(keys) => keys,
                Err(err) => {
                    self.reporter.failure(Some(index_key), name, "tag_index", &err);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                self.reporter.failure(Some(index_key), name, "tag_index", &err);
                Vec::new()
            }
        }
    }

    async fn write_tag_index(&self, name: &str, layer: &SharedCacheLayer, index_key: &str, keys: &[String]) {
        let result = match self.encode(keys) {
            Ok(data) => layer.set(index_key, data, self.config.default_ttl).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            self.reporter.failure(Some(index_key), name, "tag_index", &err);
        }
    }

    /// Associate `key` with each tag; tagging twice is a no-op
    pub async fn tag<S>(&self, key: &str, tags: &[S]) -> Result<()>
    where
        S: AsRef<str> + Sync,
    {
        let (name, layer) = self.resolve(None)?;
        if self.config.disabled {
            return Ok(());
        }

        let _guard = self.tag_lock.lock().await;
        for tag in tags {
            let index_key = tag_key(tag.as_ref());
            let mut keys = self.read_tag_index(&name, &layer, &index_key).await;
            if keys.iter().any(|k| k == key) {
                continue;
            }
            keys.push(key.to_string());
            self.write_tag_index(&name, &layer, &index_key, &keys).await;
        }

        self.reporter.emit(CacheEvent::Tagged {
            key: key.to_string(),
            tags: tags.iter().map(|t| t.as_ref().to_string()).collect(),
        });
        Ok(())
    }

    /// Delete every key carrying `tag`, then the tag index itself
    ///
    /// Returns the number of keys that were listed under the tag.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<usize> {
        let (name, layer) = self.resolve(None)?;
        let _guard = self.tag_lock.lock().await;

        let index_key = tag_key(tag);
        let keys = self.read_tag_index(&name, &layer, &index_key).await;

        let deletes = keys
            .iter()
            .map(|key| self.delete(key, DeleteOptions::default()));
        join_all(deletes)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        if let Err(err) = layer.delete(&index_key).await {
            self.reporter.failure(Some(&index_key), &name, "tag_index", &err);
        }

        info!(tag = %tag, count = keys.len(), "Invalidated tagged cache entries");
        self.reporter.emit(CacheEvent::InvalidatedByTag {
            tag: tag.to_string(),
            count: keys.len(),
        });
        Ok(keys.len())
    }

    // =========================================================================
    // Warming
    // =========================================================================

    /// Fetch and cache entries concurrently; one failure never aborts the rest
    pub async fn warm<T>(&self, entries: Vec<WarmEntry<T>>) -> WarmReport
    where
        T: Serialize + Send + Sync,
    {
        let jobs = entries.into_iter().map(|entry| async move {
            let WarmEntry { key, fetch, options } = entry;
            let outcome = match fetch.await {
                Ok(value) => match self.set(&key, &value, options).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err("cache write was not stored".to_string()),
                    Err(err) => Err(err.to_string()),
                },
                Err(err) => Err(format!("{:#}", err)),
            };
            (key, outcome)
        });

        let mut report = WarmReport::default();
        for (key, outcome) in join_all(jobs).await {
            match outcome {
                Ok(()) => {
                    self.reporter.emit(CacheEvent::Warmed { key: key.clone() });
                    report.warmed.push(key);
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "Cache warming failed for key");
                    self.reporter.emit(CacheEvent::WarmFailed {
                        key: key.clone(),
                        error: error.clone(),
                    });
                    report.failed.push((key, error));
                }
            }
        }

        info!(
            warmed = report.warmed.len(),
            failed = report.failed.len(),
            "Cache warming finished"
        );
        report
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Global metrics snapshot
    pub fn get_metrics(&self) -> CacheMetricsSnapshot {
        self.reporter.metrics.snapshot()
    }

    /// Metrics snapshot for one layer
    pub fn layer_metrics(&self, layer: &str) -> CacheMetricsSnapshot {
        self.reporter.metrics.layer_snapshot(layer)
    }

    /// Per-layer size and usage
    pub fn layer_info(&self) -> Vec<LayerInfo> {
        self.snapshot()
            .into_iter()
            .map(|(name, layer)| LayerInfo {
                hit_rate: self.reporter.metrics.layer_hit_rate(&name),
                kind: layer.kind(),
                size: layer.size(),
                max_size: layer.max_size(),
                last_accessed: layer.last_accessed(),
                name,
            })
            .collect()
    }

    /// Probe every layer with a set/get/delete round trip
    ///
    /// A bounded layer that is already full is probed with a read only, so
    /// the probe entry never evicts user data.
    pub async fn health_check(&self) -> CacheHealthStatus {
        let probes = self.snapshot().into_iter().map(|(name, layer)| async move {
            let mut health = probe_layer(&layer).await;
            health.size = Some(layer.size());
            health.hit_rate = Some(self.reporter.metrics.layer_hit_rate(&name));
            (name, health)
        });

        let layers: IndexMap<String, LayerHealth> = join_all(probes).await.into_iter().collect();
        let health = CacheHealthStatus::from_layers(layers);

        if !health.is_healthy() {
            warn!(status = %health.status, issues = ?health.issues, "Cache health check found issues");
        }
        health
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Sweep expired entries from every layer
    pub async fn cleanup(&self) -> u64 {
        let mut removed = 0;

        for (name, layer) in self.snapshot() {
            match layer.cleanup().await {
                Ok(count) => removed += count,
                Err(err) => {
                    self.reporter.metrics.record_error(&name);
                    warn!(layer = %name, error = %err, "Cache cleanup failed");
                    self.reporter.emit(CacheEvent::CleanupError {
                        layer: name,
                        error: err.to_string(),
                    });
                }
            }
        }

        debug!(removed, "Cache cleanup completed");
        self.reporter.emit(CacheEvent::CleanupCompleted { removed });
        removed
    }

    /// Wait for in-flight propagation and write-behind tasks
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Whether [`destroy`](Self::destroy) has run
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Stop the cleanup task, drain background work and close every layer
    ///
    /// Later calls are no-ops.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        let layers: Vec<(String, SharedCacheLayer)> = self.layers.write().drain(..).collect();
        for (name, layer) in layers {
            if let Err(err) = layer.close().await {
                warn!(layer = %name, error = %err, "Failed to close cache layer");
            }
        }

        info!("Cache manager destroyed");
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn is_full(layer: &SharedCacheLayer) -> bool {
    layer.max_size().is_some_and(|max| layer.size() >= max)
}

async fn probe_layer(layer: &SharedCacheLayer) -> LayerHealth {
    let stamp = Utc::now().timestamp_millis();
    let key = format!("{}{}", HEALTH_CHECK_PREFIX, stamp);
    let expected = format!("\"ok-{}\"", stamp);
    let start = Instant::now();

    let result: Result<bool> = async {
        if is_full(layer) {
            // Nothing was written under the key, so nothing may be read back
            return Ok(layer.get(&key).await?.is_none());
        }

        let data = CacheData::uncompressed(expected.clone().into_bytes());
        layer.set(&key, data, HEALTH_CHECK_TTL).await?;
        let read = layer.get(&key).await?;
        layer.delete(&key).await?;
        Ok(read.is_some_and(|d| d.bytes.as_ref() == expected.as_bytes()))
    }
    .await;

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    let (status, error) = match result {
        Ok(true) => (HealthStatus::Healthy, None),
        Ok(false) => (
            HealthStatus::Degraded,
            Some("probe read back an unexpected value".to_string()),
        ),
        Err(err) => (HealthStatus::Unhealthy, Some(err.to_string())),
    };

    LayerHealth {
        status,
        latency_ms,
        size: None,
        hit_rate: None,
        error,
    }
}

// =============================================================================
// Tests
// =============================================================================
