//! Configuration Module
//!
//! Cache manager configuration, resolved once at construction. Values come
//! from defaults, environment variables or a YAML file.

use crate::cache::compression::{CompressionAlgorithm, CompressionConfig};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Layer Configuration
// =============================================================================

/// In-process layer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryLayerConfig {
    /// Maximum number of entries
    pub max_size: usize,
}

impl Default for MemoryLayerConfig {
    fn default() -> Self {
        Self { max_size: 1000 }
    }
}

/// Redis layer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisLayerConfig {
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "cache:".to_string()
}

/// Filesystem layer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLayerConfig {
    pub directory: PathBuf,
}

impl Default for FsLayerConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./cache"),
        }
    }
}

/// Which layers the manager builds, in registry order memory, redis, fs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayersConfig {
    pub memory: MemoryLayerConfig,
    /// Registered only when present
    pub redis: Option<RedisLayerConfig>,
    /// Registered only when present
    pub fs: Option<FsLayerConfig>,
}

impl Default for LayersConfig {
    fn default() -> Self {
        Self {
            memory: MemoryLayerConfig::default(),
            redis: None,
            fs: Some(FsLayerConfig::default()),
        }
    }
}

impl LayersConfig {
    /// Only the memory layer
    pub fn memory_only() -> Self {
        Self {
            fs: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Cache Manager Configuration
// =============================================================================

/// Top-level cache manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheManagerConfig {
    #[serde(rename = "default_ttl_ms", with = "duration_ms")]
    pub default_ttl: Duration,
    /// Informational memory budget in bytes
    pub max_memory_usage: u64,
    /// Period of the expiry sweep; zero disables it
    #[serde(rename = "cleanup_interval_ms", with = "duration_ms")]
    pub cleanup_interval: Duration,
    /// Serialized payloads larger than this are compressed
    pub compression_threshold: u64,
    pub enable_compression: bool,
    pub compression_algorithm: CompressionAlgorithm,
    pub enable_metrics: bool,
    /// Global kill switch: every read misses and every write is skipped
    pub disabled: bool,
    pub default_layer: String,
    pub event_channel_capacity: usize,
    pub layers: LayersConfig,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(3_600_000),
            max_memory_usage: 500 * 1024 * 1024,
            cleanup_interval: Duration::from_millis(300_000),
            compression_threshold: 1024,
            enable_compression: true,
            compression_algorithm: CompressionAlgorithm::Lz4,
            enable_metrics: true,
            disabled: false,
            default_layer: "memory".to_string(),
            event_channel_capacity: 1024,
            layers: LayersConfig::default(),
        }
    }
}

impl CacheManagerConfig {
    /// Load from process environment variables
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_TTL_MS` - Default TTL (default: 3600000)
    /// - `CACHE_MAX_MEMORY_BYTES` - Memory budget (default: 500 MiB)
    /// - `CACHE_CLEANUP_INTERVAL_MS` - Sweep period (default: 300000)
    /// - `CACHE_COMPRESSION_THRESHOLD` - Compression threshold bytes (default: 1024)
    /// - `CACHE_ENABLE_COMPRESSION` - `true`/`false` (default: true)
    /// - `CACHE_COMPRESSION_ALGORITHM` - none, lz4, zstd, snappy (default: lz4)
    /// - `CACHE_ENABLE_METRICS` - `true`/`false` (default: true)
    /// - `DISABLE_CACHE` - `true` disables caching
    /// - `CACHE_DEFAULT_LAYER` - Default layer name (default: memory)
    /// - `CACHE_MEMORY_MAX_ENTRIES` - Memory layer bound (default: 1000)
    /// - `REDIS_URL` - Enables the Redis layer
    /// - `CACHE_DIR` - Filesystem layer directory (default: ./cache)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "CACHE_DEFAULT_TTL_MS")? {
            config.default_ttl = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse_var(&lookup, "CACHE_MAX_MEMORY_BYTES")? {
            config.max_memory_usage = bytes;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "CACHE_CLEANUP_INTERVAL_MS")? {
            config.cleanup_interval = Duration::from_millis(ms);
        }
        if let Some(threshold) = parse_var(&lookup, "CACHE_COMPRESSION_THRESHOLD")? {
            config.compression_threshold = threshold;
        }
        if let Some(enabled) = parse_var(&lookup, "CACHE_ENABLE_COMPRESSION")? {
            config.enable_compression = enabled;
        }
        if let Some(algorithm) = parse_var(&lookup, "CACHE_COMPRESSION_ALGORITHM")? {
            config.compression_algorithm = algorithm;
        }
        if let Some(enabled) = parse_var(&lookup, "CACHE_ENABLE_METRICS")? {
            config.enable_metrics = enabled;
        }
        config.disabled = lookup("DISABLE_CACHE").map(|v| v == "true").unwrap_or(false);
        if let Some(layer) = lookup("CACHE_DEFAULT_LAYER") {
            config.default_layer = layer;
        }
        if let Some(max_size) = parse_var(&lookup, "CACHE_MEMORY_MAX_ENTRIES")? {
            config.layers.memory.max_size = max_size;
        }
        if let Some(url) = lookup("REDIS_URL").filter(|u| !u.is_empty()) {
            config.layers.redis = Some(RedisLayerConfig {
                url,
                key_prefix: default_key_prefix(),
            });
        }
        if let Some(dir) = lookup("CACHE_DIR") {
            config.layers.fs = Some(FsLayerConfig {
                directory: PathBuf::from(dir),
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file; absent fields keep their defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse YAML text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(Error::Configuration(
                "event_channel_capacity must be greater than zero".into(),
            ));
        }
        if self.layers.memory.max_size == 0 {
            return Err(Error::Configuration(
                "layers.memory.max_size must be greater than zero".into(),
            ));
        }
        if self.default_layer.is_empty() {
            return Err(Error::Configuration("default_layer must not be empty".into()));
        }
        Ok(())
    }

    /// Compression settings derived from this config
    pub fn compression_config(&self) -> CompressionConfig {
        CompressionConfig {
            enabled: self.enable_compression,
            algorithm: self.compression_algorithm,
            threshold_bytes: self.compression_threshold,
            ..Default::default()
        }
    }
}

// =============================================================================
// CDN Configuration
// =============================================================================

/// Edge delivery manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnConfig {
    /// Edge TTL for paths no cache rule matches
    #[serde(rename = "default_ttl_ms", with = "duration_ms")]
    pub default_ttl: Duration,
    pub enable_minification: bool,
    pub enable_image_optimization: bool,
    /// Compress text assets and tag them with `Content-Encoding`
    pub enable_compression: bool,
    /// Provider used when an operation names none
    pub default_provider: String,
    pub event_channel_capacity: usize,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            enable_minification: true,
            enable_image_optimization: true,
            enable_compression: true,
            default_provider: "default".to_string(),
            event_channel_capacity: 1024,
        }
    }
}

impl CdnConfig {
    /// Load from process environment variables
    ///
    /// # Environment Variables
    /// - `CDN_DEFAULT_TTL_MS` - Edge TTL for unmatched paths (default: 3600000)
    /// - `CDN_ENABLE_MINIFICATION` - `true`/`false` (default: true)
    /// - `CDN_ENABLE_IMAGE_OPTIMIZATION` - `true`/`false` (default: true)
    /// - `CDN_ENABLE_COMPRESSION` - `true`/`false` (default: true)
    /// - `CDN_DEFAULT_PROVIDER` - Provider name (default: default)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "CDN_DEFAULT_TTL_MS")? {
            config.default_ttl = Duration::from_millis(ms);
        }
        if let Some(enabled) = parse_var(&lookup, "CDN_ENABLE_MINIFICATION")? {
            config.enable_minification = enabled;
        }
        if let Some(enabled) = parse_var(&lookup, "CDN_ENABLE_IMAGE_OPTIMIZATION")? {
            config.enable_image_optimization = enabled;
        }
        if let Some(enabled) = parse_var(&lookup, "CDN_ENABLE_COMPRESSION")? {
            config.enable_compression = enabled;
        }
        if let Some(provider) = lookup("CDN_DEFAULT_PROVIDER") {
            config.default_provider = provider;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(Error::Configuration(
                "event_channel_capacity must be greater than zero".into(),
            ));
        }
        if self.default_provider.is_empty() {
            return Err(Error::Configuration("default_provider must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Configuration(format!("invalid {}={:?}: {}", name, raw, e))),
    }
}

/// Serde helper storing a `Duration` as whole milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = CacheManagerConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.cleanup_interval, Duration::from_secs(300));
        assert_eq!(config.max_memory_usage, 500 * 1024 * 1024);
        assert_eq!(config.compression_threshold, 1024);
        assert_eq!(config.default_layer, "memory");
        assert_eq!(config.layers.memory.max_size, 1000);
        assert!(config.layers.redis.is_none());
        assert!(config.layers.fs.is_some());
        assert!(!config.disabled);
    }

    #[test]
    fn test_config_from_env() {
        let config = CacheManagerConfig::from_lookup(lookup(&[
            ("CACHE_DEFAULT_TTL_MS", "5000"),
            ("CACHE_COMPRESSION_ALGORITHM", "zstd"),
            ("CACHE_ENABLE_METRICS", "false"),
            ("DISABLE_CACHE", "true"),
            ("CACHE_MEMORY_MAX_ENTRIES", "10"),
            ("REDIS_URL", "redis://cache:6379"),
            ("CACHE_DIR", "/tmp/strata"),
        ]))
        .unwrap();

        assert_eq!(config.default_ttl, Duration::from_secs(5));
        assert_eq!(config.compression_algorithm, CompressionAlgorithm::Zstd);
        assert!(!config.enable_metrics);
        assert!(config.disabled);
        assert_eq!(config.layers.memory.max_size, 10);
        assert_eq!(config.layers.redis.unwrap().url, "redis://cache:6379");
        assert_eq!(config.layers.fs.unwrap().directory, PathBuf::from("/tmp/strata"));
    }

    #[test]
    fn test_config_from_env_rejects_garbage() {
        let result = CacheManagerConfig::from_lookup(lookup(&[("CACHE_DEFAULT_TTL_MS", "soon")]));
        assert_matches!(result, Err(Error::Configuration(msg)) if msg.contains("CACHE_DEFAULT_TTL_MS"));

        let result = CacheManagerConfig::from_lookup(lookup(&[("CACHE_MEMORY_MAX_ENTRIES", "0")]));
        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[test]
    fn test_config_from_yaml() {
        let config = CacheManagerConfig::from_yaml_str(
            r#"
default_ttl_ms: 60000
compression_algorithm: snappy
layers:
  memory:
    max_size: 50
  fs: null
"#,
        )
        .unwrap();

        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.compression_algorithm, CompressionAlgorithm::Snappy);
        assert_eq!(config.layers.memory.max_size, 50);
        assert!(config.layers.fs.is_none());
        assert_eq!(config.cleanup_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_cdn_config_from_env() {
        let config = CdnConfig::from_lookup(lookup(&[
            ("CDN_DEFAULT_TTL_MS", "60000"),
            ("CDN_ENABLE_COMPRESSION", "false"),
            ("CDN_DEFAULT_PROVIDER", "edge-eu"),
        ]))
        .unwrap();

        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert!(!config.enable_compression);
        assert!(config.enable_minification);
        assert_eq!(config.default_provider, "edge-eu");

        let result = CdnConfig::from_lookup(lookup(&[("CDN_DEFAULT_PROVIDER", "")]));
        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[test]
    fn test_config_yaml_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.yaml");
        let config = CacheManagerConfig {
            layers: LayersConfig::memory_only(),
            ..Default::default()
        };
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        assert_eq!(CacheManagerConfig::from_yaml_file(&path).unwrap(), config);
        assert_matches!(
            CacheManagerConfig::from_yaml_file(dir.path().join("missing.yaml")),
            Err(Error::Configuration(_))
        );
    }
}
