//! Cache Metrics
//!
//! Passive counters for hits, misses, sets, errors and latencies. Global
//! counters are cache-line aligned atomics; per-layer counters live in a
//! DashMap keyed by layer name.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Per-Layer Metrics (Cache-Line Aligned)
// =============================================================================

/// Counters for a single layer, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct LayerMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub errors: AtomicU64,
    /// Sum of recorded latencies in microseconds
    pub latency_micros: AtomicU64,
    /// Number of recorded latencies
    pub latency_samples: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<LayerMetrics>() <= CACHE_LINE_SIZE);

impl Default for LayerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            latency_micros: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 8],
        }
    }

    #[inline]
    pub fn record_hit(&self, latency: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_set(&self, latency: Duration) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn record_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.fetch_add(micros, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Hit rate as a percentage (0-100)
    pub fn hit_rate(&self) -> f64 {
        hit_rate(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Create a snapshot of current metrics
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let sets = self.sets.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let avg_latency_ms = if samples == 0 {
            0.0
        } else {
            self.latency_micros.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
        };

        CacheMetricsSnapshot {
            hits,
            misses,
            sets,
            errors,
            hit_rate: hit_rate(hits, misses),
            avg_latency_ms,
            total_operations: hits + misses + sets + errors,
        }
    }
}

/// Hit percentage of all lookups (0 when there were none)
pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time view of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    /// Percentage of lookups that hit (0-100)
    pub hit_rate: f64,
    /// Mean latency of hits and sets in milliseconds
    pub avg_latency_ms: f64,
    pub total_operations: u64,
}

// =============================================================================
// Global Cache Metrics
// =============================================================================

/// Metrics accumulator owned by the cache manager
#[derive(Debug)]
pub struct CacheMetrics {
    enabled: AtomicBool,
    total: LayerMetrics,
    layers: DashMap<String, LayerMetrics>,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CacheMetrics {
    /// Create new metrics; when disabled every record call is a no-op
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            total: LayerMetrics::new(),
            layers: DashMap::new(),
        }
    }

    /// Whether recording is active
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn record(&self, layer: &str, f: impl Fn(&LayerMetrics)) {
        if !self.is_enabled() {
            return;
        }
        f(&self.total);
        if let Some(metrics) = self.layers.get(layer) {
            f(metrics.value());
            return;
        }
        f(self.layers.entry(layer.to_string()).or_default().value());
    }

    pub fn record_hit(&self, layer: &str, latency: Duration) {
        self.record(layer, |m| m.record_hit(latency));
    }

    pub fn record_miss(&self, layer: &str) {
        self.record(layer, |m| m.record_miss());
    }

    pub fn record_set(&self, layer: &str, latency: Duration) {
        self.record(layer, |m| m.record_set(latency));
    }

    pub fn record_error(&self, layer: &str) {
        self.record(layer, |m| m.record_error());
    }

    /// Overall hit rate percentage
    pub fn hit_rate(&self) -> f64 {
        self.total.hit_rate()
    }

    /// Hit rate percentage for one layer (0 when never used)
    pub fn layer_hit_rate(&self, layer: &str) -> f64 {
        self.layers.get(layer).map(|m| m.hit_rate()).unwrap_or(0.0)
    }

    /// Snapshot of the global counters
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        self.total.snapshot()
    }

    /// Snapshot of one layer's counters
    pub fn layer_snapshot(&self, layer: &str) -> CacheMetricsSnapshot {
        self.layers
            .get(layer)
            .map(|m| m.snapshot())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<LayerMetrics>(), CACHE_LINE_SIZE);
        assert!(std::mem::size_of::<LayerMetrics>() <= CACHE_LINE_SIZE);
    }

    #[test]
    fn test_hit_rate_is_percentage() {
        let metrics = CacheMetrics::new(true);

        metrics.record_miss("memory");
        metrics.record_set("memory", Duration::from_micros(200));
        metrics.record_hit("memory", Duration::from_micros(100));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.sets, 1);
        assert_eq!(snapshot.total_operations, 3);
        assert!((snapshot.hit_rate - 50.0).abs() < f64::EPSILON);
        assert!((snapshot.avg_latency_ms - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_per_layer_counters() {
        let metrics = CacheMetrics::new(true);

        metrics.record_hit("memory", Duration::ZERO);
        metrics.record_miss("fs");
        metrics.record_error("fs");

        assert!((metrics.layer_hit_rate("memory") - 100.0).abs() < f64::EPSILON);
        assert_eq!(metrics.layer_hit_rate("fs"), 0.0);
        assert_eq!(metrics.layer_hit_rate("redis"), 0.0);
        assert_eq!(metrics.layer_snapshot("fs").errors, 1);
        assert_eq!(metrics.snapshot().errors, 1);
    }

    #[test]
    fn test_disabled_metrics_record_nothing() {
        let metrics = CacheMetrics::new(false);
        metrics.record_hit("memory", Duration::from_millis(1));
        metrics.record_miss("memory");

        assert_eq!(metrics.snapshot(), CacheMetricsSnapshot::default());
    }
}
