//! CDN Metrics
//!
//! Counters for optimizations, edge writes, delivery hits and misses, and
//! errors. Optimizations are also counted per asset type, and errors per
//! kind (asset type or edge operation), in DashMaps.

use crate::cache::metrics::hit_rate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Delivery and optimization counters owned by the CDN manager
#[derive(Debug, Default)]
pub struct CdnMetrics {
    optimizations: AtomicU64,
    /// Sum of optimization times in microseconds
    optimization_micros: AtomicU64,
    /// Sum of savings percentages in hundredths of a percent
    savings_centi: AtomicI64,
    edge_sets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    optimizations_by_type: DashMap<String, u64>,
    errors_by_kind: DashMap<String, u64>,
}

impl CdnMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_optimization(&self, asset_type: &str, savings: f64, elapsed: Duration) {
        self.optimizations.fetch_add(1, Ordering::Relaxed);
        self.optimization_micros.fetch_add(
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        self.savings_centi
            .fetch_add((savings * 100.0).round() as i64, Ordering::Relaxed);
        *self
            .optimizations_by_type
            .entry(asset_type.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_edge_set(&self) {
        self.edge_sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self
            .errors_by_kind
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> CdnMetricsSnapshot {
        let optimizations = self.optimizations.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        let (avg_optimization_ms, avg_savings) = if optimizations == 0 {
            (0.0, 0.0)
        } else {
            (
                self.optimization_micros.load(Ordering::Relaxed) as f64
                    / optimizations as f64
                    / 1000.0,
                self.savings_centi.load(Ordering::Relaxed) as f64 / optimizations as f64 / 100.0,
            )
        };

        CdnMetricsSnapshot {
            optimizations,
            edge_sets: self.edge_sets.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: hit_rate(hits, misses),
            avg_optimization_ms,
            avg_savings,
            errors: self.errors.load(Ordering::Relaxed),
            optimizations_by_type: collect(&self.optimizations_by_type),
            errors_by_kind: collect(&self.errors_by_kind),
        }
    }
}

fn collect(map: &DashMap<String, u64>) -> BTreeMap<String, u64> {
    map.iter().map(|e| (e.key().clone(), *e.value())).collect()
}

/// Point-in-time view of the CDN counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnMetricsSnapshot {
    pub optimizations: u64,
    pub edge_sets: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Percentage of deliveries served from the edge (0-100)
    pub cache_hit_rate: f64,
    pub avg_optimization_ms: f64,
    /// Mean size reduction percentage
    pub avg_savings: f64,
    pub errors: u64,
    pub optimizations_by_type: BTreeMap<String, u64>,
    pub errors_by_kind: BTreeMap<String, u64>,
}
