//! Health and introspection reports

use crate::cache::storage::LayerKind;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Layer or overall health, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of probing one layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerHealth {
    pub status: HealthStatus,
    /// Round-trip time of the probe in milliseconds
    pub latency_ms: f64,
    /// Entries held by the layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Hit rate percentage for the layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated health of every layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealthStatus {
    /// Worst status across layers
    pub status: HealthStatus,
    pub layers: IndexMap<String, LayerHealth>,
    pub issues: Vec<String>,
}

impl CacheHealthStatus {
    /// Build from per-layer results; an empty set is healthy
    pub fn from_layers(layers: IndexMap<String, LayerHealth>) -> Self {
        let status = layers
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        let issues = layers
            .iter()
            .filter(|(_, h)| h.status != HealthStatus::Healthy)
            .map(|(name, h)| match &h.error {
                Some(error) => format!("Layer {} is {}: {}", name, h.status, error),
                None => format!("Layer {} is {}", name, h.status),
            })
            .collect();

        Self {
            status,
            layers,
            issues,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Introspection record for one layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInfo {
    pub name: String,
    pub kind: LayerKind,
    pub size: u64,
    pub max_size: Option<u64>,
    /// Hit rate percentage for this layer
    pub hit_rate: f64,
    pub last_accessed: Option<DateTime<Utc>>,
}
