//! CDN Events
//!
//! Emitted by [`CdnManager`] on a broadcast channel.
//!
//! [`CdnManager`]: crate::cdn::CdnManager

use serde::{Deserialize, Serialize};

/// Events emitted by the CDN manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CdnEvent {
    AssetOptimized {
        path: String,
        savings: f64,
    },

    /// The original asset was served unoptimized
    OptimizationFailed {
        path: String,
        error: String,
    },

    EdgeCached {
        key: String,
        provider: String,
    },

    EdgeCacheFailed {
        path: String,
        provider: String,
        error: String,
    },

    Purged {
        pattern: String,
        provider: String,
    },

    PurgeFailed {
        pattern: String,
        provider: String,
        error: String,
    },

    Warmed {
        path: String,
    },

    WarmFailed {
        path: String,
        error: String,
    },

    ContentHit {
        path: String,
    },

    ContentMiss {
        path: String,
    },

    DeliveryFailed {
        path: String,
        error: String,
    },
}

impl CdnEvent {
    /// Stable event name (`<area>:<name>`)
    pub fn name(&self) -> &'static str {
        match self {
            CdnEvent::AssetOptimized { .. } => "asset:optimized",
            CdnEvent::OptimizationFailed { .. } => "asset:optimization_failed",
            CdnEvent::EdgeCached { .. } => "edge:cached",
            CdnEvent::EdgeCacheFailed { .. } => "edge:cache_failed",
            CdnEvent::Purged { .. } => "edge:purged",
            CdnEvent::PurgeFailed { .. } => "edge:purge_failed",
            CdnEvent::Warmed { .. } => "cache:warmed",
            CdnEvent::WarmFailed { .. } => "cache:warm_failed",
            CdnEvent::ContentHit { .. } => "content:cache_hit",
            CdnEvent::ContentMiss { .. } => "content:cache_miss",
            CdnEvent::DeliveryFailed { .. } => "content:delivery_failed",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CdnEvent::OptimizationFailed { .. }
                | CdnEvent::EdgeCacheFailed { .. }
                | CdnEvent::PurgeFailed { .. }
                | CdnEvent::WarmFailed { .. }
                | CdnEvent::DeliveryFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_and_json() {
        let event = CdnEvent::EdgeCached {
            key: "/app.js".into(),
            provider: "default".into(),
        };
        assert_eq!(event.name(), "edge:cached");
        assert!(!event.is_error());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "edge_cached");
        assert_eq!(json["provider"], "default");

        let failed = CdnEvent::DeliveryFailed {
            path: "/x".into(),
            error: "origin down".into(),
        };
        assert_eq!(failed.name(), "content:delivery_failed");
        assert!(failed.is_error());
    }
}
