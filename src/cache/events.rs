//! Cache Events
//!
//! Lifecycle events emitted by the cache manager. Collaborators subscribe
//! through [`CacheManager::subscribe`].
//!
//! [`CacheManager::subscribe`]: crate::cache::CacheManager::subscribe

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a lookup missed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// Caching disabled globally or skipped for this call
    Disabled,
    /// Key absent or expired
    NotFound,
    /// Backend failed or the stored value could not be decoded
    Error,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissReason::Disabled => write!(f, "disabled"),
            MissReason::NotFound => write!(f, "not_found"),
            MissReason::Error => write!(f, "error"),
        }
    }
}

/// Events emitted by the cache manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    Hit {
        key: String,
        layer: String,
    },

    Miss {
        key: String,
        layer: String,
        reason: MissReason,
    },

    Set {
        key: String,
        layer: String,
        ttl_ms: u64,
        compressed: bool,
    },

    Delete {
        key: String,
        layer: String,
    },

    Clear {
        layer: String,
    },

    /// A cache-layer failure that was swallowed
    Error {
        key: Option<String>,
        layer: Option<String>,
        operation: String,
        error: String,
    },

    /// A stale copy from another layer replaced a failed fetch
    StaleServed {
        key: String,
        layer: String,
    },

    Refreshed {
        key: String,
    },

    WriteBehindSucceeded {
        key: String,
    },

    WriteBehindFailed {
        key: String,
        error: String,
    },

    Tagged {
        key: String,
        tags: Vec<String>,
    },

    InvalidatedByTag {
        tag: String,
        count: usize,
    },

    Warmed {
        key: String,
    },

    WarmFailed {
        key: String,
        error: String,
    },

    CleanupCompleted {
        removed: u64,
    },

    CleanupError {
        layer: String,
        error: String,
    },
}

impl CacheEvent {
    /// Create an Error event
    pub fn error(
        key: Option<&str>,
        layer: Option<&str>,
        operation: &str,
        error: impl fmt::Display,
    ) -> Self {
        CacheEvent::Error {
            key: key.map(str::to_string),
            layer: layer.map(str::to_string),
            operation: operation.to_string(),
            error: error.to_string(),
        }
    }

    /// Stable event name (`cache:<name>`)
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "cache:hit",
            CacheEvent::Miss { .. } => "cache:miss",
            CacheEvent::Set { .. } => "cache:set",
            CacheEvent::Delete { .. } => "cache:delete",
            CacheEvent::Clear { .. } => "cache:clear",
            CacheEvent::Error { .. } => "cache:error",
            CacheEvent::StaleServed { .. } => "cache:stale_served",
            CacheEvent::Refreshed { .. } => "cache:refreshed",
            CacheEvent::WriteBehindSucceeded { .. } => "cache:write_behind_success",
            CacheEvent::WriteBehindFailed { .. } => "cache:write_behind_error",
            CacheEvent::Tagged { .. } => "cache:tagged",
            CacheEvent::InvalidatedByTag { .. } => "cache:invalidated_by_tag",
            CacheEvent::Warmed { .. } => "cache:warmed",
            CacheEvent::WarmFailed { .. } => "cache:warm_failed",
            CacheEvent::CleanupCompleted { .. } => "cache:cleanup_completed",
            CacheEvent::CleanupError { .. } => "cache:cleanup_error",
        }
    }

    /// Get the key associated with this event (if any)
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key, .. }
            | CacheEvent::Set { key, .. }
            | CacheEvent::Delete { key, .. }
            | CacheEvent::StaleServed { key, .. }
            | CacheEvent::Refreshed { key }
            | CacheEvent::WriteBehindSucceeded { key }
            | CacheEvent::WriteBehindFailed { key, .. }
            | CacheEvent::Tagged { key, .. }
            | CacheEvent::Warmed { key }
            | CacheEvent::WarmFailed { key, .. } => Some(key),
            CacheEvent::Error { key, .. } => key.as_deref(),
            _ => None,
        }
    }

    /// Get the layer associated with this event (if any)
    pub fn layer(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { layer, .. }
            | CacheEvent::Miss { layer, .. }
            | CacheEvent::Set { layer, .. }
            | CacheEvent::Delete { layer, .. }
            | CacheEvent::Clear { layer }
            | CacheEvent::StaleServed { layer, .. }
            | CacheEvent::CleanupError { layer, .. } => Some(layer),
            CacheEvent::Error { layer, .. } => layer.as_deref(),
            _ => None,
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CacheEvent::Error { .. }
                | CacheEvent::WriteBehindFailed { .. }
                | CacheEvent::WarmFailed { .. }
                | CacheEvent::CleanupError { .. }
        )
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "{} {}", self.name(), key),
            None => write!(f, "{}", self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let hit = CacheEvent::Hit {
            key: "user:1".into(),
            layer: "memory".into(),
        };
        assert_eq!(hit.name(), "cache:hit");
        assert_eq!(hit.key(), Some("user:1"));
        assert_eq!(hit.layer(), Some("memory"));
        assert!(!hit.is_error());
        assert_eq!(hit.to_string(), "cache:hit user:1");

        let err = CacheEvent::error(None, Some("redis"), "clear", "connection refused");
        assert_eq!(err.name(), "cache:error");
        assert_eq!(err.key(), None);
        assert_eq!(err.layer(), Some("redis"));
        assert!(err.is_error());
    }

    #[test]
    fn test_event_serialization() {
        let event = CacheEvent::InvalidatedByTag {
            tag: "users".into(),
            count: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "invalidated_by_tag");
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn test_miss_reason_display() {
        assert_eq!(MissReason::Disabled.to_string(), "disabled");
        assert_eq!(MissReason::NotFound.to_string(), "not_found");
    }
}
