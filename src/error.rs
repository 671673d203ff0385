//! Error types for the cache manager
//!
//! Backend failures are swallowed at the manager boundary and turned into
//! metrics and events. Configuration errors and failures of the source of
//! truth (fetch/write callbacks) are the ones callers see.

use thiserror::Error;

/// Boxed source error produced by caller-supplied fetch/write functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for the cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Routing Errors
    // =========================================================================
    #[error("Cache layer '{layer}' not found")]
    LayerNotFound { layer: String },

    #[error("Cache strategy '{strategy}' not found")]
    StrategyNotFound { strategy: String },

    #[error("CDN provider '{provider}' not found")]
    ProviderNotFound { provider: String },

    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // =========================================================================
    // Encoding Errors
    // =========================================================================
    #[error("Compression error: {0}")]
    Compression(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Source Of Truth Errors
    // =========================================================================
    #[error("Fetch failed for key {key}")]
    Fetch {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Write failed for key {key}")]
    Write {
        key: String,
        #[source]
        source: BoxError,
    },

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a failed fetch function result
    pub fn fetch(key: impl Into<String>, source: anyhow::Error) -> Self {
        Error::Fetch {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Wrap a failed write function result
    pub fn write(key: impl Into<String>, source: anyhow::Error) -> Self {
        Error::Write {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Check if this error is transient (backend may recover on its own)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable { .. }
                | Error::BackendOperationFailed { .. }
                | Error::Redis(_)
                | Error::Io(_)
        )
    }

    /// Check if this error comes from routing or configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::LayerNotFound { .. }
                | Error::StrategyNotFound { .. }
                | Error::ProviderNotFound { .. }
                | Error::InvalidPattern { .. }
                | Error::Yaml(_)
        )
    }

    /// Check if this error was raised by the source of truth
    pub fn is_origin(&self) -> bool {
        matches!(self, Error::Fetch { .. } | Error::Write { .. })
    }
}

/// Result type alias for the cache
pub type Result<T> = std::result::Result<T, Error>;
