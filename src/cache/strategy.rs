//! Cache Strategies
//!
//! Named access patterns over a [`CacheManager`]. Strategies work on JSON
//! values so they can be stored in the manager's registry and picked by
//! name at runtime.

use crate::cache::manager::CacheManager;
use crate::cache::options::{DeleteOptions, GetOptions, GetOrSetOptions, SetOptions};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Produces the authoritative value for a key
pub type Loader = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Value>> + Send>;

/// Persists a value to the source of truth
pub type Writer = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

// =============================================================================
// Strategy Kind
// =============================================================================

/// Built-in access patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Aside,
    ReadThrough,
    WriteThrough,
    WriteBehind,
}

impl StrategyKind {
    /// All built-in kinds, in registration order
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Aside,
        StrategyKind::WriteThrough,
        StrategyKind::WriteBehind,
        StrategyKind::ReadThrough,
    ];

    /// Registry name
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Aside => "aside",
            StrategyKind::ReadThrough => "read-through",
            StrategyKind::WriteThrough => "write-through",
            StrategyKind::WriteBehind => "write-behind",
        }
    }

    /// Create the built-in implementation
    pub fn build(self) -> Arc<dyn CacheStrategy> {
        match self {
            StrategyKind::Aside => Arc::new(CacheAside),
            StrategyKind::ReadThrough => Arc::new(ReadThrough),
            StrategyKind::WriteThrough => Arc::new(WriteThrough),
            StrategyKind::WriteBehind => Arc::new(WriteBehind),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::StrategyNotFound {
                strategy: s.to_string(),
            })
    }
}

// =============================================================================
// CacheStrategy Trait
// =============================================================================

/// An access pattern combining the cache with a source of truth
#[async_trait]
pub trait CacheStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Read a value, consulting the loader when the pattern calls for it
    async fn read(&self, cache: &CacheManager, key: &str, loader: Option<Loader>)
        -> Result<Option<Value>>;

    /// Write a value, persisting through the writer when the pattern calls for it
    async fn write(
        &self,
        cache: &CacheManager,
        key: &str,
        value: Value,
        writer: Option<Writer>,
    ) -> Result<bool>;
}

fn require_loader(kind: StrategyKind, loader: Option<Loader>) -> Result<Loader> {
    loader.ok_or_else(|| Error::Configuration(format!("{} strategy requires a loader", kind)))
}

fn require_writer(kind: StrategyKind, writer: Option<Writer>) -> Result<Writer> {
    writer.ok_or_else(|| Error::Configuration(format!("{} strategy requires a writer", kind)))
}

/// Caller owns both the cache and the source of truth
pub struct CacheAside;

#[async_trait]
impl CacheStrategy for CacheAside {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Aside
    }

    async fn read(
        &self,
        cache: &CacheManager,
        key: &str,
        loader: Option<Loader>,
    ) -> Result<Option<Value>> {
        if let Some(value) = cache.get::<Value>(key, GetOptions::default()).await? {
            return Ok(Some(value));
        }
        let Some(loader) = loader else {
            return Ok(None);
        };

        let value = loader().await.map_err(|e| Error::fetch(key, e))?;
        cache.set(key, &value, SetOptions::default()).await?;
        Ok(Some(value))
    }

    async fn write(
        &self,
        cache: &CacheManager,
        key: &str,
        value: Value,
        writer: Option<Writer>,
    ) -> Result<bool> {
        match writer {
            // Persist, then drop the cached copy so the next read reloads it
            Some(writer) => {
                writer(value).await.map_err(|e| Error::write(key, e))?;
                cache.delete(key, DeleteOptions::default()).await?;
                Ok(true)
            }
            None => cache.set(key, &value, SetOptions::default()).await,
        }
    }
}

/// The cache loads missing values itself
pub struct ReadThrough;

#[async_trait]
impl CacheStrategy for ReadThrough {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ReadThrough
    }

    async fn read(
        &self,
        cache: &CacheManager,
        key: &str,
        loader: Option<Loader>,
    ) -> Result<Option<Value>> {
        let loader = require_loader(self.kind(), loader)?;
        cache
            .get_or_set(key, loader, GetOrSetOptions::default())
            .await
            .map(Some)
    }

    async fn write(
        &self,
        cache: &CacheManager,
        key: &str,
        value: Value,
        _writer: Option<Writer>,
    ) -> Result<bool> {
        cache.set(key, &value, SetOptions::default()).await
    }
}

/// Writes reach the source of truth before the cache
pub struct WriteThrough;

#[async_trait]
impl CacheStrategy for WriteThrough {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WriteThrough
    }

    async fn read(
        &self,
        cache: &CacheManager,
        key: &str,
        _loader: Option<Loader>,
    ) -> Result<Option<Value>> {
        cache.get(key, GetOptions::default()).await
    }

    async fn write(
        &self,
        cache: &CacheManager,
        key: &str,
        value: Value,
        writer: Option<Writer>,
    ) -> Result<bool> {
        let writer = require_writer(self.kind(), writer)?;
        cache
            .write_through(key, value, move |v| writer(v), SetOptions::default())
            .await
    }
}

/// Writes land in the cache first and reach the source of truth later
pub struct WriteBehind;

#[async_trait]
impl CacheStrategy for WriteBehind {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WriteBehind
    }

    async fn read(
        &self,
        cache: &CacheManager,
        key: &str,
        _loader: Option<Loader>,
    ) -> Result<Option<Value>> {
        cache.get(key, GetOptions::default()).await
    }

    async fn write(
        &self,
        cache: &CacheManager,
        key: &str,
        value: Value,
        writer: Option<Writer>,
    ) -> Result<bool> {
        let writer = require_writer(self.kind(), writer)?;
        cache
            .write_behind(key, value, move |v| writer(v), SetOptions::default())
            .await
    }
}
