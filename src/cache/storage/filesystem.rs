//! Filesystem Layer
//!
//! One JSON file per key in a cache directory. Survives process restarts.

use crate::cache::entry::{CacheData, StoredEntry};
use crate::cache::storage::{CacheLayer, LayerKind};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Extension of live cache files
const CACHE_EXTENSION: &str = "cache";

// =============================================================================
// Filesystem Cache Configuration
// =============================================================================

/// Configuration for the filesystem layer
#[derive(Debug, Clone)]
pub struct FileSystemCacheConfig {
    /// Directory holding the cache files
    pub directory: PathBuf,
}

impl Default for FileSystemCacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./cache"),
        }
    }
}

// =============================================================================
// Filesystem Cache
// =============================================================================

/// Durable layer writing one file per key
pub struct FileSystemCache {
    directory: PathBuf,
    entry_count: AtomicU64,
    /// Last access (Unix millis, 0 = never)
    last_access_ms: AtomicI64,
    tmp_seq: AtomicU64,
}

impl FileSystemCache {
    /// Create the layer rooted at `directory`
    pub async fn with_path(directory: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(FileSystemCacheConfig {
            directory: directory.into(),
        })
        .await
    }

    /// Create with full config
    ///
    /// The directory is created if missing and scanned to seed the entry
    /// count.
    pub async fn with_config(config: FileSystemCacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.directory).await?;

        let cache = Self {
            directory: config.directory,
            entry_count: AtomicU64::new(0),
            last_access_ms: AtomicI64::new(0),
            tmp_seq: AtomicU64::new(0),
        };

        let existing = cache.cache_files().await?.len() as u64;
        cache.entry_count.store(existing, Ordering::Relaxed);
        debug!(directory = %cache.directory.display(), entries = existing, "Filesystem cache opened");

        Ok(cache)
    }

    /// Root directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file holding `key`
    pub fn file_path(&self, key: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{}", sanitize_key(key), CACHE_EXTENSION))
    }

    async fn cache_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dir = fs::read_dir(&self.directory).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == CACHE_EXTENSION).unwrap_or(false) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Remove a file, reporting whether it existed
    async fn remove_file(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => {
                self.decrement_count();
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn decrement_count(&self) {
        let _ = self
            .entry_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    fn touch(&self) {
        self.last_access_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

/// Replace every character outside `[A-Za-z0-9-_]` with `_`
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl CacheLayer for FileSystemCache {
    fn kind(&self) -> LayerKind {
        LayerKind::FileSystem
    }

    async fn get(&self, key: &str) -> Result<Option<CacheData>> {
        let path = self.file_path(key);

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredEntry = match serde_json::from_slice(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %key, path = %path.display(), error = %e, "Removing unreadable cache file");
                self.remove_file(&path).await?;
                return Ok(None);
            }
        };

        // Another key sanitized to the same file name; it stays untouched
        if stored.key != key {
            debug!(key = %key, stored_key = %stored.key, "Cache file belongs to another key");
            return Ok(None);
        }

        if stored.is_expired() {
            self.remove_file(&path).await?;
            return Ok(None);
        }

        self.touch();
        Ok(Some(stored.into_data()))
    }

    async fn set(&self, key: &str, data: CacheData, ttl: Duration) -> Result<bool> {
        let path = self.file_path(key);
        let body = serde_json::to_vec(&StoredEntry::new(key, &data, ttl))?;

        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("{}.{}.tmp", CACHE_EXTENSION, seq));

        let existed = fs::try_exists(&path).await.unwrap_or(false);
        fs::write(&tmp_path, &body).await?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        if !existed {
            self.entry_count.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
        debug!(key = %key, bytes = body.len(), "Wrote cache file");
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.remove_file(&self.file_path(key)).await
    }

    async fn clear(&self) -> Result<()> {
        for path in self.cache_files().await? {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.entry_count.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn cleanup(&self) -> Result<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let mut removed = 0u64;
        let mut remaining = 0u64;

        for path in self.cache_files().await? {
            let stored = match fs::read(&path).await {
                Ok(raw) => serde_json::from_slice::<StoredEntry>(&raw).ok(),
                Err(_) => continue,
            };

            match stored {
                Some(stored) if stored.is_expired_at(now_ms) => {
                    match fs::remove_file(&path).await {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                // Unreadable files are left for `get` to discard
                _ => remaining += 1,
            }
        }

        self.entry_count.store(remaining, Ordering::Relaxed);
        if removed > 0 {
            debug!(removed, "Filesystem layer removed expired files");
        }
        Ok(removed)
    }

    fn size(&self) -> u64 {
        self.entry_count.load(Ordering::Relaxed)
    }

    fn last_accessed(&self) -> Option<DateTime<Utc>> {
        match self.last_access_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
