//! Cache Entry Types
//!
//! Defines the encoded payload stored by every layer, the in-memory entry
//! with its TTL bookkeeping, and the serialized form used by durable layers.

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// Cache Data
// =============================================================================

/// Encoded value with compression info
///
/// The manager serializes caller values to JSON before handing them to a
/// layer, so `bytes` is either JSON text or its compressed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheData {
    /// The stored bytes
    pub bytes: Bytes,
    /// Size before compression (same as bytes.len() if uncompressed)
    pub original_size: u64,
    /// Compression algorithm applied to `bytes`
    pub compression: CompressionAlgorithm,
}

impl CacheData {
    /// Create uncompressed cache data
    pub fn uncompressed(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self {
            bytes,
            original_size: size,
            compression: CompressionAlgorithm::None,
        }
    }

    /// Create compressed cache data
    pub fn compressed(bytes: Bytes, original_size: u64, algorithm: CompressionAlgorithm) -> Self {
        Self {
            bytes,
            original_size,
            compression: algorithm,
        }
    }

    /// Whether the bytes are compressed
    pub fn is_compressed(&self) -> bool {
        self.compression != CompressionAlgorithm::None
    }

    /// Get the stored size (compressed size if compressed)
    pub fn stored_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Get compression ratio (stored_size / original_size)
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.stored_size() as f64 / self.original_size as f64
        }
    }
}

/// Compression algorithm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Lz4,
    Zstd,
    Snappy,
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Lz4 => write!(f, "lz4"),
            CompressionAlgorithm::Zstd => write!(f, "zstd"),
            CompressionAlgorithm::Snappy => write!(f, "snappy"),
        }
    }
}

impl std::str::FromStr for CompressionAlgorithm {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(CompressionAlgorithm::None),
            "lz4" => Ok(CompressionAlgorithm::Lz4),
            "zstd" => Ok(CompressionAlgorithm::Zstd),
            "snappy" => Ok(CompressionAlgorithm::Snappy),
            other => Err(crate::error::Error::Configuration(format!(
                "unknown compression algorithm: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached value with its lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached data
    pub data: CacheData,
    /// Time when entry was inserted
    pub created_at: DateTime<Utc>,
    /// Absolute expiry (created_at + ttl)
    pub expires_at: DateTime<Utc>,
    /// Time when entry was last read or written
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now
    pub fn new(data: CacheData, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            data,
            created_at: now,
            expires_at: expiry_from(now, ttl),
            last_accessed: now,
        }
    }

    /// Check if the entry is dead at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Remaining time to live, zero once expired
    pub fn remaining_ttl(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Get the stored size in bytes
    pub fn stored_size(&self) -> u64 {
        self.data.stored_size()
    }
}

/// Compute `now + ttl`, saturating at the far future
pub fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// =============================================================================
// Stored Entry (durable layers)
// =============================================================================

/// Serialized form written by the filesystem and Redis layers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    /// Original (unsanitized) key
    pub key: String,
    /// Encoded value bytes
    pub value: Vec<u8>,
    /// Compression applied to `value`
    #[serde(default)]
    pub compression: CompressionAlgorithm,
    /// Size before compression
    pub original_size: u64,
    /// Expiry, Unix millis
    pub expires_at: i64,
    /// Creation time, Unix millis
    pub created_at: i64,
}

impl StoredEntry {
    /// Build a stored entry expiring `ttl` from now
    pub fn new(key: &str, data: &CacheData, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            value: data.bytes.to_vec(),
            compression: data.compression,
            original_size: data.original_size,
            expires_at: expiry_from(now, ttl).timestamp_millis(),
            created_at: now.timestamp_millis(),
        }
    }

    /// Check if the entry is dead at `now_ms`
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }

    /// Convert back into cache data
    pub fn into_data(self) -> CacheData {
        CacheData {
            bytes: Bytes::from(self.value),
            original_size: self.original_size,
            compression: self.compression,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_data_sizes() {
        let raw = CacheData::uncompressed(Bytes::from(r#"{"name":"Ann"}"#));
        assert!(!raw.is_compressed());
        assert_eq!(raw.original_size, 14);
        assert_eq!(raw.stored_size(), raw.original_size);
        assert!((raw.compression_ratio() - 1.0).abs() < 0.001);

        let packed = CacheData::compressed(Bytes::from(vec![0u8; 25]), 200, CompressionAlgorithm::Zstd);
        assert!(packed.is_compressed());
        assert_eq!(packed.stored_size(), 25);
        assert!((packed.compression_ratio() - 0.125).abs() < 0.001);
    }

    #[test]
    fn test_cache_entry_expiry() {
        let data = CacheData::uncompressed(Bytes::from_static(b"42"));

        let entry = CacheEntry::new(data.clone(), Duration::from_secs(3600));
        assert!(!entry.is_expired());
        assert!(entry.remaining_ttl() > Duration::from_secs(3500));

        let entry = CacheEntry::new(data, Duration::from_millis(10));
        let later = entry.created_at + ChronoDuration::milliseconds(11);
        assert!(entry.is_expired_at(later));
        assert!(!entry.is_expired_at(entry.expires_at));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let now = Utc::now();
        assert_eq!(expiry_from(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_stored_entry_layout() {
        let data = CacheData::uncompressed(Bytes::from(r#"{"name":"Ann"}"#));
        let stored = StoredEntry::new("user:1", &data, Duration::from_secs(5));

        let json = serde_json::to_value(&stored).unwrap();
        assert!(json.get("expiresAt").is_some());
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["compression"], "none");
        assert_eq!(stored.expires_at - stored.created_at, 5000);

        assert_eq!(stored.into_data(), data);
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("ZSTD".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Zstd);
        assert!("brotli".parse::<CompressionAlgorithm>().is_err());
    }
}
