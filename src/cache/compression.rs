//! Compression Support
//!
//! Pluggable compression for cached payloads, gated by a size threshold,
//! with fallback to the uncompressed bytes on failure.

use crate::cache::entry::CacheData;
use crate::error::{Error, Result};
use bytes::Bytes;

pub use crate::cache::entry::CompressionAlgorithm;

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Whether compression is applied at all
    pub enabled: bool,
    /// Algorithm used for new writes
    pub algorithm: CompressionAlgorithm,
    /// Payloads must be strictly larger than this to be compressed
    pub threshold_bytes: u64,
    /// Compression level (algorithm-specific)
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: CompressionAlgorithm::Lz4,
            threshold_bytes: 1024,
            level: 3,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through compressor
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 block compressor (size-prefixed)
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::with_level(4)
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::Compression(format!("LZ4 compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None)
            .map_err(|e| Error::Compression(format!("LZ4 decompression failed: {}", e)))
    }
}

/// Zstd compressor
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::with_level(3)
    }
}

impl Compressor for ZstdCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zstd
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level)
            .map_err(|e| Error::Compression(format!("Zstd compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data)
            .map_err(|e| Error::Compression(format!("Zstd decompression failed: {}", e)))
    }
}

/// Snappy raw-format compressor
#[derive(Default)]
pub struct SnappyCompressor;

impl Compressor for SnappyCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Snappy
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Error::Compression(format!("Snappy compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::Compression(format!("Snappy decompression failed: {}", e)))
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Applies the configured compression policy to encoded payloads
pub struct CompressionManager {
    config: CompressionConfig,
    lz4: Lz4Compressor,
    zstd: ZstdCompressor,
    snappy: SnappyCompressor,
    noop: NoopCompressor,
}

impl CompressionManager {
    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            lz4: Lz4Compressor::with_level(config.level),
            zstd: ZstdCompressor::with_level(config.level),
            snappy: SnappyCompressor,
            noop: NoopCompressor,
            config,
        }
    }

    fn compressor(&self, algorithm: CompressionAlgorithm) -> &dyn Compressor {
        match algorithm {
            CompressionAlgorithm::None => &self.noop,
            CompressionAlgorithm::Lz4 => &self.lz4,
            CompressionAlgorithm::Zstd => &self.zstd,
            CompressionAlgorithm::Snappy => &self.snappy,
        }
    }

    /// Whether a payload of `len` bytes qualifies for compression
    pub fn should_compress(&self, len: usize) -> bool {
        self.config.enabled
            && self.config.algorithm != CompressionAlgorithm::None
            && len as u64 > self.config.threshold_bytes
    }

    /// Encode a serialized payload, compressing it when it qualifies
    ///
    /// Falls back to the raw bytes if compression fails or does not shrink
    /// the payload.
    pub fn encode(&self, raw: Vec<u8>) -> CacheData {
        if !self.should_compress(raw.len()) {
            return CacheData::uncompressed(raw);
        }

        let algorithm = self.config.algorithm;
        match self.compressor(algorithm).compress(&raw) {
            Ok(compressed) if compressed.len() < raw.len() => {
                CacheData::compressed(Bytes::from(compressed), raw.len() as u64, algorithm)
            }
            Ok(_) => CacheData::uncompressed(raw),
            Err(e) => {
                tracing::warn!(algorithm = %algorithm, error = %e, "Compression failed, storing uncompressed");
                CacheData::uncompressed(raw)
            }
        }
    }

    /// Decode stored data back into the serialized payload
    pub fn decode(&self, data: &CacheData) -> Result<Bytes> {
        if !data.is_compressed() {
            return Ok(data.bytes.clone());
        }
        let decompressed = self.compressor(data.compression).decompress(&data.bytes)?;
        Ok(Bytes::from(decompressed))
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::with_config(CompressionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATA: &[u8] = br#"{"id":1,"name":"Ann","roles":["admin","editor"],"active":true},"#;

    fn repetitive(len: usize) -> Vec<u8> {
        TEST_DATA.iter().copied().cycle().take(len).collect()
    }

    #[test]
    fn test_compressors_shrink_repetitive_data() {
        let compressors: Vec<Box<dyn Compressor>> = vec![
            Box::new(Lz4Compressor::default()),
            Box::new(ZstdCompressor::default()),
            Box::new(SnappyCompressor),
        ];

        let data = repetitive(4096);
        for compressor in compressors {
            let compressed = compressor.compress(&data).unwrap();
            assert!(
                compressed.len() < data.len(),
                "{} did not shrink the payload",
                compressor.algorithm()
            );
            assert_eq!(compressor.decompress(&compressed).unwrap(), data);
        }
    }

    #[test]
    fn test_threshold_gates_compression() {
        let manager = CompressionManager::with_config(CompressionConfig {
            threshold_bytes: 1024,
            ..Default::default()
        });

        assert!(!manager.should_compress(1024));
        assert!(manager.should_compress(1025));

        let small = manager.encode(b"tiny".to_vec());
        assert!(!small.is_compressed());
        assert_eq!(small.bytes.as_ref(), b"tiny");

        let large = manager.encode(repetitive(8192));
        assert_eq!(large.compression, CompressionAlgorithm::Lz4);
        assert_eq!(large.original_size, 8192);
        assert_eq!(manager.decode(&large).unwrap().as_ref(), repetitive(8192).as_slice());
    }

    #[test]
    fn test_disabled_never_compresses() {
        let manager = CompressionManager::with_config(CompressionConfig {
            enabled: false,
            ..Default::default()
        });

        let data = manager.encode(repetitive(8192));
        assert!(!data.is_compressed());
        assert_eq!(data.stored_size(), 8192);
    }

    #[test]
    fn test_incompressible_data_stays_raw() {
        let manager = CompressionManager::with_config(CompressionConfig {
            algorithm: CompressionAlgorithm::Zstd,
            threshold_bytes: 16,
            ..Default::default()
        });

        // Two distinct bytes: zstd framing overhead outweighs any gain
        let data = manager.encode(vec![0x17, 0x42].repeat(9));
        if data.is_compressed() {
            assert!(data.stored_size() < 18);
        } else {
            assert_eq!(data.stored_size(), 18);
        }
        assert_eq!(manager.decode(&data).unwrap().len(), 18);
    }

    #[test]
    fn test_corrupt_payload_fails_to_decode() {
        let manager = CompressionManager::default();
        let bogus = CacheData::compressed(Bytes::from_static(b"not zstd"), 100, CompressionAlgorithm::Zstd);
        assert!(matches!(manager.decode(&bogus), Err(Error::Compression(_))));
    }
}
