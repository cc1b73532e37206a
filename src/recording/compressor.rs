// src/recording/compressor.rs
//! zstd compression for archived record payloads

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Compression levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// zstd level 1
    Fast,

    /// zstd level 3
    Balanced,

    /// zstd level 19
    Best,
}

impl CompressionLevel {
    pub fn as_i32(&self) -> i32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 3,
            CompressionLevel::Best => 19,
        }
    }
}

/// Compressor using zstd
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    pub fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = zstd::encode_all(data, self.level.as_i32()).map_err(|e| {
            EngineError::CompressionFailed(format!("Compression error: {}", e))
        })?;

        debug!(
            "Compressed {} bytes -> {} bytes at {:?}",
            data.len(),
            compressed.len(),
            self.level
        );

        Ok(compressed)
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| {
            EngineError::CompressionFailed(format!("Decompression error: {}", e))
        })
    }

    /// Serialize `value` as JSON and compress it
    pub fn pack<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(value).map_err(|e| {
            EngineError::CompressionFailed(format!("Serialization error: {}", e))
        })?;
        self.compress(&json)
    }

    /// Inverse of [`Compressor::pack`]
    pub fn unpack<T: serde::de::DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        let json = self.decompress(data)?;
        serde_json::from_slice(&json).map_err(|e| {
            EngineError::CompressionFailed(format!("Deserialization error: {}", e))
        })
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionLevel::Balanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{HeaderList, OutboundRequest};

    #[test]
    fn test_compression_levels() {
        assert_eq!(CompressionLevel::Fast.as_i32(), 1);
        assert_eq!(CompressionLevel::Balanced.as_i32(), 3);
        assert_eq!(CompressionLevel::Best.as_i32(), 19);
    }

    #[test]
    fn test_header_heavy_payload_shrinks() {
        let compressor = Compressor::new(CompressionLevel::Balanced);
        let headers: HeaderList = (0..200)
            .map(|i| (format!("X-Trace-{}", i), "abcdefabcdef".to_string()))
            .collect();
        let request = OutboundRequest {
            headers,
            ..OutboundRequest::get("http://example.test/")
        };

        let packed = compressor.pack(&request).unwrap();
        let json_len = serde_json::to_vec(&request).unwrap().len();
        assert!(packed.len() * 4 < json_len);

        let unpacked: OutboundRequest = compressor.unpack(&packed).unwrap();
        assert_eq!(unpacked, request);
    }

    #[test]
    fn test_corrupt_input() {
        let compressor = Compressor::default();
        assert!(matches!(
            compressor.decompress(b"definitely not zstd"),
            Err(EngineError::CompressionFailed(_))
        ));
    }

    #[test]
    fn test_level_config_names() {
        let level: CompressionLevel = serde_json::from_str("\"best\"").unwrap();
        assert_eq!(level, CompressionLevel::Best);
    }
}
