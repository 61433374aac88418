//! Payload compression for the durable log

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;

const ZSTD_LEVEL: i32 = 3;

/// Compression algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Zstd,
}

impl CompressionAlgorithm {
    /// One-byte tag stored in each log record.
    pub fn tag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Zstd => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionAlgorithm::None),
            1 => Ok(CompressionAlgorithm::Zstd),
            other => Err(Error::Serialization(format!(
                "Unknown compression tag {}",
                other
            ))),
        }
    }
}

/// Compress data using specified algorithm
pub fn compress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zstd => {
            let mut encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)
                .map_err(|e| Error::Storage(format!("Failed to create zstd encoder: {}", e)))?;
            encoder
                .write_all(data)
                .map_err(|e| Error::Storage(format!("Failed to compress: {}", e)))?;
            encoder
                .finish()
                .map_err(|e| Error::Storage(format!("Failed to finish compression: {}", e)))
        }
    }
}

/// Decompress data using specified algorithm
pub fn decompress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zstd => zstd::decode_all(data)
            .map_err(|e| Error::Serialization(format!("Failed to decompress: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_shrinks_repetitive_rows() -> Result<()> {
        let row = br#"{"row_id":1,"column_value":{"amount":"100","txtype":"4"}}"#.repeat(20);
        let compressed = compress(&row, CompressionAlgorithm::Zstd)?;
        assert!(compressed.len() < row.len());
        assert_eq!(decompress(&compressed, CompressionAlgorithm::Zstd)?, row);
        Ok(())
    }

    #[test]
    fn test_tags() -> Result<()> {
        assert_eq!(CompressionAlgorithm::from_tag(1)?, CompressionAlgorithm::Zstd);
        assert_eq!(CompressionAlgorithm::None.tag(), 0);
        assert!(CompressionAlgorithm::from_tag(7).is_err());
        Ok(())
    }

    #[test]
    fn test_corrupt_zstd_payload() {
        let err = decompress(b"definitely not zstd", CompressionAlgorithm::Zstd);
        assert!(matches!(err, Err(Error::Serialization(_))));
    }
}
