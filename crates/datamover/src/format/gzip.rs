//! Single-member gzip compression for buffered transfers.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::{MoverError, Result};

/// Extension token appended to compressed payloads.
pub const EXTENSION: &str = ".gz";

const MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether the buffer starts with the gzip magic bytes.
pub fn is_gzip(buffer: &[u8]) -> bool {
    buffer.starts_with(&MAGIC)
}

pub fn compress(buffer: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(buffer.len() / 4), Compression::default());
    encoder.write_all(buffer)?;
    let compressed = encoder.finish()?;

    debug!("Compressed {} -> {} bytes", buffer.len(), compressed.len());
    Ok(compressed)
}

/// Fails with a decode error on truncated or non-gzip input.
pub fn decompress(buffer: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(buffer);
    let mut decompressed = Vec::with_capacity(buffer.len() * 4);
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| MoverError::Decode(format!("gzip: {}", e)))?;

    debug!("Decompressed {} -> {} bytes", buffer.len(), decompressed.len());
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let data = b"id,name\n1,widget\n2,gadget\n".repeat(50);
        let compressed = compress(&data).unwrap();
        assert!(is_gzip(&compressed));
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_empty_round_trip() {
        let compressed = compress(b"").unwrap();
        assert_eq!(decompress(&compressed).unwrap(), b"");
    }

    #[test]
    fn test_rejects_plain_text() {
        assert!(!is_gzip(b"id,name\n"));
        assert!(matches!(decompress(b"id,name\n"), Err(MoverError::Decode(_))));
    }

    #[test]
    fn test_rejects_truncated() {
        let compressed = compress(&b"abc".repeat(1000)).unwrap();
        let truncated = &compressed[..compressed.len() / 2];
        assert!(matches!(decompress(truncated), Err(MoverError::Decode(_))));
    }
}
