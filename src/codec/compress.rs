//! The byte compression primitive behind share payloads.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Default cap on inflated output.
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// Narrow DEFLATE/INFLATE interface the codec depends on.
pub trait Compressor: Send + Sync {
    /// Compress a byte buffer.
    fn deflate(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// Decompress a byte buffer produced by `deflate`.
    fn inflate(&self, data: &[u8]) -> io::Result<Vec<u8>>;
}

/// zlib-wrapped DEFLATE, the container every existing share link uses.
#[derive(Clone, Debug)]
pub struct ZlibCompressor {
    level: u32,
    max_output: usize,
}

impl ZlibCompressor {
    pub fn new(level: u32, max_output: usize) -> Self {
        Self {
            level: level.min(9),
            max_output,
        }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self::new(6, DEFAULT_MAX_DECOMPRESSED_SIZE)
    }
}

impl Compressor for ZlibCompressor {
    fn deflate(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(data)?;
        encoder.finish()
    }

    /// Inflate with bounded output, so a tiny link cannot expand into an
    /// arbitrarily large buffer.
    fn inflate(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(data);
        let mut inflated = Vec::new();
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = decoder.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }

            if inflated.len().saturating_add(bytes_read) > self.max_output {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("inflated data exceeds {} bytes", self.max_output),
                ));
            }

            inflated.extend_from_slice(&buffer[..bytes_read]);
        }

        Ok(inflated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inflate_known_stream() {
        let compressor = ZlibCompressor::default();
        let stream = [
            0x78, 0x9c, 0xf3, 0x48, 0xcd, 0xc9, 0xc9, 0x57, 0x08, 0xcf, 0x2f, 0xca, 0x49, 0x51,
            0x04, 0x00, 0x1c, 0x49, 0x04, 0x3e,
        ];
        assert_eq!(compressor.inflate(&stream).unwrap(), b"Hello World!");
    }

    #[test]
    fn test_deflate_then_inflate() {
        let compressor = ZlibCompressor::default();
        let text = "line\n".repeat(200);
        let compressed = compressor.deflate(text.as_bytes()).unwrap();
        assert!(compressed.len() < text.len());
        assert_eq!(compressor.inflate(&compressed).unwrap(), text.as_bytes());
    }

    #[test]
    fn test_inflate_rejects_garbage() {
        let compressor = ZlibCompressor::default();
        assert!(compressor.inflate(b"not a zlib stream").is_err());
    }

    #[test]
    fn test_inflate_respects_limit() {
        let compressor = ZlibCompressor::new(6, 1024);
        let bomb = compressor.deflate(&vec![0u8; 4096]).unwrap();
        let err = compressor.inflate(&bomb).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
