//! Content ⇄ share URL codec.
//!
//! Content is UTF-8 encoded, DEFLATE compressed (zlib container) and base64
//! encoded into the `data` parameter of a share URL. Parsing accepts every
//! URL generation ever produced.

pub mod compress;
pub mod path;
pub mod payload;
pub mod url;

use crate::error::{Result, UnpakoError};
use crate::types::Timestamp;
use std::sync::Arc;

pub use compress::{Compressor, ZlibCompressor, DEFAULT_MAX_DECOMPRESSED_SIZE};
pub use path::{
    compression_ratio, filename, format_file_size, normalize_filepath, validate_filepath,
    FilepathInfo, DEFAULT_FILEPATH,
};
pub use payload::CompressedPayload;
pub use url::{ParsedUrl, QueryParams, UrlFormat};

/// Codec configuration.
#[derive(Clone, Debug)]
pub struct CodecConfig {
    /// Origin and path share URLs are built on.
    pub base_url: String,

    /// zlib compression level (0-9).
    pub compression_level: u32,

    /// Upper bound on inflated payload size.
    pub max_decompressed_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5173/".to_string(),
            compression_level: 6,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }
}

/// Encodes content into payloads and share URLs, and back.
#[derive(Clone)]
pub struct Codec {
    config: CodecConfig,
    compressor: Arc<dyn Compressor>,
}

impl Codec {
    /// Create a codec backed by zlib.
    pub fn new(config: CodecConfig) -> Self {
        let compressor =
            ZlibCompressor::new(config.compression_level, config.max_decompressed_size);
        Self::with_compressor(config, Arc::new(compressor))
    }

    /// Create a codec with a custom compression primitive.
    pub fn with_compressor(config: CodecConfig, compressor: Arc<dyn Compressor>) -> Self {
        Self { config, compressor }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Compress text content under a logical path.
    pub fn encode(&self, content: &str, filepath: &str) -> Result<CompressedPayload> {
        self.encode_bytes(content.as_bytes(), filepath)
    }

    /// Compress raw bytes (an uploaded file) under a logical path.
    ///
    /// The path is normalized first; an empty path becomes
    /// [`DEFAULT_FILEPATH`].
    pub fn encode_bytes(&self, content: &[u8], filepath: &str) -> Result<CompressedPayload> {
        let mut normalized = normalize_filepath(filepath);
        if normalized.is_empty() {
            normalized = DEFAULT_FILEPATH.to_string();
        }
        validate_filepath(&normalized)?;

        let data = self
            .compressor
            .deflate(content)
            .map_err(|e| UnpakoError::Encoding(e.to_string()))?;

        let now = Timestamp::now();
        Ok(CompressedPayload {
            compressed_size: data.len() as u64,
            data,
            filepath: normalized,
            original_size: content.len() as u64,
            created_at: now,
            modified_at: now,
        })
    }

    /// Inflate a payload back to its original bytes.
    pub fn decode(&self, payload: &CompressedPayload) -> Result<Vec<u8>> {
        self.inflate(&payload.data)
    }

    /// Inflate a payload and require valid UTF-8.
    pub fn decode_text(&self, payload: &CompressedPayload) -> Result<String> {
        String::from_utf8(self.decode(payload)?)
            .map_err(|e| UnpakoError::Decode(format!("content is not UTF-8: {}", e)))
    }

    pub(crate) fn inflate(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.compressor
            .inflate(data)
            .map_err(|e| UnpakoError::Decode(e.to_string()))
    }

    /// Build a share URL for a payload.
    pub fn to_url(&self, payload: &CompressedPayload) -> String {
        url::to_url(&self.config.base_url, payload)
    }

    /// Parse a share URL into a payload.
    pub fn from_url(&self, url: &str) -> Result<CompressedPayload> {
        self.parse_url(url).map(|parsed| parsed.payload)
    }

    /// Parse a share URL, reporting which generation it was.
    pub fn parse_url(&self, url: &str) -> Result<ParsedUrl> {
        url::parse_url(url, self.compressor.as_ref())
    }

    /// Encode content and build its share URL in one step.
    pub fn share_url(&self, content: &str, filepath: &str) -> Result<String> {
        let payload = self.encode(content, filepath)?;
        Ok(self.to_url(&payload))
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct FailingCompressor;

    impl Compressor for FailingCompressor {
        fn deflate(&self, _data: &[u8]) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::Other, "out of memory"))
        }

        fn inflate(&self, _data: &[u8]) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::Other, "out of memory"))
        }
    }

    #[test]
    fn test_encode_decode() {
        let codec = Codec::default();
        let payload = codec.encode("Hello World!", "greetings/hello.txt").unwrap();

        assert_eq!(payload.filepath, "greetings/hello.txt");
        assert_eq!(payload.original_size, 12);
        assert_eq!(payload.compressed_size, payload.data.len() as u64);
        assert_eq!(payload.created_at, payload.modified_at);
        assert_eq!(codec.decode_text(&payload).unwrap(), "Hello World!");
    }

    #[test]
    fn test_encode_normalizes_path() {
        let codec = Codec::default();
        assert_eq!(codec.encode("x", " /a//b.txt/ ").unwrap().filepath, "a/b.txt");
        assert_eq!(codec.encode("x", "").unwrap().filepath, DEFAULT_FILEPATH);
        assert!(matches!(
            codec.encode("x", "bad|name"),
            Err(UnpakoError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_compression_failure_is_encoding_error() {
        let codec = Codec::with_compressor(CodecConfig::default(), Arc::new(FailingCompressor));
        assert!(matches!(
            codec.encode("content", "a.txt"),
            Err(UnpakoError::Encoding(_))
        ));
    }

    #[test]
    fn test_decode_corrupt_payload() {
        let codec = Codec::default();
        let mut payload = codec.encode("some content", "a.txt").unwrap();
        payload.data = b"garbage!".to_vec();
        assert!(matches!(codec.decode(&payload), Err(UnpakoError::Decode(_))));
    }

    #[test]
    fn test_url_roundtrip() {
        let codec = Codec::default();
        let payload = codec.encode("fn main() {}\n", "src/main.rs").unwrap();
        let url = codec.to_url(&payload);

        assert!(url.starts_with("http://localhost:5173/?filepath=src%2Fmain.rs&"));
        let parsed = codec.from_url(&url).unwrap();
        assert_eq!(parsed, payload);
    }
}
