//! Core types shared by the codec and the version store.

use crate::codec::payload::{serde_base64, CompressedPayload};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since Unix epoch.
///
/// Serialized as a bare integer, which is what share URLs and exported
/// history files carry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Timestamp(millis)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 of a version's compressed bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(ContentHash(arr))
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = hex::FromHexError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ContentHash::from_hex(&s)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One immutable snapshot in a file's version chain.
///
/// Only `is_latest` ever changes after the row is written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    /// Logical path this version belongs to.
    pub filepath: String,

    /// Opaque unique id.
    pub version_id: String,

    /// 1-based position in the chain.
    #[serde(rename = "version")]
    pub version_number: u64,

    /// Uncompressed size in bytes.
    pub size: u64,

    /// Compressed size in bytes.
    pub compressed_size: u64,

    /// Compressed bytes, base64 in JSON.
    #[serde(with = "serde_base64")]
    pub data: Vec<u8>,

    pub created_at: Timestamp,

    #[serde(default)]
    pub modified_at: Timestamp,

    /// Cached shareable URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    pub is_latest: bool,

    /// SHA-256 of the inflated content. Absent on rows written before
    /// hashes were tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
}

impl FileVersion {
    /// The version's content as a codec payload.
    pub fn to_payload(&self) -> CompressedPayload {
        CompressedPayload {
            data: self.data.clone(),
            filepath: self.filepath.clone(),
            original_size: self.size,
            compressed_size: self.compressed_size,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

/// Denormalized rollup for one logical path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub filepath: String,
    pub latest_version: u64,
    pub latest_version_id: String,
    pub total_versions: u64,
    pub original_created_at: Timestamp,
    pub last_modified_at: Timestamp,
    /// Running sum of `size` over the chain.
    pub total_size: u64,
    /// Running sum of `compressed_size` over the chain.
    pub total_compressed_size: u64,
}

/// Aggregate statistics across every tracked path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionStats {
    pub total_files: u64,
    pub total_versions: u64,
    pub total_size: u64,
    pub total_compressed_size: u64,
}

/// Outcome of a bulk import.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Versions written to the store.
    pub imported: usize,
    /// Versions whose id already existed.
    pub skipped: usize,
    /// Per-record failures; the import continues past them.
    pub errors: Vec<String>,
}

impl ImportReport {
    pub fn success(&self) -> bool {
        self.imported > 0 && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_roundtrip() {
        let hash = ContentHash::from_bytes(b"hello world");
        let parsed = ContentHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_file_version_json_shape() {
        let version = FileVersion {
            filepath: "notes/todo.txt".into(),
            version_id: "abc".into(),
            version_number: 2,
            size: 5,
            compressed_size: 3,
            data: vec![1, 2, 3],
            created_at: Timestamp(10),
            modified_at: Timestamp(10),
            url: None,
            is_latest: true,
            content_hash: None,
        };

        let value = serde_json::to_value(&version).unwrap();
        assert_eq!(value["version"], 2);
        assert_eq!(value["versionId"], "abc");
        assert_eq!(value["isLatest"], true);
        assert_eq!(value["data"], "AQID");
        assert!(value.get("url").is_none());
    }

    #[test]
    fn test_row_without_hash_deserializes() {
        let version: FileVersion = serde_json::from_value(serde_json::json!({
            "filepath": "a.txt",
            "versionId": "v1",
            "version": 1,
            "size": 3,
            "compressedSize": 3,
            "data": "AQID",
            "createdAt": 1,
            "isLatest": true
        }))
        .unwrap();

        assert_eq!(version.modified_at, Timestamp(0));
        assert!(version.content_hash.is_none());
    }

    #[test]
    fn test_import_report_success() {
        let mut report = ImportReport::default();
        assert!(!report.success());
        report.imported = 2;
        assert!(report.success());
        report.errors.push("bad record".into());
        assert!(!report.success());
    }
}
