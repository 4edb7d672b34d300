//! Error types for the codec and the version store.

use thiserror::Error;

/// Main error type for codec and store operations.
#[derive(Debug, Error)]
pub enum UnpakoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to compress content: {0}")]
    Encoding(String),

    #[error("Failed to decode payload: {0}")]
    Decode(String),

    #[error("Invalid share URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid file path: {0:?}")]
    InvalidPath(String),

    #[error("Schema migration to version {version} failed: {reason}")]
    SchemaMigration { version: u32, reason: String },

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl From<serde_json::Error> for UnpakoError {
    fn from(e: serde_json::Error) -> Self {
        UnpakoError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for UnpakoError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        UnpakoError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for UnpakoError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        UnpakoError::Deserialization(e.to_string())
    }
}

impl From<base64::DecodeError> for UnpakoError {
    fn from(e: base64::DecodeError) -> Self {
        UnpakoError::Decode(format!("invalid base64: {}", e))
    }
}

/// Result type for codec and store operations.
pub type Result<T> = std::result::Result<T, UnpakoError>;
