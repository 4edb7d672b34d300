//! # Unpako
//!
//! Share text and files as compressed URLs, and keep a local, versioned
//! history of everything shared or opened.
//!
//! ## Core Concepts
//!
//! - **Codec**: content is zlib-compressed and base64-encoded into a URL
//!   parameter; every URL generation ever produced stays parseable
//! - **Documents**: schema-versioned tables with indexes, migrated on open
//! - **Versions**: per-path chains of immutable versions with a latest
//!   pointer and rollup metadata
//! - **History**: statistics, JSON export and import, and the share log
//!
//! ## Example
//!
//! ```ignore
//! use unpako::{Store, StoreConfig};
//!
//! let store = Store::open_or_create(StoreConfig {
//!     path: "./my-store".into(),
//!     ..Default::default()
//! })?;
//!
//! // Share content and get a link
//! let url = store.share("Hello World!", "notes/hello.txt")?;
//!
//! // Open a link someone else shared
//! let loaded = store.load_url(&url)?;
//! assert_eq!(loaded.text(), Some("Hello World!"));
//!
//! // Go back to an earlier version
//! store.versions().revert_to_version("notes/hello.txt", 1)?;
//! ```

pub mod codec;
pub mod documents;
pub mod error;
pub mod history;
pub mod store;
pub mod types;
pub mod versions;

// Re-exports
pub use codec::{
    compression_ratio, format_file_size, normalize_filepath, validate_filepath, Codec,
    CodecConfig, CompressedPayload, Compressor, FilepathInfo, ParsedUrl, UrlFormat,
    ZlibCompressor,
};
pub use documents::{DocumentStore, Migration, Schema, TableSpec};
pub use error::{Result, UnpakoError};
pub use history::{History, ShareEntry, ShareLog};
pub use store::{LoadedFile, Store, StoreConfig};
pub use types::*;
pub use versions::{AddOutcome, VersionContent, VersionPolicy, VersionStore};
