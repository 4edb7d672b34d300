//! Main Store struct tying all components together.

use crate::codec::{Codec, CodecConfig, CompressedPayload, UrlFormat};
use crate::documents::DocumentStore;
use crate::error::{Result, UnpakoError};
use crate::history::{History, ShareLog};
use crate::versions::{schema, AddOutcome, VersionContent, VersionPolicy, VersionStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Inflated content cache size (number of versions).
    pub content_cache_size: usize,

    /// Maximum number of entries kept in the share log.
    pub share_history_limit: usize,

    /// Codec settings.
    pub codec: CodecConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./unpako"),
            create_if_missing: true,
            content_cache_size: 256,
            share_history_limit: 50,
            codec: CodecConfig::default(),
        }
    }
}

/// Content loaded from a share URL.
#[derive(Clone, Debug)]
pub struct LoadedFile {
    pub payload: CompressedPayload,
    /// URL generation the link was written in.
    pub format: UrlFormat,
    /// Inflated bytes.
    pub content: Vec<u8>,
    /// Whether loading added a version.
    pub outcome: AddOutcome,
}

impl LoadedFile {
    /// Content as text, if it is UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// The share store.
///
/// Provides a unified interface for:
/// - Encoding content into share URLs and loading them back
/// - Version chains per logical path
/// - Statistics, export and import of those chains
/// - The capped log of past shares
pub struct Store {
    config: StoreConfig,
    codec: Codec,
    documents: Arc<DocumentStore>,
    versions: Arc<VersionStore>,
    history: History,
    share_log: ShareLog,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if DocumentStore::exists(&config.path) {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(UnpakoError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        let documents = DocumentStore::create(&config.path, &schema())?;
        Ok(Self::assemble(config, documents))
    }

    /// Open an existing store, migrating it to the current schema.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let documents = DocumentStore::open(&config.path, &schema())?;
        Ok(Self::assemble(config, documents))
    }

    /// A store that keeps nothing on disk.
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        let documents = DocumentStore::in_memory(&schema())?;
        Ok(Self::assemble(config, documents))
    }

    fn assemble(config: StoreConfig, documents: DocumentStore) -> Self {
        let codec = Codec::new(config.codec.clone());
        let documents = Arc::new(documents);
        let versions = Arc::new(VersionStore::new(
            Arc::clone(&documents),
            codec.clone(),
            config.content_cache_size,
        ));
        let history = History::new(Arc::clone(&versions));
        let share_log = ShareLog::new(Arc::clone(&documents), config.share_history_limit);

        Self {
            config,
            codec,
            documents,
            versions,
            history,
            share_log,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn share_log(&self) -> &ShareLog {
        &self.share_log
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Share text under a logical path and return its URL.
    ///
    /// A version is added when the content differs from the latest one and
    /// the share is recorded in the share log.
    pub fn share(&self, content: &str, filepath: &str) -> Result<String> {
        self.share_bytes(content.as_bytes(), filepath)
    }

    /// Share raw bytes (an uploaded file) under a logical path.
    pub fn share_bytes(&self, content: &[u8], filepath: &str) -> Result<String> {
        let payload = self.codec.encode_bytes(content, filepath)?;
        let url = self.codec.to_url(&payload);

        let mut version = VersionContent::from(&payload);
        version.url = Some(url.clone());
        let outcome = self
            .versions
            .add_version(&payload.filepath, version, VersionPolicy::IfChanged)?;
        self.share_log.record(&payload, Some(url.clone()))?;

        info!(
            filepath = %payload.filepath,
            version = outcome.version().version_number,
            created = outcome.is_created(),
            "Shared content"
        );
        Ok(url)
    }

    /// Load a share URL of any generation.
    ///
    /// The content becomes a new version of its path unless it matches the
    /// latest one.
    pub fn load_url(&self, url: &str) -> Result<LoadedFile> {
        let parsed = self.codec.parse_url(url)?;
        let content = self.codec.decode(&parsed.payload)?;

        let mut version = VersionContent::from(&parsed.payload);
        version.size = content.len() as u64;
        version.url = Some(url.to_string());
        let outcome = self.versions.add_version(
            &parsed.payload.filepath,
            version,
            VersionPolicy::IfChanged,
        )?;

        info!(
            filepath = %parsed.payload.filepath,
            format = ?parsed.format,
            created = outcome.is_created(),
            "Loaded share URL"
        );

        Ok(LoadedFile {
            payload: parsed.payload,
            format: parsed.format,
            content,
            outcome,
        })
    }
}
