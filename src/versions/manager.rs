//! Version chain manager.
//!
//! Every logical path owns a chain of immutable versions numbered from 1,
//! exactly one of which is flagged latest, plus one metadata row holding the
//! latest pointer and running size sums. Both tables change together inside
//! a single document store transaction.

use crate::codec::{validate_filepath, Codec, CompressedPayload};
use crate::documents::{from_row, to_row, Database, DocumentStore, Row, Table, Transaction};
use crate::error::{Result, UnpakoError};
use crate::types::{ContentHash, FileMetadata, FileVersion, Timestamp};
use crate::versions::schema::{BY_PATH_AND_NUMBER, FILE_METADATA, FILE_VERSIONS};
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether unchanged content creates a new version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Skip when the inflated content equals the latest version's.
    IfChanged,
    /// Always append.
    Always,
}

/// Result of adding content to a chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new version was appended and is now latest.
    Created(FileVersion),
    /// Content matched the latest version, which is returned unchanged.
    Unchanged(FileVersion),
}

impl AddOutcome {
    pub fn version(&self) -> &FileVersion {
        match self {
            AddOutcome::Created(v) | AddOutcome::Unchanged(v) => v,
        }
    }

    pub fn into_version(self) -> FileVersion {
        match self {
            AddOutcome::Created(v) | AddOutcome::Unchanged(v) => v,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, AddOutcome::Created(_))
    }
}

/// Content fields of a new version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionContent {
    /// Uncompressed size in bytes.
    pub size: u64,
    pub compressed_size: u64,
    /// Compressed bytes.
    pub data: Vec<u8>,
    pub url: Option<String>,
}

impl From<&CompressedPayload> for VersionContent {
    fn from(payload: &CompressedPayload) -> Self {
        Self {
            size: payload.original_size,
            compressed_size: payload.compressed_size,
            data: payload.data.clone(),
            url: None,
        }
    }
}

impl From<&FileVersion> for VersionContent {
    fn from(version: &FileVersion) -> Self {
        Self {
            size: version.size,
            compressed_size: version.compressed_size,
            data: version.data.clone(),
            url: version.url.clone(),
        }
    }
}

/// Maintains version chains and their metadata.
pub struct VersionStore {
    documents: Arc<DocumentStore>,
    codec: Codec,
    /// Inflated content by content hash.
    cache: Mutex<LruCache<ContentHash, Arc<Vec<u8>>>>,
}

impl VersionStore {
    /// Create a manager over an opened document store.
    pub fn new(documents: Arc<DocumentStore>, codec: Codec, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            documents,
            codec,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Append content to the chain of `filepath`, creating the chain if the
    /// path is new.
    pub fn add_version(
        &self,
        filepath: &str,
        content: VersionContent,
        policy: VersionPolicy,
    ) -> Result<AddOutcome> {
        validate_filepath(filepath)?;
        let hash = self.hash_content(&content.data);
        self.documents.transaction(|tx| {
            append_version(tx, &self.codec, filepath, content, hash, None, policy)
        })
    }

    /// Append a payload produced by the codec under its own path.
    pub fn add_payload(
        &self,
        payload: &CompressedPayload,
        policy: VersionPolicy,
    ) -> Result<AddOutcome> {
        self.add_version(&payload.filepath, VersionContent::from(payload), policy)
    }

    /// Encode text and append it.
    pub fn save_text(&self, filepath: &str, text: &str, policy: VersionPolicy) -> Result<AddOutcome> {
        let payload = self.codec.encode(text, filepath)?;
        self.add_payload(&payload, policy)
    }

    /// Append a version under a caller-chosen id. Used by import.
    pub(crate) fn add_version_with_id(
        &self,
        filepath: &str,
        version_id: &str,
        content: VersionContent,
    ) -> Result<FileVersion> {
        validate_filepath(filepath)?;
        let hash = self.hash_content(&content.data);
        self.documents
            .transaction(|tx| {
                append_version(
                    tx,
                    &self.codec,
                    filepath,
                    content,
                    hash,
                    Some(version_id.to_string()),
                    VersionPolicy::Always,
                )
            })
            .map(AddOutcome::into_version)
    }

    /// Append a copy of version `target` as the new latest version.
    pub fn revert_to_version(&self, filepath: &str, target: u64) -> Result<FileVersion> {
        let version = self.documents.transaction(|tx| {
            let source = find_by_number(tx.table(FILE_VERSIONS)?, filepath, target)?
                .ok_or_else(|| {
                    UnpakoError::VersionNotFound(format!("{} version {}", filepath, target))
                })?;
            let hash = stored_hash(&self.codec, &source);
            append_version(
                tx,
                &self.codec,
                filepath,
                VersionContent::from(&source),
                hash,
                None,
                VersionPolicy::Always,
            )
        })?;

        info!(filepath, from = target, to = version.version().version_number, "Reverted file");
        Ok(version.into_version())
    }

    /// Remove one version. Deleting the latest promotes the highest
    /// remaining version; deleting the only version removes the path.
    pub fn delete_version(&self, version_id: &str) -> Result<()> {
        self.documents.transaction(|tx| {
            let version: FileVersion = tx
                .table(FILE_VERSIONS)?
                .get(version_id)
                .map(from_row)
                .transpose()?
                .ok_or_else(|| UnpakoError::VersionNotFound(version_id.to_string()))?;
            let mut metadata = load_metadata(tx, &version.filepath)?.ok_or_else(|| {
                UnpakoError::Corruption(format!("no metadata for {}", version.filepath))
            })?;

            let remaining = chain_of(tx.table(FILE_VERSIONS)?, &version.filepath)?
                .into_iter()
                .filter(|v| v.version_id != version.version_id)
                .collect::<Vec<_>>();

            if remaining.is_empty() {
                delete_chain(tx, &version.filepath)?;
                return Ok(());
            }

            if version.is_latest || metadata.latest_version_id == version.version_id {
                let promoted = remaining
                    .iter()
                    .filter(|v| v.version_number < version.version_number)
                    .max_by_key(|v| v.version_number)
                    .or_else(|| remaining.iter().max_by_key(|v| v.version_number))
                    .ok_or_else(|| {
                        UnpakoError::Corruption(format!("no version to promote for {}", version.filepath))
                    })?;

                tx.table_mut(FILE_VERSIONS)?
                    .update(&promoted.version_id, latest_flag(true))?;
                metadata.latest_version = promoted.version_number;
                metadata.latest_version_id = promoted.version_id.clone();
                metadata.last_modified_at = Timestamp::now();

                debug!(
                    filepath = %version.filepath,
                    promoted = promoted.version_number,
                    "Promoted previous version to latest"
                );
            }

            metadata.total_versions = metadata.total_versions.saturating_sub(1);
            metadata.total_size = metadata.total_size.saturating_sub(version.size);
            metadata.total_compressed_size = metadata
                .total_compressed_size
                .saturating_sub(version.compressed_size);

            tx.table_mut(FILE_VERSIONS)?.delete(&version.version_id);
            tx.table_mut(FILE_METADATA)?.put(to_row(&metadata)?)?;
            Ok(())
        })
    }

    /// Remove every version of a path and its metadata. Returns the number
    /// of versions removed.
    pub fn delete_path(&self, filepath: &str) -> Result<usize> {
        let removed = self
            .documents
            .transaction(|tx| delete_chain(tx, filepath))?;
        info!(filepath, removed, "Deleted file");
        Ok(removed)
    }

    /// Latest version of every path.
    pub fn get_latest_files(&self) -> Vec<FileVersion> {
        self.read_or_default("get_latest_files", |db| {
            db.table(FILE_VERSIONS)?
                .where_eq("isLatest", &[Value::Bool(true)])?
                .into_iter()
                .map(from_row)
                .collect()
        })
    }

    /// Every version of a path, newest first.
    pub fn get_versions(&self, filepath: &str) -> Vec<FileVersion> {
        self.read_or_default("get_versions", |db| {
            let mut chain = chain_of(db.table(FILE_VERSIONS)?, filepath)?;
            chain.sort_by(|a, b| b.version_number.cmp(&a.version_number));
            Ok(chain)
        })
    }

    /// One version of a path by id.
    pub fn get_version(&self, filepath: &str, version_id: &str) -> Option<FileVersion> {
        self.read_or_default("get_version", |db| {
            let version: Option<FileVersion> = db
                .table(FILE_VERSIONS)?
                .get(version_id)
                .map(from_row)
                .transpose()?;
            Ok(version.filter(|v| v.filepath == filepath))
        })
    }

    pub fn get_version_by_number(&self, filepath: &str, number: u64) -> Option<FileVersion> {
        self.read_or_default("get_version_by_number", |db| {
            find_by_number(db.table(FILE_VERSIONS)?, filepath, number)
        })
    }

    pub fn get_latest_version(&self, filepath: &str) -> Option<FileVersion> {
        self.read_or_default("get_latest_version", |db| {
            let Some(metadata) = db
                .table(FILE_METADATA)?
                .get(filepath)
                .map(from_row::<FileMetadata>)
                .transpose()?
            else {
                return Ok(None);
            };
            db.table(FILE_VERSIONS)?
                .get(&metadata.latest_version_id)
                .map(from_row)
                .transpose()
        })
    }

    pub fn get_metadata(&self, filepath: &str) -> Option<FileMetadata> {
        self.read_or_default("get_metadata", |db| {
            db.table(FILE_METADATA)?.get(filepath).map(from_row).transpose()
        })
    }

    pub fn all_metadata(&self) -> Vec<FileMetadata> {
        self.read_or_default("all_metadata", |db| {
            db.table(FILE_METADATA)?.rows().map(from_row).collect()
        })
    }

    /// Every stored version, in no particular order.
    pub fn all_versions(&self) -> Vec<FileVersion> {
        self.read_or_default("all_versions", |db| {
            db.table(FILE_VERSIONS)?.rows().map(from_row).collect()
        })
    }

    pub fn contains_version(&self, version_id: &str) -> bool {
        self.read_or_default("contains_version", |db| {
            Ok(db.table(FILE_VERSIONS)?.contains(version_id))
        })
    }

    /// Inflated content of a version.
    pub fn content(&self, version: &FileVersion) -> Result<Arc<Vec<u8>>> {
        if let Some(hash) = version.content_hash {
            if let Some(cached) = self.cache.lock().get(&hash).cloned() {
                return Ok(cached);
            }
        }

        let content = Arc::new(self.codec.inflate(&version.data)?);
        let hash = version
            .content_hash
            .unwrap_or_else(|| ContentHash::from_bytes(&content));
        self.cache.lock().put(hash, Arc::clone(&content));
        Ok(content)
    }

    /// Hash compressed data by its inflated content, keeping the inflated
    /// bytes in the cache.
    fn hash_content(&self, data: &[u8]) -> ContentHash {
        match self.codec.inflate(data) {
            Ok(content) => {
                let hash = ContentHash::from_bytes(&content);
                self.cache.lock().put(hash, Arc::new(content));
                hash
            }
            Err(e) => {
                warn!(error = %e, "Version data does not inflate, hashing it as stored");
                ContentHash::from_bytes(data)
            }
        }
    }

    /// Inflated content of a version as UTF-8 text.
    pub fn content_text(&self, version: &FileVersion) -> Result<String> {
        let bytes = self.content(version)?;
        String::from_utf8(bytes.as_ref().clone())
            .map_err(|e| UnpakoError::Decode(format!("content is not UTF-8: {}", e)))
    }

    /// Run a read, logging and swallowing store errors.
    fn read_or_default<T, F>(&self, operation: &str, f: F) -> T
    where
        T: Default,
        F: FnOnce(&Database) -> Result<T>,
    {
        match self.documents.read(f) {
            Ok(value) => value,
            Err(e) => {
                warn!(operation, error = %e, "Version store read failed");
                T::default()
            }
        }
    }
}

/// Content hash of a stored version, inflating rows that predate hashing.
fn stored_hash(codec: &Codec, version: &FileVersion) -> ContentHash {
    if let Some(hash) = version.content_hash {
        return hash;
    }
    match codec.inflate(&version.data) {
        Ok(content) => ContentHash::from_bytes(&content),
        Err(_) => ContentHash::from_bytes(&version.data),
    }
}

fn new_version_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn latest_flag(is_latest: bool) -> Row {
    let mut row = Row::new();
    row.insert("isLatest".into(), Value::Bool(is_latest));
    row
}

fn load_metadata(tx: &Transaction<'_>, filepath: &str) -> Result<Option<FileMetadata>> {
    tx.table(FILE_METADATA)?
        .get(filepath)
        .map(from_row)
        .transpose()
}

fn chain_of(versions: &Table, filepath: &str) -> Result<Vec<FileVersion>> {
    versions
        .where_eq("filepath", &[Value::from(filepath)])?
        .into_iter()
        .map(from_row)
        .collect()
}

fn find_by_number(
    versions: &Table,
    filepath: &str,
    number: u64,
) -> Result<Option<FileVersion>> {
    versions
        .where_eq(BY_PATH_AND_NUMBER, &[Value::from(filepath), Value::from(number)])?
        .into_iter()
        .next()
        .map(from_row)
        .transpose()
}

fn append_version(
    tx: &mut Transaction<'_>,
    codec: &Codec,
    filepath: &str,
    content: VersionContent,
    hash: ContentHash,
    version_id: Option<String>,
    policy: VersionPolicy,
) -> Result<AddOutcome> {
    let now = Timestamp::now();
    let version_id = version_id.unwrap_or_else(new_version_id);

    let metadata = match load_metadata(tx, filepath)? {
        Some(mut metadata) => {
            let previous: FileVersion = tx
                .table(FILE_VERSIONS)?
                .get(&metadata.latest_version_id)
                .map(from_row)
                .transpose()?
                .ok_or_else(|| {
                    UnpakoError::Corruption(format!(
                        "latest version {} of {} is missing",
                        metadata.latest_version_id, filepath
                    ))
                })?;

            if policy == VersionPolicy::IfChanged && stored_hash(codec, &previous) == hash {
                debug!(filepath, version = previous.version_number, "Content unchanged, no new version");
                return Ok(AddOutcome::Unchanged(previous));
            }

            tx.table_mut(FILE_VERSIONS)?
                .update(&previous.version_id, latest_flag(false))?;

            metadata.latest_version += 1;
            metadata.latest_version_id = version_id.clone();
            metadata.total_versions += 1;
            metadata.last_modified_at = now;
            metadata.total_size += content.size;
            metadata.total_compressed_size += content.compressed_size;
            metadata
        }
        None => FileMetadata {
            filepath: filepath.to_string(),
            latest_version: 1,
            latest_version_id: version_id.clone(),
            total_versions: 1,
            original_created_at: now,
            last_modified_at: now,
            total_size: content.size,
            total_compressed_size: content.compressed_size,
        },
    };

    let version = FileVersion {
        filepath: filepath.to_string(),
        version_id,
        version_number: metadata.latest_version,
        size: content.size,
        compressed_size: content.compressed_size,
        data: content.data,
        created_at: now,
        modified_at: now,
        url: content.url,
        is_latest: true,
        content_hash: Some(hash),
    };

    tx.table_mut(FILE_VERSIONS)?.add(to_row(&version)?)?;
    tx.table_mut(FILE_METADATA)?.put(to_row(&metadata)?)?;

    debug!(filepath, version = version.version_number, "Added version");
    Ok(AddOutcome::Created(version))
}

fn delete_chain(tx: &mut Transaction<'_>, filepath: &str) -> Result<usize> {
    let ids: Vec<String> = chain_of(tx.table(FILE_VERSIONS)?, filepath)?
        .into_iter()
        .map(|v| v.version_id)
        .collect();

    let removed = tx.table_mut(FILE_VERSIONS)?.bulk_delete(&ids);
    tx.table_mut(FILE_METADATA)?.delete(filepath);
    Ok(removed)
}
