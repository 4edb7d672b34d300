//! Capped log of shared payloads.
//!
//! Backed by the flat `fileHistory` table that predates version chains.
//! Once the log holds more than its limit, the entries created earliest are
//! evicted.

use crate::codec::payload::serde_base64;
use crate::codec::CompressedPayload;
use crate::documents::{from_row, to_row, Database, DocumentStore, Row};
use crate::error::Result;
use crate::types::Timestamp;
use crate::versions::schema::FILE_HISTORY;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// One shared payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareEntry {
    pub id: String,
    pub filepath: String,

    #[serde(with = "serde_base64")]
    pub data: Vec<u8>,

    pub size: u64,
    pub compressed_size: u64,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ShareEntry {
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

pub struct ShareLog {
    documents: Arc<DocumentStore>,
    limit: usize,
}

impl ShareLog {
    pub fn new(documents: Arc<DocumentStore>, limit: usize) -> Self {
        Self {
            documents,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Record a shared payload, evicting the oldest entries over the limit.
    pub fn record(&self, payload: &CompressedPayload, url: Option<String>) -> Result<ShareEntry> {
        let entry = ShareEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            filepath: payload.filepath.clone(),
            data: payload.data.clone(),
            size: payload.original_size,
            compressed_size: payload.compressed_size,
            created_at: payload.created_at,
            modified_at: payload.modified_at,
            url,
        };
        let row = to_row(&entry)?;
        let limit = self.limit;

        let evicted = self.documents.transaction(|tx| {
            let table = tx.table_mut(FILE_HISTORY)?;
            table.add(row)?;

            let excess = table.count().saturating_sub(limit);
            if excess == 0 {
                return Ok(0);
            }

            let oldest: Vec<String> = table
                .order_by("createdAt")?
                .into_iter()
                .take(excess)
                .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
                .collect();
            Ok(table.bulk_delete(&oldest))
        })?;

        debug!(id = %entry.id, filepath = %entry.filepath, evicted, "Recorded share");
        Ok(entry)
    }

    /// Entries, most recently modified first.
    pub fn list(&self) -> Vec<ShareEntry> {
        self.read_or_default("list", |db| {
            Ok(db
                .table(FILE_HISTORY)?
                .order_by("modifiedAt")?
                .into_iter()
                .rev()
                .filter_map(|row| match from_row::<ShareEntry>(row) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(id = ?row.get("id"), error = %e, "Skipping unreadable share entry");
                        None
                    }
                })
                .collect())
        })
    }

    pub fn get(&self, id: &str) -> Option<ShareEntry> {
        self.read_or_default("get", |db| {
            db.table(FILE_HISTORY)?.get(id).map(from_row).transpose()
        })
    }

    pub fn len(&self) -> usize {
        self.read_or_default("len", |db| Ok(db.table(FILE_HISTORY)?.count()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the entry existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        self.documents
            .transaction(|tx| Ok(tx.table_mut(FILE_HISTORY)?.delete(id).is_some()))
    }

    pub fn clear(&self) -> Result<()> {
        self.documents.transaction(|tx| {
            tx.table_mut(FILE_HISTORY)?.clear();
            Ok(())
        })
    }

    /// Set the cached URL of an entry and bump its modification time.
    /// Returns whether the entry existed.
    pub fn update_url(&self, id: &str, url: &str) -> Result<bool> {
        let mut changes = Row::new();
        changes.insert("url".into(), Value::from(url));
        changes.insert("modifiedAt".into(), Value::from(Timestamp::now().as_millis()));

        self.documents
            .transaction(|tx| tx.table_mut(FILE_HISTORY)?.update(id, changes))
    }

    fn read_or_default<T, F>(&self, operation: &str, f: F) -> T
    where
        T: Default,
        F: FnOnce(&Database) -> Result<T>,
    {
        match self.documents.read(f) {
            Ok(value) => value,
            Err(e) => {
                warn!(operation, error = %e, "Share log read failed");
                T::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::versions::schema::schema;

    fn share_log(limit: usize) -> ShareLog {
        let documents = Arc::new(DocumentStore::in_memory(&schema()).unwrap());
        ShareLog::new(documents, limit)
    }

    fn payload(path: &str, created_at: i64) -> CompressedPayload {
        let mut payload = Codec::default().encode("shared", path).unwrap();
        payload.created_at = Timestamp(created_at);
        payload.modified_at = Timestamp(created_at);
        payload
    }

    #[test]
    fn test_record_and_get() {
        let log = share_log(10);
        let entry = log
            .record(&payload("a.txt", 1), Some("http://x/?data=1".into()))
            .unwrap();

        let stored = log.get(&entry.id).unwrap();
        assert_eq!(stored, entry);
        assert_eq!(stored.to_payload(), payload("a.txt", 1));
    }

    #[test]
    fn test_list_newest_first() {
        let log = share_log(10);
        log.record(&payload("old.txt", 1), None).unwrap();
        log.record(&payload("new.txt", 3), None).unwrap();
        log.record(&payload("mid.txt", 2), None).unwrap();

        let paths: Vec<String> = log.list().into_iter().map(|e| e.filepath).collect();
        assert_eq!(paths, vec!["new.txt", "mid.txt", "old.txt"]);
    }

    #[test]
    fn test_capped_by_creation_time() {
        let log = share_log(2);
        log.record(&payload("b.txt", 20), None).unwrap();
        log.record(&payload("a.txt", 10), None).unwrap();
        log.record(&payload("c.txt", 30), None).unwrap();

        assert_eq!(log.len(), 2);
        let mut paths: Vec<String> = log.list().into_iter().map(|e| e.filepath).collect();
        paths.sort();
        assert_eq!(paths, vec!["b.txt", "c.txt"]);
    }

    #[test]
    fn test_update_remove_clear() {
        let log = share_log(10);
        let entry = log.record(&payload("a.txt", 1), None).unwrap();

        assert!(log.update_url(&entry.id, "http://x/").unwrap());
        let updated = log.get(&entry.id).unwrap();
        assert_eq!(updated.url.as_deref(), Some("http://x/"));
        assert!(updated.modified_at > entry.modified_at);
        assert!(!log.update_url("missing", "http://x/").unwrap());

        assert!(log.remove(&entry.id).unwrap());
        assert!(!log.remove(&entry.id).unwrap());

        log.record(&payload("b.txt", 2), None).unwrap();
        log.clear().unwrap();
        assert!(log.is_empty());
    }
}
