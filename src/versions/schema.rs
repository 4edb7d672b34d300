//! The four schema versions of the share store.
//!
//! - v1: flat `fileHistory` table with a single `timestamp`.
//! - v2: `timestamp` split into `createdAt` and `modifiedAt`.
//! - v3: the `type` field dropped.
//! - v4: `fileVersions` and `fileMetadata` built from the flat rows, which
//!   stay in place for the share log.

use crate::codec::payload::decode_base64;
use crate::codec::Codec;
use crate::documents::{to_row, Database, Migration, Row, Schema, TableSpec};
use crate::error::Result;
use crate::types::{ContentHash, FileMetadata, FileVersion, Timestamp};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const FILE_HISTORY: &str = "fileHistory";
pub const FILE_VERSIONS: &str = "fileVersions";
pub const FILE_METADATA: &str = "fileMetadata";

/// Compound index used for `(filepath, version)` lookups.
pub const BY_PATH_AND_NUMBER: &str = "[filepath+version]";

/// The schema every store is migrated to on open.
pub fn schema() -> Schema {
    let migrations = vec![
        Migration::new(1).table(TableSpec::new(FILE_HISTORY, "id").index(&[
            "filepath",
            "size",
            "compressedSize",
            "timestamp",
            "type",
            "url",
        ])),
        Migration::new(2)
            .table(history_table(&["type"]))
            .transform_rows(FILE_HISTORY, split_timestamp),
        Migration::new(3)
            .table(history_table(&[]))
            .transform_rows(FILE_HISTORY, drop_type),
        Migration::new(4)
            .table(history_table(&[]))
            .table(
                TableSpec::new(FILE_VERSIONS, "versionId")
                    .compound(&["filepath", "versionId"])
                    .index(&["filepath", "version", "createdAt", "isLatest"])
                    .compound(&["filepath", "version"]),
            )
            .table(TableSpec::new(FILE_METADATA, "filepath").index(&["lastModifiedAt"]))
            .transform_tables(build_version_chains),
    ];

    Schema::from_ordered(migrations)
}

fn history_table(extra: &[&str]) -> TableSpec {
    let mut fields = vec!["filepath", "size", "compressedSize", "createdAt", "modifiedAt"];
    fields.extend_from_slice(extra);
    fields.push("url");
    TableSpec::new(FILE_HISTORY, "id").index(&fields)
}

fn split_timestamp(mut row: Row) -> Result<Row> {
    match row.remove("timestamp") {
        Some(timestamp) => {
            row.insert("createdAt".into(), timestamp.clone());
            row.insert("modifiedAt".into(), timestamp);
        }
        None => {
            let now = Value::from(Timestamp::now().as_millis());
            row.entry("createdAt").or_insert_with(|| now.clone());
            row.entry("modifiedAt").or_insert(now);
        }
    }
    Ok(row)
}

fn drop_type(mut row: Row) -> Result<Row> {
    row.remove("type");
    Ok(row)
}

/// A flat row reduced to what a version needs.
struct FlatEntry {
    id: String,
    data: Vec<u8>,
    size: u64,
    compressed_size: u64,
    created_at: Timestamp,
    modified_at: Timestamp,
    url: Option<String>,
}

impl FlatEntry {
    fn from_row(row: &Row) -> Option<(String, Self)> {
        let filepath = row.get("filepath")?.as_str()?.to_string();
        let data = decode_base64(row.get("data")?.as_str()?).ok()?;
        let millis = |field: &str| row.get(field).and_then(Value::as_i64).map(Timestamp);
        let modified_at = millis("modifiedAt").or_else(|| millis("createdAt"))?;

        let entry = FlatEntry {
            id: row.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            size: row.get("size").and_then(Value::as_u64).unwrap_or(0),
            compressed_size: row
                .get("compressedSize")
                .and_then(Value::as_u64)
                .unwrap_or(data.len() as u64),
            created_at: millis("createdAt").unwrap_or(modified_at),
            modified_at,
            url: row.get("url").and_then(Value::as_str).map(str::to_string),
            data,
        };
        Some((filepath, entry))
    }
}

/// Group flat rows by path into version chains, oldest as version 1.
fn build_version_chains(db: &mut Database) -> Result<()> {
    let mut groups: BTreeMap<String, Vec<FlatEntry>> = BTreeMap::new();
    let mut skipped = 0usize;

    for row in db.table(FILE_HISTORY)?.rows() {
        match FlatEntry::from_row(row) {
            Some((filepath, entry)) => groups.entry(filepath).or_default().push(entry),
            None => {
                skipped += 1;
                warn!(id = ?row.get("id"), "Skipping history row without path or data");
            }
        }
    }

    let codec = Codec::default();
    let mut versions = Vec::new();
    let mut metadata = Vec::new();

    for (filepath, mut entries) in groups {
        entries.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = entries.len() as u64;
        let mut chain = Vec::with_capacity(entries.len());
        for (position, entry) in entries.into_iter().enumerate() {
            let version_number = total - position as u64;
            // Rows that do not inflate here get hashed on first comparison.
            let content_hash = codec
                .inflate(&entry.data)
                .ok()
                .map(|content| ContentHash::from_bytes(&content));
            chain.push(FileVersion {
                filepath: filepath.clone(),
                version_id: uuid::Uuid::new_v4().simple().to_string(),
                version_number,
                size: entry.size,
                compressed_size: entry.compressed_size,
                content_hash,
                data: entry.data,
                created_at: entry.created_at,
                modified_at: entry.modified_at,
                url: entry.url,
                is_latest: position == 0,
            });
        }

        let Some(latest) = chain.first() else {
            continue;
        };
        metadata.push(FileMetadata {
            filepath: filepath.clone(),
            latest_version: latest.version_number,
            latest_version_id: latest.version_id.clone(),
            total_versions: total,
            original_created_at: chain
                .iter()
                .map(|v| v.created_at)
                .min()
                .unwrap_or(latest.created_at),
            last_modified_at: latest.modified_at,
            total_size: chain.iter().map(|v| v.size).sum(),
            total_compressed_size: chain.iter().map(|v| v.compressed_size).sum(),
        });
        versions.extend(chain);
    }

    info!(
        files = metadata.len(),
        versions = versions.len(),
        skipped,
        "Built version chains from share history"
    );

    let rows = versions.iter().map(to_row).collect::<Result<Vec<_>>>()?;
    db.table_mut(FILE_VERSIONS)?.bulk_add(rows)?;

    let rows = metadata.iter().map(to_row).collect::<Result<Vec<_>>>()?;
    db.table_mut(FILE_METADATA)?.bulk_add(rows)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_schema_versions_ascend() {
        let versions: Vec<u32> = schema().versions().collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
        assert_eq!(schema().latest_version(), 4);
    }

    #[test]
    fn test_split_timestamp() {
        let migrated = split_timestamp(row(json!({"id": "a", "timestamp": 42}))).unwrap();
        assert_eq!(migrated["createdAt"], 42);
        assert_eq!(migrated["modifiedAt"], 42);
        assert!(migrated.get("timestamp").is_none());

        let migrated = split_timestamp(row(json!({"id": "b"}))).unwrap();
        assert_eq!(migrated["createdAt"], migrated["modifiedAt"]);
        assert!(migrated["createdAt"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_drop_type() {
        let migrated = drop_type(row(json!({"id": "a", "type": "uploaded"}))).unwrap();
        assert!(migrated.get("type").is_none());
    }

    #[test]
    fn test_build_version_chains() {
        let mut db = Database::default();
        for migration in schema().truncated(3).pending(0) {
            migration.apply(&mut db).unwrap();
        }

        let history = db.table_mut(FILE_HISTORY).unwrap();
        for (id, path, at) in [("a", "x.txt", 10), ("b", "x.txt", 30), ("c", "x.txt", 20), ("d", "y.txt", 5)] {
            history
                .add(row(json!({
                    "id": id,
                    "filepath": path,
                    "data": "AQID",
                    "size": 10,
                    "compressedSize": 3,
                    "createdAt": at,
                    "modifiedAt": at,
                })))
                .unwrap();
        }
        history.add(row(json!({"id": "e", "createdAt": 1}))).unwrap();

        for migration in schema().pending(3) {
            migration.apply(&mut db).unwrap();
        }

        let versions = db.table(FILE_VERSIONS).unwrap();
        assert_eq!(versions.count(), 4);

        let latest = versions
            .where_eq("[filepath+version]", &[json!("x.txt"), json!(3)])
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0]["modifiedAt"], 30);
        assert_eq!(latest[0]["isLatest"], true);

        let first = versions
            .where_eq("[filepath+version]", &[json!("x.txt"), json!(1)])
            .unwrap();
        assert_eq!(first[0]["modifiedAt"], 10);
        assert_eq!(first[0]["isLatest"], false);

        let metadata = db.table(FILE_METADATA).unwrap();
        let x = metadata.get("x.txt").unwrap();
        assert_eq!(x["totalVersions"], 3);
        assert_eq!(x["latestVersion"], 3);
        assert_eq!(x["totalSize"], 30);
        assert_eq!(x["originalCreatedAt"], 10);
        assert_eq!(metadata.count(), 2);

        // The flat table is kept.
        assert_eq!(db.table(FILE_HISTORY).unwrap().count(), 5);
    }
}
