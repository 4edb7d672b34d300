//! Statistics, export and import over the version chains.

use crate::codec::payload::serde_base64;
use crate::error::Result;
use crate::types::{FileVersion, ImportReport, VersionStats};
use crate::versions::{VersionContent, VersionStore};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A version record as found in an export file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportRecord {
    filepath: String,
    version_id: String,
    #[serde(default)]
    version: Option<u64>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    compressed_size: Option<u64>,
    #[serde(with = "serde_base64")]
    data: Vec<u8>,
    #[serde(default)]
    url: Option<String>,
}

impl ImportRecord {
    fn content(self) -> VersionContent {
        VersionContent {
            size: self.size,
            compressed_size: self.compressed_size.unwrap_or(self.data.len() as u64),
            data: self.data,
            url: self.url,
        }
    }
}

fn has_required_fields(record: &Value) -> bool {
    let non_empty = |field: &str| {
        record
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    };
    non_empty("filepath") && non_empty("versionId") && non_empty("data")
}

/// Read-side aggregation and bulk transfer of version chains.
pub struct History {
    versions: Arc<VersionStore>,
}

impl History {
    pub fn new(versions: Arc<VersionStore>) -> Self {
        Self { versions }
    }

    /// Totals over every tracked path.
    pub fn stats(&self) -> VersionStats {
        self.versions
            .all_metadata()
            .iter()
            .fold(VersionStats::default(), |mut stats, metadata| {
                stats.total_files += 1;
                stats.total_versions += metadata.total_versions;
                stats.total_size += metadata.total_size;
                stats.total_compressed_size += metadata.total_compressed_size;
                stats
            })
    }

    /// Export versions as a pretty-printed JSON array.
    ///
    /// With a non-empty filter only those paths are exported, each newest
    /// first.
    pub fn export(&self, filepaths: Option<&[String]>) -> Result<String> {
        let versions: Vec<FileVersion> = match filepaths {
            Some(filepaths) if !filepaths.is_empty() => filepaths
                .iter()
                .flat_map(|filepath| self.versions.get_versions(filepath))
                .collect(),
            _ => self.versions.all_versions(),
        };

        debug!(versions = versions.len(), "Exporting versions");
        Ok(serde_json::to_string_pretty(&versions)?)
    }

    /// Import an export file.
    ///
    /// Records are grouped by path and replayed in version order under their
    /// original ids; ids already present are skipped. Bad records are
    /// reported and do not stop the import.
    pub fn import(&self, json: &str) -> ImportReport {
        let mut report = ImportReport::default();

        let records = match serde_json::from_str::<Value>(json) {
            Ok(Value::Array(records)) => records,
            Ok(_) => {
                report.errors.push("Invalid format: Expected array".to_string());
                return report;
            }
            Err(e) => {
                report.errors.push(format!("Failed to parse JSON: {}", e));
                return report;
            }
        };

        let mut groups: BTreeMap<String, Vec<ImportRecord>> = BTreeMap::new();
        for (index, record) in records.into_iter().enumerate() {
            if !has_required_fields(&record) {
                report
                    .errors
                    .push(format!("Invalid version at index {}: Missing required fields", index));
                continue;
            }
            match serde_json::from_value::<ImportRecord>(record) {
                Ok(record) => groups.entry(record.filepath.clone()).or_default().push(record),
                Err(e) => report
                    .errors
                    .push(format!("Invalid version at index {}: {}", index, e)),
            }
        }

        for (filepath, mut records) in groups {
            records.sort_by_key(|record| record.version.unwrap_or(1));

            for record in records {
                if self.versions.contains_version(&record.version_id) {
                    report.skipped += 1;
                    continue;
                }

                let version_id = record.version_id.clone();
                match self
                    .versions
                    .add_version_with_id(&filepath, &version_id, record.content())
                {
                    Ok(_) => report.imported += 1,
                    Err(e) => report
                        .errors
                        .push(format!("Failed to import version {}: {}", version_id, e)),
                }
            }
        }

        info!(
            imported = report.imported,
            skipped = report.skipped,
            errors = report.errors.len(),
            "Imported versions"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::documents::DocumentStore;
    use crate::versions::{schema, VersionPolicy};

    fn history() -> (Arc<VersionStore>, History) {
        let documents = Arc::new(DocumentStore::in_memory(&schema()).unwrap());
        let versions = Arc::new(VersionStore::new(documents, Codec::default(), 8));
        (Arc::clone(&versions), History::new(versions))
    }

    #[test]
    fn test_stats() {
        let (versions, history) = history();
        assert_eq!(history.stats(), VersionStats::default());

        versions.save_text("a.txt", "12345", VersionPolicy::Always).unwrap();
        versions.save_text("a.txt", "123", VersionPolicy::Always).unwrap();
        versions.save_text("b.txt", "1", VersionPolicy::Always).unwrap();

        let stats = history.stats();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_versions, 3);
        assert_eq!(stats.total_size, 9);
    }

    #[test]
    fn test_export_filter() {
        let (versions, history) = history();
        versions.save_text("a.txt", "1", VersionPolicy::Always).unwrap();
        versions.save_text("a.txt", "2", VersionPolicy::Always).unwrap();
        versions.save_text("b.txt", "3", VersionPolicy::Always).unwrap();

        let exported: Vec<Value> =
            serde_json::from_str(&history.export(Some(&["a.txt".to_string()][..])).unwrap()).unwrap();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0]["version"], 2);
        assert_eq!(exported[1]["version"], 1);

        let exported: Vec<Value> = serde_json::from_str(&history.export(None).unwrap()).unwrap();
        assert_eq!(exported.len(), 3);
    }

    #[test]
    fn test_import_rejects_malformed_json() {
        let (_, history) = history();

        let report = history.import("{not json");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Failed to parse JSON"));

        let report = history.import("{\"a\": 1}");
        assert_eq!(report.errors, vec!["Invalid format: Expected array".to_string()]);
        assert!(!report.success());
    }

    #[test]
    fn test_import_collects_record_errors() {
        let (versions, history) = history();
        let json = r#"[
            {"filepath": "a.txt", "versionId": "v1", "version": 1, "size": 3, "data": "AQID"},
            {"filepath": "a.txt", "data": "AQID"},
            {"filepath": "bad|path", "versionId": "v2", "data": "AQID"}
        ]"#;

        let report = history.import(json);
        assert_eq!(report.imported, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.success());

        let version = versions.get_version("a.txt", "v1").unwrap();
        assert_eq!(version.compressed_size, 3);
        assert!(version.is_latest);
    }

    #[test]
    fn test_import_replays_in_version_order() {
        let (versions, history) = history();
        let json = r#"[
            {"filepath": "a.txt", "versionId": "second", "version": 2, "size": 1, "data": "AQ=="},
            {"filepath": "a.txt", "versionId": "first", "version": 1, "size": 1, "data": "Ag=="}
        ]"#;

        let report = history.import(json);
        assert!(report.success());
        assert_eq!(report.imported, 2);

        let latest = versions.get_latest_version("a.txt").unwrap();
        assert_eq!(latest.version_id, "second");
        assert_eq!(latest.version_number, 2);
    }
}
