//! The persistent document store.

use crate::documents::schema::Schema;
use crate::documents::table::Table;
use crate::error::{Result, UnpakoError};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Magic bytes for the documents file.
const DOCUMENTS_MAGIC: &[u8; 4] = b"UPKD";

/// Current documents file format version.
const DOCUMENTS_FORMAT_VERSION: u8 = 1;

const DOCUMENTS_FILE: &str = "documents.db";
const LOCK_FILE: &str = "LOCK";

/// Header: magic + format byte + payload length.
const HEADER_SIZE: usize = 4 + 1 + 8;

/// Every table at one schema version.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Database {
    pub(crate) version: u32,
    pub(crate) tables: BTreeMap<String, Table>,
}

impl Database {
    /// Schema version the tables conform to.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| UnpakoError::TableNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| UnpakoError::TableNotFound(name.to_string()))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// A write transaction.
///
/// Tables are copied on first write and swapped in together on commit, so
/// a transaction spanning several tables is all-or-nothing.
pub struct Transaction<'a> {
    base: &'a Database,
    touched: HashMap<String, Table>,
}

impl<'a> Transaction<'a> {
    fn new(base: &'a Database) -> Self {
        Self {
            base,
            touched: HashMap::new(),
        }
    }

    /// Read a table, seeing this transaction's own writes.
    pub fn table(&self, name: &str) -> Result<&Table> {
        match self.touched.get(name) {
            Some(table) => Ok(table),
            None => self.base.table(name),
        }
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        if !self.touched.contains_key(name) {
            let copy = self.base.table(name)?.clone();
            self.touched.insert(name.to_string(), copy);
        }
        self.touched
            .get_mut(name)
            .ok_or_else(|| UnpakoError::TableNotFound(name.to_string()))
    }
}

/// Schema-versioned tables, persisted to a single framed file.
///
/// Opening applies every pending migration to a working copy; the copy only
/// becomes visible (and is only written) once all of them succeed.
pub struct DocumentStore {
    /// Store directory, `None` for in-memory stores.
    path: Option<PathBuf>,

    /// Lock file for exclusive access.
    _lock_file: Option<File>,

    /// Committed state.
    db: RwLock<Database>,

    /// Serializes write transactions.
    write_lock: Mutex<()>,
}

impl DocumentStore {
    /// Create a new store directory.
    pub fn create(path: impl AsRef<Path>, schema: &Schema) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        if path.join(DOCUMENTS_FILE).exists() {
            return Err(UnpakoError::InvalidOperation(format!(
                "store already exists at {}",
                path.display()
            )));
        }

        let lock_file = Self::acquire_lock(&path)?;
        Self::finish_open(Some(path), Some(lock_file), Database::default(), schema, true)
    }

    /// Open an existing store directory, migrating it to `schema`.
    pub fn open(path: impl AsRef<Path>, schema: &Schema) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let documents_path = path.join(DOCUMENTS_FILE);
        if !documents_path.exists() {
            return Err(UnpakoError::NotInitialized);
        }

        let lock_file = Self::acquire_lock(&path)?;
        let db = read_documents(&documents_path)?;
        Self::finish_open(Some(path), Some(lock_file), db, schema, false)
    }

    /// A store that lives only as long as the handle.
    pub fn in_memory(schema: &Schema) -> Result<Self> {
        Self::finish_open(None, None, Database::default(), schema, false)
    }

    fn finish_open(
        path: Option<PathBuf>,
        lock_file: Option<File>,
        db: Database,
        schema: &Schema,
        fresh: bool,
    ) -> Result<Self> {
        let stored_version = db.version;
        let db = migrate(db, schema)?;

        if let Some(path) = &path {
            if fresh || db.version != stored_version {
                write_documents(&path.join(DOCUMENTS_FILE), &db)?;
            }
        }

        info!(
            path = ?path,
            version = db.version,
            tables = db.tables.len(),
            "Opened document store"
        );

        Ok(Self {
            path,
            _lock_file: lock_file,
            db: RwLock::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Whether a store has been created at `path`.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().join(DOCUMENTS_FILE).exists()
    }

    /// Store directory, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current schema version.
    pub fn version(&self) -> u32 {
        self.db.read().version
    }

    /// Run a read against a consistent snapshot.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        let db = self.db.read();
        f(&*db)
    }

    /// Run a write transaction.
    ///
    /// If `f` fails, or the commit cannot be persisted, nothing it wrote is
    /// kept.
    ///
    /// Each table `f` touches is cloned, and a persisted store rewrites the
    /// whole document file on commit, so a write costs time proportional to
    /// the size of the store.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let _lock = self.write_lock.lock();

        let (value, touched) = {
            let db = self.db.read();
            let mut tx = Transaction::new(&*db);
            let value = f(&mut tx)?;
            (value, tx.touched)
        };

        if touched.is_empty() {
            return Ok(value);
        }

        let mut db = self.db.write();
        let mut previous = Vec::with_capacity(touched.len());
        for (name, table) in touched {
            let old = db.tables.insert(name.clone(), table);
            previous.push((name, old));
        }

        if let Some(path) = &self.path {
            if let Err(e) = write_documents(&path.join(DOCUMENTS_FILE), &db) {
                for (name, old) in previous {
                    match old {
                        Some(table) => db.tables.insert(name, table),
                        None => db.tables.remove(&name),
                    };
                }
                return Err(e);
            }
        }

        debug!(tables = previous.len(), "Committed transaction");
        Ok(value)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| UnpakoError::Locked)?;

        Ok(lock_file)
    }
}

/// Bring `db` up to the schema's latest version.
fn migrate(mut db: Database, schema: &Schema) -> Result<Database> {
    let latest = schema.latest_version();
    if db.version > latest {
        return Err(UnpakoError::SchemaMigration {
            version: db.version,
            reason: format!("stored schema is newer than the latest known version {}", latest),
        });
    }

    for migration in schema.pending(db.version) {
        info!(from = db.version, to = migration.version, "Migrating document store");
        migration
            .apply(&mut db)
            .map_err(|e| UnpakoError::SchemaMigration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        db.version = migration.version;
    }

    Ok(db)
}

/// Write the database beside the target and rename it into place.
fn write_documents(path: &Path, db: &Database) -> Result<()> {
    let encoded = rmp_serde::to_vec(db)?;
    let tmp_path = path.with_extension("db.tmp");

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(DOCUMENTS_MAGIC)?;
        file.write_all(&[DOCUMENTS_FORMAT_VERSION])?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&encoded)?;
        file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_documents(path: &Path) -> Result<Database> {
    let bytes = fs::read(path)?;
    if bytes.len() < HEADER_SIZE {
        return Err(UnpakoError::InvalidFormat("Truncated documents file".into()));
    }

    if &bytes[0..4] != DOCUMENTS_MAGIC {
        return Err(UnpakoError::InvalidFormat("Invalid documents magic".into()));
    }

    if bytes[4] != DOCUMENTS_FORMAT_VERSION {
        return Err(UnpakoError::InvalidFormat(format!(
            "Unsupported documents format version: {}",
            bytes[4]
        )));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[5..HEADER_SIZE]);
    let len = u64::from_le_bytes(len_bytes) as usize;

    let end = HEADER_SIZE
        .checked_add(len)
        .filter(|end| end.checked_add(4).is_some_and(|total| total <= bytes.len()))
        .ok_or_else(|| UnpakoError::Corruption("documents payload is truncated".into()))?;
    let payload = &bytes[HEADER_SIZE..end];

    let mut checksum_bytes = [0u8; 4];
    checksum_bytes.copy_from_slice(&bytes[end..end + 4]);
    let stored_checksum = u32::from_le_bytes(checksum_bytes);
    let computed_checksum = crc32fast::hash(payload);
    if stored_checksum != computed_checksum {
        return Err(UnpakoError::ChecksumMismatch {
            expected: stored_checksum,
            got: computed_checksum,
        });
    }

    let mut db: Database = rmp_serde::from_slice(payload)?;
    for table in db.tables.values_mut() {
        table.rebuild_indexes();
    }
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::schema::{Migration, TableSpec};
    use crate::documents::table::Row;
    use serde_json::json;
    use tempfile::TempDir;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn notes_schema() -> Schema {
        Schema::new(vec![
            Migration::new(1).table(TableSpec::new("notes", "id").index(&["tag"])),
            Migration::new(2).table(TableSpec::new("tags", "name")),
        ])
        .unwrap()
    }

    fn failing_transform(_db: &mut Database) -> Result<()> {
        Err(UnpakoError::InvalidOperation("boom".into()))
    }

    #[test]
    fn test_in_memory_transaction() {
        let store = DocumentStore::in_memory(&notes_schema()).unwrap();
        assert_eq!(store.version(), 2);

        store
            .transaction(|tx| {
                tx.table_mut("notes")?.add(row(json!({"id": "1", "tag": "a"})))?;
                tx.table_mut("tags")?.add(row(json!({"name": "a"})))?;
                Ok(())
            })
            .unwrap();

        let count = store
            .read(|db| Ok(db.table("notes")?.where_eq("tag", &[json!("a")])?.len()))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_failed_transaction_leaves_no_trace() {
        let store = DocumentStore::in_memory(&notes_schema()).unwrap();

        let result: Result<()> = store.transaction(|tx| {
            tx.table_mut("notes")?.add(row(json!({"id": "1"})))?;
            tx.table_mut("tags")?.add(row(json!({"nope": "a"})))?;
            Ok(())
        });
        assert!(matches!(result, Err(UnpakoError::Constraint(_))));

        let count = store.read(|db| Ok(db.table("notes")?.count())).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_sees_own_writes() {
        let store = DocumentStore::in_memory(&notes_schema()).unwrap();
        let seen = store
            .transaction(|tx| {
                tx.table_mut("notes")?.add(row(json!({"id": "1"})))?;
                Ok(tx.table("notes")?.count())
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_unknown_table() {
        let store = DocumentStore::in_memory(&notes_schema()).unwrap();
        let result = store.read(|db| db.table("missing").map(|t| t.count()));
        assert!(matches!(result, Err(UnpakoError::TableNotFound(_))));
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        {
            let store = DocumentStore::create(&path, &notes_schema()).unwrap();
            store
                .transaction(|tx| {
                    tx.table_mut("notes")?.add(row(json!({"id": "1", "tag": "x"})))?;
                    Ok(())
                })
                .unwrap();
        }

        let store = DocumentStore::open(&path, &notes_schema()).unwrap();
        let hits = store
            .read(|db| Ok(db.table("notes")?.where_eq("tag", &[json!("x")])?.len()))
            .unwrap();
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_open_missing_store() {
        let dir = TempDir::new().unwrap();
        let result = DocumentStore::open(dir.path().join("nothing"), &notes_schema());
        assert!(matches!(result, Err(UnpakoError::NotInitialized)));
    }

    #[test]
    fn test_exclusive_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let _store = DocumentStore::create(&path, &notes_schema()).unwrap();

        let second = DocumentStore::open(&path, &notes_schema());
        assert!(matches!(second, Err(UnpakoError::Locked)));
    }

    #[test]
    fn test_migration_runs_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let schema = notes_schema();

        drop(DocumentStore::create(&path, &schema.truncated(1)).unwrap());

        let store = DocumentStore::open(&path, &schema).unwrap();
        assert_eq!(store.version(), 2);
        assert!(store.read(|db| db.table("tags").map(|_| ())).is_ok());
    }

    #[test]
    fn test_failed_migration_aborts_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let schema = notes_schema();

        {
            let store = DocumentStore::create(&path, &schema.truncated(1)).unwrap();
            store
                .transaction(|tx| {
                    tx.table_mut("notes")?.add(row(json!({"id": "1"})))?;
                    Ok(())
                })
                .unwrap();
        }

        let broken = Schema::new(vec![
            Migration::new(1).table(TableSpec::new("notes", "id").index(&["tag"])),
            Migration::new(2).table(TableSpec::new("tags", "name")),
            Migration::new(3).transform_tables(failing_transform),
        ])
        .unwrap();

        let result = DocumentStore::open(&path, &broken);
        assert!(matches!(
            result,
            Err(UnpakoError::SchemaMigration { version: 3, .. })
        ));

        // Nothing from the partial run was written.
        let store = DocumentStore::open(&path, &schema.truncated(1)).unwrap();
        assert_eq!(store.version(), 1);
        assert!(store.read(|db| db.table("tags").map(|_| ())).is_err());
    }

    #[test]
    fn test_newer_stored_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        drop(DocumentStore::create(&path, &notes_schema()).unwrap());

        let result = DocumentStore::open(&path, &notes_schema().truncated(1));
        assert!(matches!(result, Err(UnpakoError::SchemaMigration { .. })));
    }

    #[test]
    fn test_corrupted_file_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        drop(DocumentStore::create(&path, &notes_schema()).unwrap());

        let file = path.join(DOCUMENTS_FILE);
        let mut bytes = fs::read(&file).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xff;
        fs::write(&file, bytes).unwrap();

        let result = DocumentStore::open(&path, &notes_schema());
        assert!(matches!(result, Err(UnpakoError::ChecksumMismatch { .. })));
    }
}
