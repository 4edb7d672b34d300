//! Tables of JSON documents with secondary indexes.

use crate::error::{Result, UnpakoError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A stored document.
pub type Row = serde_json::Map<String, Value>;

/// One component of an index key.
///
/// Ordering follows variant order, then value.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl KeyPart {
    /// Convert a field value. Nulls, floats, arrays and objects are not
    /// indexable.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(KeyPart::Bool(*b)),
            Value::Number(n) => n.as_i64().map(KeyPart::Int),
            Value::String(s) => Some(KeyPart::Str(s.clone())),
            _ => None,
        }
    }
}

/// Key of an index entry; one part per indexed field.
pub type IndexKey = Vec<KeyPart>;

/// Declaration of a secondary index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
}

impl IndexSpec {
    /// Index on one field, named after it.
    pub fn single(field: &str) -> Self {
        Self {
            name: field.to_string(),
            fields: vec![field.to_string()],
        }
    }

    /// Compound index, named `[a+b]`.
    pub fn compound(fields: &[&str]) -> Self {
        Self {
            name: format!("[{}]", fields.join("+")),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Key for `row`, or `None` if any indexed field is missing or not
    /// indexable.
    fn key_for(&self, row: &Row) -> Option<IndexKey> {
        self.fields
            .iter()
            .map(|field| row.get(field).and_then(KeyPart::from_value))
            .collect()
    }
}

/// A table of rows keyed by a string primary key field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Table {
    /// Field holding the primary key.
    key_path: String,

    /// Declared secondary indexes.
    specs: Vec<IndexSpec>,

    /// Rows by primary key.
    rows: BTreeMap<String, Row>,

    /// Index name -> key -> primary keys. Rebuilt after load.
    #[serde(skip)]
    indexes: HashMap<String, BTreeMap<IndexKey, BTreeSet<String>>>,
}

impl Table {
    /// Create an empty table.
    pub fn new(key_path: &str, specs: Vec<IndexSpec>) -> Self {
        let mut table = Self {
            key_path: key_path.to_string(),
            specs,
            rows: BTreeMap::new(),
            indexes: HashMap::new(),
        };
        table.rebuild_indexes();
        table
    }

    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    pub fn index_specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    /// Replace the index declarations. Rows are untouched.
    pub fn set_indexes(&mut self, specs: Vec<IndexSpec>) {
        self.specs = specs;
        self.rebuild_indexes();
    }

    /// Recompute every index from the rows.
    pub fn rebuild_indexes(&mut self) {
        let mut indexes: HashMap<String, BTreeMap<IndexKey, BTreeSet<String>>> = self
            .specs
            .iter()
            .map(|spec| (spec.name.clone(), BTreeMap::new()))
            .collect();

        for (key, row) in &self.rows {
            for spec in &self.specs {
                if let Some(index_key) = spec.key_for(row) {
                    if let Some(index) = indexes.get_mut(&spec.name) {
                        index.entry(index_key).or_default().insert(key.clone());
                    }
                }
            }
        }

        self.indexes = indexes;
    }

    /// Primary key of a row.
    pub fn key_of(&self, row: &Row) -> Result<String> {
        match row.get(&self.key_path) {
            Some(Value::String(key)) if !key.is_empty() => Ok(key.clone()),
            _ => Err(UnpakoError::Constraint(format!(
                "row is missing primary key {:?}",
                self.key_path
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// Rows in primary key order.
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    /// Insert or replace a row.
    pub fn put(&mut self, row: Row) -> Result<String> {
        let key = self.key_of(&row)?;
        if let Some(old) = self.rows.remove(&key) {
            self.unindex(&key, &old);
        }
        self.index(&key, &row);
        self.rows.insert(key.clone(), row);
        Ok(key)
    }

    /// Insert a row whose key must not exist yet.
    pub fn add(&mut self, row: Row) -> Result<String> {
        let key = self.key_of(&row)?;
        if self.rows.contains_key(&key) {
            return Err(UnpakoError::Constraint(format!("key {:?} already exists", key)));
        }
        self.index(&key, &row);
        self.rows.insert(key.clone(), row);
        Ok(key)
    }

    /// Insert many rows. Nothing is inserted if any key is missing or taken.
    pub fn bulk_add(&mut self, rows: Vec<Row>) -> Result<usize> {
        let mut seen = BTreeSet::new();
        for row in &rows {
            let key = self.key_of(row)?;
            if self.rows.contains_key(&key) || !seen.insert(key.clone()) {
                return Err(UnpakoError::Constraint(format!("key {:?} already exists", key)));
            }
        }

        let count = rows.len();
        for row in rows {
            self.add(row)?;
        }
        Ok(count)
    }

    /// Merge `changes` into an existing row. Returns false if the row does
    /// not exist.
    pub fn update(&mut self, key: &str, changes: Row) -> Result<bool> {
        if let Some(new_key) = changes.get(&self.key_path) {
            if new_key.as_str() != Some(key) {
                return Err(UnpakoError::Constraint(format!(
                    "cannot change primary key of {:?}",
                    key
                )));
            }
        }

        let Some(mut row) = self.rows.remove(key) else {
            return Ok(false);
        };
        self.unindex(key, &row);
        row.extend(changes);
        self.index(key, &row);
        self.rows.insert(key.to_string(), row);
        Ok(true)
    }

    pub fn delete(&mut self, key: &str) -> Option<Row> {
        let row = self.rows.remove(key)?;
        self.unindex(key, &row);
        Some(row)
    }

    /// Delete many rows, returning how many existed.
    pub fn bulk_delete<S: AsRef<str>>(&mut self, keys: &[S]) -> usize {
        keys.iter()
            .filter(|key| self.delete((*key).as_ref()).is_some())
            .count()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.rebuild_indexes();
    }

    /// Rewrite every row. Primary keys must survive the rewrite.
    ///
    /// An error leaves the table partially rewritten; migrations run this on
    /// a working copy.
    pub fn map_rows<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(Row) -> Result<Row>,
    {
        let rows = std::mem::take(&mut self.rows);
        let mut rewritten = BTreeMap::new();
        for (key, row) in rows {
            let row = f(row)?;
            let new_key = self.key_of(&row)?;
            if new_key != key {
                return Err(UnpakoError::Constraint(format!(
                    "row rewrite changed primary key {:?} to {:?}",
                    key, new_key
                )));
            }
            rewritten.insert(key, row);
        }
        self.rows = rewritten;
        self.rebuild_indexes();
        Ok(())
    }

    /// Rows whose indexed fields equal `values`, in index order.
    pub fn where_eq(&self, index: &str, values: &[Value]) -> Result<Vec<&Row>> {
        let entries = self.index_entries(index)?;
        let Some(key) = values
            .iter()
            .map(KeyPart::from_value)
            .collect::<Option<IndexKey>>()
        else {
            return Ok(Vec::new());
        };

        Ok(entries
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|pk| self.rows.get(pk))
            .collect())
    }

    /// Every indexed row, ascending by index key.
    pub fn order_by(&self, index: &str) -> Result<Vec<&Row>> {
        let entries = self.index_entries(index)?;
        Ok(entries
            .values()
            .flatten()
            .filter_map(|pk| self.rows.get(pk))
            .collect())
    }

    fn index_entries(&self, index: &str) -> Result<&BTreeMap<IndexKey, BTreeSet<String>>> {
        self.indexes.get(index).ok_or_else(|| {
            UnpakoError::InvalidOperation(format!("no index named {:?}", index))
        })
    }

    fn index(&mut self, key: &str, row: &Row) {
        for spec in &self.specs {
            if let Some(index_key) = spec.key_for(row) {
                self.indexes
                    .entry(spec.name.clone())
                    .or_default()
                    .entry(index_key)
                    .or_default()
                    .insert(key.to_string());
            }
        }
    }

    fn unindex(&mut self, key: &str, row: &Row) {
        for spec in &self.specs {
            let Some(index_key) = spec.key_for(row) else {
                continue;
            };
            if let Some(index) = self.indexes.get_mut(&spec.name) {
                if let Some(keys) = index.get_mut(&index_key) {
                    keys.remove(key);
                    if keys.is_empty() {
                        index.remove(&index_key);
                    }
                }
            }
        }
    }
}
