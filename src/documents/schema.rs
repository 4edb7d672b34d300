//! Schema versions and the migrations between them.
//!
//! A schema is an ordered list of migrations. Each one declares the tables
//! and indexes that exist from its version on and may carry a data
//! transform that runs once over the rows already stored.

use crate::documents::store::Database;
use crate::documents::table::{IndexSpec, Row, Table};
use crate::error::{Result, UnpakoError};
use std::fmt;

/// Rewrites one row.
pub type RowTransform = fn(Row) -> Result<Row>;

/// Restructures across tables.
pub type TablesTransform = fn(&mut Database) -> Result<()>;

/// Data rewrite run by a migration after its table declarations apply.
#[derive(Clone)]
pub enum DataTransform {
    /// Rewrite every row of one table.
    EachRow { table: String, apply: RowTransform },
    /// Free-form restructuring, e.g. splitting one table into two.
    Tables(TablesTransform),
}

impl fmt::Debug for DataTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataTransform::EachRow { table, .. } => f
                .debug_struct("EachRow")
                .field("table", table)
                .finish_non_exhaustive(),
            DataTransform::Tables(_) => f.write_str("Tables(..)"),
        }
    }
}

/// Declaration of a table and its indexes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub key_path: String,
    pub indexes: Vec<IndexSpec>,
}

impl TableSpec {
    pub fn new(name: &str, key_path: &str) -> Self {
        Self {
            name: name.to_string(),
            key_path: key_path.to_string(),
            indexes: Vec::new(),
        }
    }

    /// Add single-field indexes.
    pub fn index(mut self, fields: &[&str]) -> Self {
        self.indexes
            .extend(fields.iter().map(|field| IndexSpec::single(field)));
        self
    }

    /// Add a compound index.
    pub fn compound(mut self, fields: &[&str]) -> Self {
        self.indexes.push(IndexSpec::compound(fields));
        self
    }
}

/// One schema version.
#[derive(Clone, Debug)]
pub struct Migration {
    pub version: u32,
    pub tables: Vec<TableSpec>,
    pub drop_tables: Vec<String>,
    pub transform: Option<DataTransform>,
}

impl Migration {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            tables: Vec::new(),
            drop_tables: Vec::new(),
            transform: None,
        }
    }

    pub fn table(mut self, spec: TableSpec) -> Self {
        self.tables.push(spec);
        self
    }

    pub fn drop_table(mut self, name: &str) -> Self {
        self.drop_tables.push(name.to_string());
        self
    }

    pub fn transform_rows(mut self, table: &str, apply: RowTransform) -> Self {
        self.transform = Some(DataTransform::EachRow {
            table: table.to_string(),
            apply,
        });
        self
    }

    pub fn transform_tables(mut self, apply: TablesTransform) -> Self {
        self.transform = Some(DataTransform::Tables(apply));
        self
    }

    /// Apply declarations, then the transform, to `db`.
    pub(crate) fn apply(&self, db: &mut Database) -> Result<()> {
        for spec in &self.tables {
            match db.tables.get_mut(&spec.name) {
                Some(table) => {
                    if table.key_path() != spec.key_path {
                        return Err(UnpakoError::InvalidOperation(format!(
                            "cannot change primary key of {} from {:?} to {:?}",
                            spec.name,
                            table.key_path(),
                            spec.key_path
                        )));
                    }
                    table.set_indexes(spec.indexes.clone());
                }
                None => {
                    db.tables.insert(
                        spec.name.clone(),
                        Table::new(&spec.key_path, spec.indexes.clone()),
                    );
                }
            }
        }

        for name in &self.drop_tables {
            db.tables.remove(name);
        }

        match &self.transform {
            Some(DataTransform::EachRow { table, apply }) => db.table_mut(table)?.map_rows(*apply),
            Some(DataTransform::Tables(apply)) => apply(db),
            None => Ok(()),
        }
    }
}

/// Ordered list of schema versions.
#[derive(Clone, Debug)]
pub struct Schema {
    migrations: Vec<Migration>,
}

impl Schema {
    /// Versions must start at 1 and strictly increase.
    pub fn new(migrations: Vec<Migration>) -> Result<Self> {
        let mut previous = 0;
        for migration in &migrations {
            if migration.version <= previous {
                return Err(UnpakoError::InvalidOperation(format!(
                    "schema version {} does not follow {}",
                    migration.version, previous
                )));
            }
            previous = migration.version;
        }
        Ok(Self { migrations })
    }

    /// Schema from migrations already listed in ascending version order.
    pub(crate) fn from_ordered(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    /// Declared versions, oldest first.
    pub fn versions(&self) -> impl Iterator<Item = u32> + '_ {
        self.migrations.iter().map(|m| m.version)
    }

    /// Newest declared version, 0 for an empty schema.
    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    /// Migrations newer than `version`, oldest first.
    pub fn pending(&self, version: u32) -> impl Iterator<Item = &Migration> {
        self.migrations.iter().filter(move |m| m.version > version)
    }

    /// The schema as it stood at `version`.
    pub fn truncated(&self, version: u32) -> Schema {
        Schema {
            migrations: self
                .migrations
                .iter()
                .filter(|m| m.version <= version)
                .cloned()
                .collect(),
        }
    }
}
