//! Versioned document tables.
//!
//! A small embedded store of JSON rows grouped into tables, each keyed by
//! one string field and carrying any number of single or compound indexes.
//! Tables are declared by a [`Schema`] whose migrations run when the store
//! is opened.

pub mod schema;
pub mod store;
pub mod table;

pub use schema::{DataTransform, Migration, RowTransform, Schema, TableSpec, TablesTransform};
pub use store::{Database, DocumentStore, Transaction};
pub use table::{IndexKey, IndexSpec, KeyPart, Row, Table};

use crate::error::{Result, UnpakoError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Serialize a value into a row.
pub fn to_row<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(UnpakoError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Deserialize a row into a value.
pub fn from_row<T: DeserializeOwned>(row: &Row) -> Result<T> {
    serde_json::from_value(Value::Object(row.clone()))
        .map_err(|e| UnpakoError::Deserialization(e.to_string()))
}
