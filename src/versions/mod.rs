//! File version chains on top of the document store.

pub mod manager;
pub mod schema;

pub use manager::{AddOutcome, VersionContent, VersionPolicy, VersionStore};
pub use schema::{schema, FILE_HISTORY, FILE_METADATA, FILE_VERSIONS};
