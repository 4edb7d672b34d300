//! History views: version statistics and transfer, plus the share log.

pub mod facade;
pub mod share_log;

pub use facade::History;
pub use share_log::{ShareEntry, ShareLog};
