//! Logical path rules and display helpers.
//!
//! A logical path names a shared item. `/` separates cosmetic directories;
//! nothing here touches the filesystem.

use crate::error::{Result, UnpakoError};

/// Path used when content is shared without a name.
pub const DEFAULT_FILEPATH: &str = "content.txt";

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Whether `filepath` is acceptable as a logical path.
pub fn is_valid_filepath(filepath: &str) -> bool {
    if filepath.trim().is_empty() || filepath != filepath.trim() {
        return false;
    }
    if filepath.starts_with('/') || filepath.ends_with('/') {
        return false;
    }
    !filepath
        .chars()
        .any(|c| c.is_control() || INVALID_CHARS.contains(&c))
}

/// Validate a logical path.
pub fn validate_filepath(filepath: &str) -> Result<()> {
    if is_valid_filepath(filepath) {
        Ok(())
    } else {
        Err(UnpakoError::InvalidPath(filepath.to_string()))
    }
}

/// Trim whitespace and slashes at both ends and collapse repeated slashes.
pub fn normalize_filepath(filepath: &str) -> String {
    filepath
        .trim()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Last segment of a logical path.
pub fn filename(filepath: &str) -> &str {
    filepath.rsplit('/').next().unwrap_or(filepath)
}

/// Parts of a logical path, as shown in the file tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilepathInfo {
    pub filename: String,
    pub directory: String,
    pub extension: String,
    pub is_root_level: bool,
    pub depth: usize,
}

impl FilepathInfo {
    pub fn parse(filepath: &str) -> Self {
        let parts: Vec<&str> = filepath.split('/').collect();
        let filename = parts.last().copied().unwrap_or_default().to_string();
        let directory = parts[..parts.len().saturating_sub(1)].join("/");
        let extension = match filename.rsplit_once('.') {
            Some((_, ext)) => ext.to_string(),
            None => String::new(),
        };

        Self {
            filename,
            directory,
            extension,
            is_root_level: parts.len() == 1,
            depth: parts.len().saturating_sub(1),
        }
    }
}

/// Human readable size ("0 Bytes", "1.5 KB", ...).
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

/// Space saved by compression, in whole percent.
pub fn compression_ratio(original: u64, compressed: u64) -> i64 {
    if original == 0 {
        return 0;
    }
    let saved = original as f64 - compressed as f64;
    (saved / original as f64 * 100.0).round() as i64
}
