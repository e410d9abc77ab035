//! Guards applied when unpacking an archive onto disk.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::error::SecurityError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractLimits {
    /// Maximum decompression ratio before an entry is treated as a ZIP bomb.
    pub max_compression_ratio: u64,
    /// Maximum number of entries in an archive.
    pub max_file_count: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_compression_ratio: 100,
            max_file_count: 10_000,
        }
    }
}

/// Reject archive entry names that would land outside the extraction root:
/// absolute paths, drive prefixes and `..` components.
pub fn check_path_traversal(entry_path: &str) -> Result<(), SecurityError> {
    let traversal = || SecurityError::PathTraversal {
        path: entry_path.to_string(),
    };

    if entry_path.starts_with('/') || entry_path.starts_with('\\') {
        return Err(traversal());
    }
    // C:\ and friends
    if entry_path.len() >= 2 && entry_path.as_bytes()[1] == b':' {
        return Err(traversal());
    }
    if entry_path.split(['/', '\\']).any(|part| part == "..") {
        return Err(traversal());
    }
    if Path::new(entry_path)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(traversal());
    }
    Ok(())
}

pub fn check_file_count(count: u64, limits: &ExtractLimits) -> Result<(), SecurityError> {
    if count > limits.max_file_count {
        return Err(SecurityError::TooManyFiles {
            count,
            limit: limits.max_file_count,
        });
    }
    Ok(())
}

pub fn check_compression_ratio(
    name: &str,
    compressed_size: u64,
    uncompressed_size: u64,
    limits: &ExtractLimits,
) -> Result<(), SecurityError> {
    let ratio = match compressed_size {
        0 if uncompressed_size > 0 => u64::MAX,
        0 => return Ok(()),
        c => uncompressed_size / c,
    };
    if ratio > limits.max_compression_ratio {
        return Err(SecurityError::ZipBomb {
            name: name.to_string(),
            ratio,
            limit: limits.max_compression_ratio,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_entry_names() {
        assert!(check_path_traversal("index.html").is_ok());
        assert!(check_path_traversal("images/banner.jpg").is_ok());
        assert!(check_path_traversal("images/sub/logo.png").is_ok());
    }

    #[test]
    fn traversal_attempts() {
        assert!(check_path_traversal("../../../etc/passwd").is_err());
        assert!(check_path_traversal("images/../../outside.html").is_err());
        assert!(check_path_traversal("images\\..\\..\\outside.html").is_err());
        assert!(check_path_traversal("/etc/passwd").is_err());
        assert!(check_path_traversal("\\Windows\\System32").is_err());
        assert!(check_path_traversal("C:\\Windows\\System32").is_err());
    }

    #[test]
    fn file_count_limit() {
        let limits = ExtractLimits::default();
        assert!(check_file_count(10_000, &limits).is_ok());
        assert!(matches!(
            check_file_count(10_001, &limits),
            Err(SecurityError::TooManyFiles { count: 10_001, .. })
        ));
    }

    #[test]
    fn compression_ratio_limit() {
        let limits = ExtractLimits::default();
        assert!(check_compression_ratio("a", 1000, 50_000, &limits).is_ok());
        assert!(check_compression_ratio("a", 100, 100_000, &limits).is_err());
        assert!(check_compression_ratio("a", 0, 0, &limits).is_ok());
        assert!(check_compression_ratio("a", 0, 10, &limits).is_err());
    }
}
