//! Storage models.
//!
//! Metadata returned by backends when listing, plus the `(name, key)` pairs
//! handed out by [`list_children`](crate::StorageBackend::list_children).

use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Object metadata returned by storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl ObjectInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: impl Into<OffsetDateTime>) -> Self {
        Self {
            path: path.into(),
            size,
            modified: modified.into(),
        }
    }
}

/// An entry found below a listed path.
///
/// `key` is already in the backend's canonical form and can be passed
/// straight back to [`fetch`](crate::StorageBackend::fetch).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Child {
    /// File name without its final extension.
    pub name: String,
    /// Relative key from the storage root.
    pub key: PathBuf,
}
impl Child {
    pub fn from_key(key: impl Into<PathBuf>) -> Self {
        let key = key.into();
        let name = key.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        Self { name, key }
    }

    pub fn key(&self) -> &Path {
        &self.key
    }
}
