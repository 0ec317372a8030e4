//! Datastore Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;
use tabstore_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};

/// A datastore error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for datastore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a datastore failure.
///
/// ### Operational Errors
/// - [`ErrorKind::Config`] - fatal, raised at construction.
/// - [`ErrorKind::Fetch`] - the source could not deliver content.
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::InvalidMarker`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Storage`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A dataset descriptor or store setup is invalid.
    #[display("invalid configuration: {_0}")]
    Config(#[error(not(source))] String),
    /// A remote or local source failed, or returned no content.
    #[display("fetch failed: {_0}")]
    Fetch(#[error(not(source))] String),
    /// A requested object does not exist in storage.
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// A marker object exists but its contents cannot be parsed.
    #[display("invalid marker: {}", _0.display())]
    InvalidMarker(#[error(not(source))] PathBuf),
    /// A storage backend operation failed.
    #[display("storage operation failed")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }
}

/// Re-raise a storage error, keeping missing objects distinguishable.
#[track_caller]
pub(crate) fn from_storage(err: StorageError) -> Error {
    let kind = match &*err {
        StorageErrorKind::NotFound(path) => ErrorKind::NotFound(path.clone()),
        _ => ErrorKind::Storage,
    };
    err.raise(kind)
}
