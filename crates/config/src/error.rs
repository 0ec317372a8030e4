//! Config Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The configuration source could not be read or does not match the
    /// expected shape (unknown backend, unknown pagination method, etc.).
    #[display("could not load configuration from {}", _0.display())]
    Load(#[error(not(source))] PathBuf),
    /// An inline configuration document could not be parsed.
    #[display("invalid configuration document")]
    Parse,
    /// The configuration parsed, but declares no datasets.
    #[display("no datasets configured")]
    NoDatasets,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
