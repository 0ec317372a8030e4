//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for storage operations across different media (local filesystem,
//! S3-compatible services, in-memory for tests).
//!

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::{ErrorKind, Result};
use crate::models::{Child, ObjectInfo};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type ObjectInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<ObjectInfo>> + Send + 'a>>;

/// Filter applied to each key found by [`list_children()`](StorageBackend::list_children).
pub type ChildPredicate<'a> = &'a (dyn Fn(&Path) -> bool + Send + Sync);

/// Unified interface for storage backends.
///
/// A backend exclusively owns the physical representation of snapshots and
/// markers; nothing else performs raw I/O against the medium.
///
/// # Path Handling
/// All paths are relative to the storage root and validated using
/// [`validate_path`](crate::validate_path) before use. Keys returned by
/// listings are in the same relative form, so callers never special-case the
/// medium.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tabstore_storage::{backend::StorageBackend, error::Result};
///
/// async fn newest_snapshot(backend: &dyn StorageBackend) -> Result<Option<Vec<u8>>> {
///     let children = backend.list_children(Path::new("my_dataset/data"), &|_| true).await?;
///     match children.last() {
///         Some(child) => Ok(Some(backend.fetch(&child.key).await?)),
///         None => Ok(None),
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// Human-readable location of the storage root (directory or bucket URL).
    fn root(&self) -> String;

    /// List all objects matching an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<ObjectInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream object metadata matching an optional prefix.
    ///
    /// The prefix is matched per path component on every backend: the prefix
    /// `ds/data` matches `ds/data/x.csv` but not `ds/data2/x.csv`. A prefix
    /// that does not exist yields an empty stream, not an error.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> ObjectInfoStream<'a>;

    /// Check if an object exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read the raw contents of an object.
    ///
    /// This is the medium-specific half of [`fetch()`](Self::fetch); callers
    /// should prefer `fetch` so that missing objects fail the same way on
    /// every backend.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write `data` at `path` and return its location.
    ///
    /// Overwrites are allowed; callers that must not overwrite check
    /// [`exists()`](Self::exists) first. With `publish` set, backends that
    /// can serve objects publicly mark the object readable and return its
    /// public URL instead of the internal location.
    ///
    /// # Notes
    /// - Implementations should create parent directories as needed.
    async fn store(&self, path: &Path, data: &[u8], publish: bool) -> Result<String>;

    /// Read an object, failing with [`NotFound`](ErrorKind::NotFound) if it
    /// does not exist.
    async fn fetch(&self, path: &Path) -> Result<Vec<u8>> {
        if !self.exists(path).await? {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        self.read(path).await
    }

    /// Read a small value (marker), or `None` if it is absent.
    async fn get_value(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        if !self.exists(path).await? {
            return Ok(None);
        }
        self.fetch(path).await.map(Some)
    }

    /// Store a small value (marker).
    async fn set_value(&self, path: &Path, value: &[u8]) -> Result<()> {
        self.store(path, value, false).await.map(|_| ())
    }

    /// Enumerate every object below `path` whose key satisfies `predicate`.
    ///
    /// Results are sorted lexically by key, which callers rely on for
    /// timestamp-prefixed names.
    async fn list_children(&self, path: &Path, predicate: ChildPredicate<'_>) -> Result<Vec<Child>> {
        let mut children: Vec<Child> = self
            .list_stream(Some(path))
            .try_filter_map(|info| {
                let keep = predicate(&info.path);
                futures::future::ready(Ok(keep.then(|| Child::from_key(info.path))))
            })
            .try_collect()
            .await?;
        children.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(children)
    }
}
