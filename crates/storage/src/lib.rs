pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
use crate::error::Result;
pub use crate::models::{Child, ObjectInfo};
pub use crate::path::{is_single_component, validate as validate_path};
use std::sync::Arc;
use tabstore_config::StorageConfig;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;

/// Instantiate the single active backend described by the configuration.
///
/// Fails with [`Config`](error::ErrorKind::Config) when the configuration names a
/// backend this build was compiled without.
pub fn open(name: &str, config: &StorageConfig) -> Result<BackendHandle> {
    let handle: BackendHandle = match config {
        StorageConfig::Filesystem(fs) => Arc::new(backend::LocalBackend::new(name, &fs.data_root)?),
        #[cfg(feature = "s3")]
        StorageConfig::S3(s3) => Arc::new(backend::S3Backend::new(name, s3)?),
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3(_) => exn::bail!(error::ErrorKind::Config("built without the `s3` feature".to_string())),
    };
    tracing::debug!(backend = handle.name(), root = %handle.root(), "opened storage backend");
    Ok(handle)
}
