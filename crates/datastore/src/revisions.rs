//! Named, overwritable artifacts stored next to a dataset's snapshots.

use crate::error::{ErrorKind, Result, from_storage};
use std::path::{Path, PathBuf};
use tabstore_storage::{BackendHandle, is_single_component};

const REVISIONS_DIR: &str = "revisions";

/// Revisions of one dataset, kept under `<dataset>/revisions/<name>`.
///
/// Unlike snapshots, revisions are addressed by name and saving an existing
/// name replaces it.
#[derive(Clone)]
pub struct Revisions {
    backend: BackendHandle,
    root: PathBuf,
}

impl Revisions {
    pub(crate) fn new(backend: BackendHandle, dataset: &str) -> Self {
        Self {
            backend,
            root: Path::new(dataset).join(REVISIONS_DIR),
        }
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        if !is_single_component(name) {
            exn::bail!(ErrorKind::Config(format!("`{name}` is not a valid revision name")));
        }
        Ok(self.root.join(name))
    }

    /// Store `content` under `name`, returning the backend location.
    pub async fn save(&self, name: &str, content: &[u8]) -> Result<String> {
        let path = self.path(name)?;
        let location = self.backend.store(&path, content, false).await.map_err(from_storage)?;
        tracing::info!(key = %path.display(), "saved revision");
        Ok(location)
    }

    /// Read a revision; [`NotFound`](ErrorKind::NotFound) if it was never saved.
    pub async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path(name)?;
        self.backend.fetch(&path).await.map_err(from_storage)
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        let path = self.path(name)?;
        self.backend.exists(&path).await.map_err(from_storage)
    }

    /// Names of every saved revision, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let root = &self.root;
        let children = self
            .backend
            .list_children(root, &|key| key.parent() == Some(root.as_path()))
            .await
            .map_err(from_storage)?;
        Ok(children
            .into_iter()
            .filter_map(|child| child.key.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }
}
