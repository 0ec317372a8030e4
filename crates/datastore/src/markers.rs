//! Small persisted values: freshness timestamps and content fingerprints.

use crate::error::{ErrorKind, Result, from_storage};
use std::path::PathBuf;
use std::sync::Arc;
use tabstore_storage::BackendHandle;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;

pub(crate) const LAST_UPDATE: &str = "last_update";
pub(crate) const LAST_COMPLETE_UPDATE: &str = "last_complete_update";
pub(crate) const LAST_UPDATE_KEY: &str = "last_update_key";

/// Marker objects under one namespace (a dataset, or the store root).
///
/// Clones share one lock, which serializes
/// [`advance_timestamp()`](Self::advance_timestamp) between them.
#[derive(Clone)]
pub(crate) struct Markers {
    backend: BackendHandle,
    namespace: Option<PathBuf>,
    guard: Arc<Mutex<()>>,
}

impl Markers {
    pub fn root(backend: BackendHandle) -> Self {
        Self {
            backend,
            namespace: None,
            guard: Arc::default(),
        }
    }

    pub fn dataset(backend: BackendHandle, name: &str) -> Self {
        Self {
            backend,
            namespace: Some(PathBuf::from(name)),
            guard: Arc::default(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        match &self.namespace {
            Some(namespace) => namespace.join(name),
            None => PathBuf::from(name),
        }
    }

    pub async fn get_string(&self, name: &str) -> Result<Option<String>> {
        let path = self.path(name);
        let Some(bytes) = self.backend.get_value(&path).await.map_err(from_storage)? else {
            return Ok(None);
        };
        String::from_utf8(bytes).map(Some).map_err(|_| exn::Exn::from(ErrorKind::InvalidMarker(path)))
    }

    pub async fn set_string(&self, name: &str, value: &str) -> Result<()> {
        let path = self.path(name);
        self.backend.set_value(&path, value.as_bytes()).await.map_err(from_storage)?;
        tracing::debug!(key = %path.display(), "wrote marker");
        Ok(())
    }

    pub async fn get_timestamp(&self, name: &str) -> Result<Option<OffsetDateTime>> {
        let Some(value) = self.get_string(name).await? else {
            return Ok(None);
        };
        OffsetDateTime::parse(value.trim(), &Rfc3339)
            .map(Some)
            .map_err(|_| exn::Exn::from(ErrorKind::InvalidMarker(self.path(name))))
    }

    pub async fn set_timestamp(&self, name: &str, at: OffsetDateTime) -> Result<()> {
        let value = at
            .format(&Rfc3339)
            .map_err(|_| exn::Exn::from(ErrorKind::InvalidMarker(self.path(name))))?;
        self.set_string(name, &value).await
    }

    /// Set a timestamp marker unless it already holds a later time. An
    /// unparseable marker is replaced.
    pub async fn advance_timestamp(&self, name: &str, at: OffsetDateTime) -> Result<()> {
        let _guard = self.guard.lock().await;
        match self.get_timestamp(name).await {
            Ok(Some(current)) if current >= at => return Ok(()),
            Ok(_) => {},
            Err(err) if matches!(&*err, ErrorKind::InvalidMarker(_)) => {
                tracing::warn!(key = %self.path(name).display(), "replacing unreadable marker");
            },
            Err(err) => return Err(err),
        }
        self.set_timestamp(name, at).await
    }
}
