//! Per-dataset fetch, deduplication and snapshot selection.
//!
//! A dataset owns the `<dataset>/` namespace of the backend:
//!
//! ```text
//! <dataset>/
//! ├── data/
//! │   ├── data.<ts>.<fmt>            single-shot snapshots
//! │   └── data--<page>.<ts>.<fmt>    paginated snapshots
//! ├── revisions/<name>
//! ├── last_update
//! └── last_update_key[--<page>]      fingerprint of the last stored unit
//! ```
//!
//! Its state is never stored as such. "Empty", "stale" and "fresh" are
//! derived from what is in storage every time they are needed.

use crate::client::{ClientHandle, Payload, Request};
use crate::descriptor::{DatasetDescriptor, Format, Origin, Version};
use crate::error::{ErrorKind, Result, from_storage};
use crate::hash::fingerprint;
use crate::markers::{LAST_UPDATE, LAST_UPDATE_KEY, Markers};
use crate::paginate::paginate;
use crate::revisions::Revisions;
use crate::snapshot::{DATA_DIR, Snapshot, SnapshotKey};
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use reqwest::Url;
use std::path::Path;
use tabstore_storage::BackendHandle;
use time::OffsetDateTime;
use tracing::instrument;

/// What happened to one unit (a whole response, or one page) during a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// New content was written as a snapshot.
    Stored {
        page: Option<u64>,
        key: SnapshotKey,
        location: String,
    },
    /// Content matched the last stored fingerprint; nothing was written.
    Unchanged { page: Option<u64> },
    /// Content was fetched without storing it.
    Fetched { page: Option<u64>, bytes: Vec<u8> },
}

/// Summary of a single [`DatasetStore::fetch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub dataset: String,
    pub fetched_at: OffsetDateTime,
    pub units: Vec<UnitOutcome>,
}
impl FetchReport {
    pub fn stored(&self) -> usize {
        self.units.iter().filter(|u| matches!(u, UnitOutcome::Stored { .. })).count()
    }

    pub fn unchanged(&self) -> usize {
        self.units.iter().filter(|u| matches!(u, UnitOutcome::Unchanged { .. })).count()
    }
}

/// The logical content of a dataset, as returned by
/// [`DatasetStore::get_source`].
pub enum Source {
    /// A single blob: the selected snapshot, or a local file read in place.
    Blob { format: Format, content: Vec<u8> },
    /// Every snapshot, in order (incremental and paginated datasets).
    Snapshots(Snapshots),
}
impl Source {
    pub fn format(&self) -> Format {
        match self {
            Self::Blob { format, .. } => *format,
            Self::Snapshots(snapshots) => snapshots.format,
        }
    }
}

/// Lazy view over all snapshots of a dataset.
///
/// Nothing is cached: each [`stream()`](Self::stream) lists the snapshot
/// directory again and reads every snapshot from the backend.
#[derive(Clone)]
pub struct Snapshots {
    backend: BackendHandle,
    dataset: String,
    format: Format,
}
impl Snapshots {
    pub fn format(&self) -> Format {
        self.format
    }

    /// Current snapshots, ordered oldest first.
    pub async fn list(&self) -> Result<Vec<Snapshot>> {
        let dir = Path::new(&self.dataset).join(DATA_DIR);
        let children = self
            .backend
            .list_children(&dir, &|key| key.parent() == Some(dir.as_path()))
            .await
            .map_err(from_storage)?;
        let mut snapshots: Vec<Snapshot> = children
            .into_iter()
            .filter_map(|child| {
                let key = SnapshotKey::parse(child.key.file_name()?.to_str()?)?;
                (key.format == self.format).then_some(Snapshot { key, path: child.key })
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.key);
        Ok(snapshots)
    }

    /// Content of every snapshot, oldest first.
    pub fn stream(&self) -> impl Stream<Item = Result<Vec<u8>>> + Send + '_ {
        stream!({
            let snapshots = match self.list().await {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            for snapshot in snapshots {
                yield self.backend.fetch(&snapshot.path).await.map_err(from_storage);
            }
        })
    }
}

/// Fetch/versioning state machine of one dataset.
pub struct DatasetStore {
    descriptor: DatasetDescriptor,
    backend: BackendHandle,
    client: ClientHandle,
    markers: Markers,
    root_markers: Markers,
    snapshots: Snapshots,
    revisions: Revisions,
}

impl DatasetStore {
    pub fn new(descriptor: DatasetDescriptor, backend: BackendHandle, client: ClientHandle) -> Self {
        let name = descriptor.name.clone();
        Self {
            markers: Markers::dataset(backend.clone(), &name),
            root_markers: Markers::root(backend.clone()),
            snapshots: Snapshots {
                backend: backend.clone(),
                dataset: name.clone(),
                format: descriptor.format,
            },
            revisions: Revisions::new(backend.clone(), &name),
            descriptor,
            backend,
            client,
        }
    }

    /// Share store-wide markers with the other datasets of a [`RootStore`](crate::RootStore).
    pub(crate) fn with_root_markers(mut self, root_markers: Markers) -> Self {
        self.root_markers = root_markers;
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &DatasetDescriptor {
        &self.descriptor
    }

    pub fn revisions(&self) -> &Revisions {
        &self.revisions
    }

    /// Stored snapshots, ordered oldest first.
    pub async fn snapshots(&self) -> Result<Vec<Snapshot>> {
        self.snapshots.list().await
    }

    /// When this dataset last completed a storing fetch.
    pub async fn last_update(&self) -> Result<Option<OffsetDateTime>> {
        self.markers.get_timestamp(LAST_UPDATE).await
    }

    /// `true` if nothing has been stored yet, or the `last_update` marker is
    /// missing. Age alone never makes a dataset stale.
    pub async fn should_update(&self) -> Result<bool> {
        if self.snapshots().await?.is_empty() {
            return Ok(true);
        }
        Ok(self.last_update().await?.is_none())
    }

    /// Remote sources are always snapshotted; local ones only with `copy`.
    pub fn should_store(&self) -> bool {
        self.descriptor.source.is_remote() || self.descriptor.copy
    }

    /// Retrieve the source and, with `store`, persist every unit whose
    /// fingerprint differs from the last stored one.
    ///
    /// With `store`, the dataset and store-wide `last_update` markers are
    /// refreshed once every unit has been handled, even if all of them were
    /// unchanged. The store-wide marker never moves backwards. Without
    /// `store` nothing in the backend is touched.
    ///
    /// # Errors
    ///
    /// [`Fetch`](ErrorKind::Fetch) for non-2xx responses, empty bodies,
    /// transport failures, or a paginated source yielding no pages. Units
    /// stored before a failing page stay stored; markers are not refreshed.
    #[instrument(skip(self), fields(dataset = %self.descriptor.name))]
    pub async fn fetch(&self, store: bool) -> Result<FetchReport> {
        let fetched_at = OffsetDateTime::now_utc();
        let mut units = Vec::new();
        match (&self.descriptor.source, &self.descriptor.pagination) {
            (Origin::Remote { url }, Some(pagination)) => {
                let client = &self.client;
                let pages = paginate(
                    |offset| {
                        let request = Request::new(url.clone(), &self.descriptor.request)
                            .with_query(&pagination.param, offset);
                        async move { check_payload(client.get(&request).await?, &request.url) }
                    },
                    |body: &Vec<u8>| pagination.advance.extract(body),
                );
                let mut pages = std::pin::pin!(pages);
                let mut page = 0_u64;
                while let Some(body) = pages.try_next().await? {
                    units.push(self.handle_unit(Some(page), body, store).await?);
                    page += 1;
                }
                if page == 0 {
                    exn::bail!(ErrorKind::Fetch(format!("{url} returned no pages")));
                }
            },
            (Origin::Remote { url }, None) => {
                let request = Request::new(url.clone(), &self.descriptor.request);
                let body = check_payload(self.client.get(&request).await?, url)?;
                units.push(self.handle_unit(None, body, store).await?);
            },
            (Origin::Local { path }, _) => {
                let body = read_local(path).await?;
                units.push(self.handle_unit(None, body, store).await?);
            },
        }

        if store {
            self.markers.set_timestamp(LAST_UPDATE, fetched_at).await?;
            self.root_markers.advance_timestamp(LAST_UPDATE, fetched_at).await?;
        }
        let report = FetchReport {
            dataset: self.descriptor.name.clone(),
            fetched_at,
            units,
        };
        tracing::info!(stored = report.stored(), unchanged = report.unchanged(), "fetch complete");
        Ok(report)
    }

    async fn handle_unit(&self, page: Option<u64>, body: Vec<u8>, store: bool) -> Result<UnitOutcome> {
        if !store {
            return Ok(UnitOutcome::Fetched { page, bytes: body });
        }
        let hash_marker = match page {
            Some(page) => format!("{LAST_UPDATE_KEY}--{page}"),
            None => LAST_UPDATE_KEY.to_string(),
        };
        let hash = fingerprint(&body);
        if self.markers.get_string(&hash_marker).await?.as_deref() == Some(hash.as_str()) {
            tracing::debug!(?page, "content unchanged; skipping");
            return Ok(UnitOutcome::Unchanged { page });
        }

        let key = self.free_key(SnapshotKey::new(OffsetDateTime::now_utc(), page, self.descriptor.format)).await?;
        let path = key.path(self.name());
        let location = self.backend.store(&path, &body, false).await.map_err(from_storage)?;
        self.markers.set_string(&hash_marker, &hash).await?;
        tracing::info!(key = %path.display(), bytes = body.len(), "stored snapshot");
        Ok(UnitOutcome::Stored { page, key, location })
    }

    /// First key at or after `key` that is not taken yet. Snapshots are
    /// immutable, so a key is never reused even within the same microsecond.
    async fn free_key(&self, mut key: SnapshotKey) -> Result<SnapshotKey> {
        while self.backend.exists(&key.path(self.name())).await.map_err(from_storage)? {
            key = key.bumped();
        }
        Ok(key)
    }

    /// Resolve the dataset's content.
    ///
    /// Local sources without `copy` are read in place and never stored.
    /// Otherwise a fetch happens first if `update` is set or
    /// [`should_update()`](Self::should_update) says so; then incremental and
    /// paginated datasets return every snapshot, and the rest return the
    /// single snapshot picked by `version`.
    pub async fn get_source(&self, update: bool, version: Version) -> Result<Source> {
        let format = self.descriptor.format;
        if !self.should_store() {
            let Origin::Local { path } = &self.descriptor.source else {
                exn::bail!(ErrorKind::Config(format!("dataset `{}` stores nothing", self.name())));
            };
            let content = read_local(path).await?;
            return Ok(Source::Blob { format, content });
        }

        if update || self.should_update().await? {
            self.fetch(true).await?;
        }
        if self.descriptor.incremental || self.descriptor.is_paginated() {
            return Ok(Source::Snapshots(self.snapshots.clone()));
        }

        let snapshots = self.snapshots().await?;
        let selected = match version {
            Version::Newest => snapshots.last(),
            Version::Oldest => snapshots.first(),
        };
        let Some(selected) = selected else {
            exn::bail!(ErrorKind::NotFound(Path::new(self.name()).join(DATA_DIR)));
        };
        let content = self.backend.fetch(&selected.path).await.map_err(from_storage)?;
        Ok(Source::Blob { format, content })
    }
}

fn check_payload(payload: Payload, url: &Url) -> Result<Vec<u8>> {
    if !payload.is_success() {
        exn::bail!(ErrorKind::Fetch(format!("{url} returned HTTP {}", payload.status)));
    }
    if payload.body.is_empty() {
        exn::bail!(ErrorKind::Fetch(format!("{url} returned no content")));
    }
    Ok(payload.body)
}

async fn read_local(path: &Path) -> Result<Vec<u8>> {
    let content = tokio::fs::read(path)
        .await
        .or_raise(|| ErrorKind::Fetch(format!("could not read {}", path.display())))?;
    if content.is_empty() {
        exn::bail!(ErrorKind::Fetch(format!("{} is empty", path.display())));
    }
    Ok(content)
}
