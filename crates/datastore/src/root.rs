//! Store-wide freshness and batch updates.

use crate::client::{ClientHandle, HttpClient};
use crate::dataset::{DatasetStore, FetchReport};
use crate::descriptor::DatasetDescriptor;
use crate::error::{ErrorKind, Result};
use crate::markers::{LAST_COMPLETE_UPDATE, LAST_UPDATE, Markers};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tabstore_config::{Config, StorageConfig};
use tabstore_storage::BackendHandle;
use time::OffsetDateTime;
use tracing::instrument;

/// Tuning for [`RootStore::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Datasets fetched at the same time. Zero is treated as one.
    pub concurrency: usize,
}
impl Default for UpdateOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Result of a full update pass.
#[derive(Debug)]
pub struct UpdateReport {
    /// One entry per dataset, in dataset order.
    pub outcomes: Vec<(String, Result<FetchReport>)>,
    /// `true` if every dataset succeeded and `last_complete_update` was
    /// stamped.
    pub complete: bool,
}
impl UpdateReport {
    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter(|(_, r)| r.is_err()).map(|(name, _)| name.as_str())
    }
}

/// Owns every dataset of one storage backend.
pub struct RootStore {
    backend: BackendHandle,
    markers: Markers,
    datasets: Vec<DatasetStore>,
    options: UpdateOptions,
}

impl RootStore {
    /// # Errors
    ///
    /// [`Config`](ErrorKind::Config) if there are no datasets, or two share a
    /// name.
    pub fn new(
        backend: BackendHandle,
        client: ClientHandle,
        descriptors: impl IntoIterator<Item = DatasetDescriptor>,
        options: UpdateOptions,
    ) -> Result<Self> {
        let markers = Markers::root(backend.clone());
        let mut seen = HashSet::new();
        let mut datasets = Vec::new();
        for descriptor in descriptors {
            if !seen.insert(descriptor.name.clone()) {
                exn::bail!(ErrorKind::Config(format!("dataset `{}` is configured twice", descriptor.name)));
            }
            let dataset = DatasetStore::new(descriptor, backend.clone(), client.clone());
            datasets.push(dataset.with_root_markers(markers.clone()));
        }
        if datasets.is_empty() {
            exn::bail!(ErrorKind::Config("no datasets configured".to_string()));
        }
        Ok(Self {
            markers,
            backend,
            datasets,
            options,
        })
    }

    /// Wire a store from configuration: the configured backend, an HTTP
    /// client, and one validated descriptor per dataset.
    pub fn open(config: &Config) -> Result<Self> {
        let descriptors = config
            .datasets
            .iter()
            .map(|(name, dataset)| DatasetDescriptor::new(name, dataset))
            .collect::<Result<Vec<_>>>()?;
        let backend_name = match &config.storage {
            StorageConfig::Filesystem(_) => "filesystem",
            StorageConfig::S3(_) => "s3",
        };
        let backend = tabstore_storage::open(backend_name, &config.storage)
            .map_err(|err| err.raise(ErrorKind::Config(format!("could not open `{backend_name}` storage"))))?;
        let client: ClientHandle = Arc::new(HttpClient::new()?);
        let options = UpdateOptions {
            concurrency: config.update.concurrency,
        };
        Self::new(backend, client, descriptors, options)
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn datasets(&self) -> &[DatasetStore] {
        &self.datasets
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetStore> {
        self.datasets.iter().find(|d| d.name() == name)
    }

    /// When any dataset last completed a storing fetch.
    pub async fn last_update(&self) -> Result<Option<OffsetDateTime>> {
        self.markers.get_timestamp(LAST_UPDATE).await
    }

    /// When a full [`update()`](Self::update) pass last succeeded for every
    /// dataset.
    pub async fn last_complete_update(&self) -> Result<Option<OffsetDateTime>> {
        self.markers.get_timestamp(LAST_COMPLETE_UPDATE).await
    }

    /// Fetch every dataset, up to `concurrency` at a time.
    ///
    /// A failing dataset is logged and reported but does not stop the others.
    /// `last_complete_update` is stamped only if every dataset succeeded.
    /// Local datasets without `copy` are read but not stored.
    ///
    /// # Errors
    ///
    /// Only when stamping `last_complete_update` fails; per-dataset failures
    /// are in the report.
    #[instrument(skip(self), fields(datasets = self.datasets.len()))]
    pub async fn update(&self) -> Result<UpdateReport> {
        let outcomes: Vec<(String, Result<FetchReport>)> = futures::stream::iter(&self.datasets)
            .map(|dataset| async move {
                let result = dataset.fetch(dataset.should_store()).await;
                if let Err(err) = &result {
                    tracing::warn!(dataset = dataset.name(), error = ?err, "dataset update failed");
                }
                (dataset.name().to_string(), result)
            })
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let complete = outcomes.iter().all(|(_, result)| result.is_ok());
        if complete {
            self.markers.set_timestamp(LAST_COMPLETE_UPDATE, OffsetDateTime::now_utc()).await?;
            tracing::info!("update pass complete");
        } else {
            let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
            tracing::warn!(failed, "update pass incomplete");
        }
        Ok(UpdateReport { outcomes, complete })
    }
}
