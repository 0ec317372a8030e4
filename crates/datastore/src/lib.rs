//! Versioned storage for fetched tabular datasets.
//!
//! Each configured dataset is fetched from its source (a remote URL, possibly
//! paginated, or a local file) and written to the storage backend as an
//! immutable, timestamped snapshot. Fetches whose content matches the latest
//! snapshot are deduplicated by content fingerprint.
//!
//! # Layout
//! Everything lives below the backend root:
//! - `last_update`, `last_complete_update`: store-wide freshness markers.
//! - `<dataset>/last_update`, `<dataset>/last_update_key[--<page>]`: per
//!   dataset freshness and the fingerprint of the latest stored content.
//! - `<dataset>/data/data[--<page>].<timestamp>.<csv|json>`: snapshots.
//! - `<dataset>/revisions/<name>`: named derived artifacts.
//!
//! [`DatasetStore`] drives a single dataset, [`RootStore`] owns all of them
//! and runs batch updates.

mod client;
mod dataset;
mod descriptor;
pub mod error;
mod hash;
mod markers;
mod paginate;
mod revisions;
mod root;
mod snapshot;
#[cfg(test)]
mod testing;

pub use crate::client::{ClientHandle, HttpClient, Payload, Request, SourceClient};
pub use crate::dataset::{DatasetStore, FetchReport, Snapshots, Source, UnitOutcome};
pub use crate::descriptor::{Advance, DatasetDescriptor, Format, Origin, Pagination, RequestSpec, Version};
pub use crate::hash::fingerprint;
pub use crate::paginate::paginate;
pub use crate::revisions::Revisions;
pub use crate::root::{RootStore, UpdateOptions, UpdateReport};
pub use crate::snapshot::{Snapshot, SnapshotKey};
