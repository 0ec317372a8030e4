//! Configuration for a tabstore datastore.
//!
//! These are plain serde shapes: they describe *what* the operator wrote and
//! nothing more. Semantic validation (exactly one source, exactly one format,
//! and so on) happens once when the datastore builds its dataset descriptors.
//!
//! # Example
//!
//! ```
//! use tabstore_config::{Config, StorageConfig};
//!
//! let config = Config::from_yaml_str(r#"
//! storage:
//!   filesystem:
//!     data_root: /tmp/tabstore
//! datasets:
//!   my_dataset:
//!     csv_url: https://example.org/data.csv
//! "#).unwrap();
//! assert!(matches!(config.storage, StorageConfig::Filesystem(_)));
//! assert_eq!(config.datasets.len(), 1);
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix for environment variable overrides, e.g.
/// `TABSTORE_STORAGE__FILESYSTEM__DATA_ROOT=/srv/data`.
pub const ENV_PREFIX: &str = "TABSTORE_";
/// Nesting separator for environment variable overrides.
pub const ENV_SEPARATOR: &str = "__";
const DEFAULT_CONCURRENCY: usize = 4;

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetConfig>,
}

/// The single active storage backend.
///
/// Externally tagged, so the YAML reads `storage: { filesystem: { ... } }`.
/// Unknown backend names are rejected while loading.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageConfig {
    Filesystem(FilesystemConfig),
    S3(S3Config),
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    /// Absolute path of the directory that holds every dataset namespace.
    pub data_root: PathBuf,
}

/// S3-compatible object storage (AWS S3, Backblaze B2, MinIO, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    /// Optional key prefix inside the bucket (acts as a virtual directory).
    #[serde(default)]
    pub prefix: Option<String>,
    pub region: String,
    /// Custom endpoint for non-AWS services.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
    /// Location constraint used when the bucket has to be created.
    #[serde(default)]
    pub location: Option<String>,
    /// Base URL returned for published objects.
    #[serde(default)]
    pub public_url: Option<String>,
    /// `Cache-Control` metadata attached to published objects.
    #[serde(default)]
    pub cache_control: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConfig {
    /// How many datasets are fetched at the same time during a full update.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}
impl Default for UpdateConfig {
    fn default() -> Self {
        Self { concurrency: DEFAULT_CONCURRENCY }
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// One dataset as written in the configuration file.
///
/// Exactly one of the four source keys is expected to be set; that is checked
/// when the descriptor is built, not here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub csv_url: Option<String>,
    #[serde(default)]
    pub json_url: Option<String>,
    #[serde(default)]
    pub csv_local: Option<PathBuf>,
    #[serde(default)]
    pub json_local: Option<PathBuf>,
    /// Keep every snapshot as part of the logical dataset instead of only the
    /// newest one.
    #[serde(default)]
    pub incremental: bool,
    /// Snapshot local sources into storage instead of reading them in place.
    #[serde(default)]
    pub copy: bool,
    #[serde(default)]
    pub paginate: Option<PaginateConfig>,
    #[serde(default)]
    pub request: RequestConfig,
}

/// Extra parameters for remote requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestConfig {
    #[serde(default)]
    pub params: BTreeMap<String, Scalar>,
    #[serde(default)]
    pub headers: BTreeMap<String, Scalar>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A scalar configuration value that ends up in a query string or header.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Pagination protocol of a remote source.
///
/// Externally tagged: `paginate: { offset: { param: ..., advance: ... } }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginateConfig {
    Offset(OffsetConfig),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OffsetConfig {
    /// Name of the query parameter carrying the offset.
    pub param: String,
    /// How far a response advances the offset.
    pub advance: AdvanceConfig,
}

/// Rules for reading the offset advance out of a JSON page body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceConfig {
    /// Length of the array found at this JSON pointer.
    ArrayLength(String),
    /// Unsigned integer found at this JSON pointer.
    Value(String),
}

impl Config {
    /// Load configuration from a file, then apply environment overrides.
    ///
    /// The format is chosen from the extension: `.toml`, `.json`, anything
    /// else is read as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            exn::bail!(ErrorKind::Load(path.to_path_buf()));
        }
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Figment::from(Toml::file(path)),
            Some("json") => Figment::from(Json::file(path)),
            _ => Figment::from(Yaml::file(path)),
        };
        tracing::debug!(path = %path.display(), "Loading configuration");
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR))
            .extract()
            .or_raise(|| ErrorKind::Load(path.to_path_buf()))?;
        config.ensure_datasets()
    }

    /// Parse an inline YAML document (no environment overrides).
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = Figment::from(Yaml::string(yaml)).extract().or_raise(|| ErrorKind::Parse)?;
        config.ensure_datasets()
    }

    fn ensure_datasets(self) -> Result<Self> {
        if self.datasets.is_empty() {
            exn::bail!(ErrorKind::NoDatasets);
        }
        Ok(self)
    }
}

/// Per-user default location of the configuration file, if the platform has
/// one.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "tabstore").map(|dirs| dirs.config_dir().join("config.yml"))
}
