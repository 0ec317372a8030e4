//! Validated, immutable dataset descriptors.
//!
//! A [`DatasetConfig`] is whatever the operator wrote; a [`DatasetDescriptor`]
//! is the resolved form the store works with. Every ambiguity (two sources,
//! two formats, a paginated local file) is rejected here, once, so nothing
//! downstream has to re-check it.

use crate::error::{ErrorKind, Result};
use crate::markers::{LAST_COMPLETE_UPDATE, LAST_UPDATE};
use exn::ResultExt;
use reqwest::Url;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tabstore_config::{AdvanceConfig, DatasetConfig, PaginateConfig};
use tabstore_storage::is_single_component;

/// Marker names that live at the store root and therefore cannot double as
/// dataset namespaces.
const ROOT_MARKERS: [&str; 2] = [LAST_UPDATE, LAST_COMPLETE_UPDATE];

/// Declared format of the raw source bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Format {
    Csv,
    Json,
}
impl Format {
    /// File extension used in snapshot keys.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}
impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where the raw bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Remote { url: Url },
    Local { path: PathBuf },
}
impl Origin {
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

/// Which single snapshot to return for non-incremental datasets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Version {
    #[default]
    Newest,
    Oldest,
}
impl FromStr for Version {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            other => exn::bail!(ErrorKind::Config(format!("unknown version `{other}`, expected `newest` or `oldest`"))),
        }
    }
}
impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Newest => f.write_str("newest"),
            Self::Oldest => f.write_str("oldest"),
        }
    }
}

/// How far one page moves the offset, read from the page body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Length of the JSON array at this pointer.
    ArrayLength(String),
    /// Unsigned integer at this pointer.
    Value(String),
}
impl Advance {
    fn pointer(&self) -> &str {
        match self {
            Self::ArrayLength(pointer) | Self::Value(pointer) => pointer,
        }
    }

    /// Read the advance out of a JSON page body.
    ///
    /// # Errors
    ///
    /// [`Fetch`](ErrorKind::Fetch) if the body is not JSON, the pointer does
    /// not resolve, or the value has the wrong type.
    pub fn extract(&self, body: &[u8]) -> Result<u64> {
        let document: serde_json::Value =
            serde_json::from_slice(body).or_raise(|| ErrorKind::Fetch("page body is not valid JSON".to_string()))?;
        let pointer = self.pointer();
        let value = document
            .pointer(pointer)
            .ok_or_else(|| exn::Exn::from(ErrorKind::Fetch(format!("page body has nothing at `{pointer}`"))))?;
        let advance = match self {
            Self::ArrayLength(_) => value.as_array().map(|items| items.len() as u64),
            Self::Value(_) => value.as_u64(),
        };
        advance.ok_or_else(|| exn::Exn::from(ErrorKind::Fetch(format!("unexpected value at `{pointer}`: {value}"))))
    }
}

/// Offset pagination: `param` carries the offset, `advance` reads the next
/// step from each page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub param: String,
    pub advance: Advance,
}

/// Extra request parameters for remote sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSpec {
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

/// A fully-resolved dataset configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDescriptor {
    pub name: String,
    pub source: Origin,
    pub format: Format,
    pub incremental: bool,
    pub copy: bool,
    pub pagination: Option<Pagination>,
    pub request: RequestSpec,
}

impl DatasetDescriptor {
    /// Validate a dataset configuration block.
    ///
    /// # Errors
    ///
    /// [`Config`](ErrorKind::Config) if the name is not usable as a namespace,
    /// if not exactly one source and one format are set, or if pagination is
    /// requested for a local file or a CSV source.
    pub fn new(name: impl Into<String>, config: &DatasetConfig) -> Result<Self> {
        let name = name.into();
        if !is_single_component(&name) || ROOT_MARKERS.contains(&name.as_str()) {
            exn::bail!(ErrorKind::Config(format!("`{name}` is not a valid dataset name")));
        }
        let config_error = |message: &str| exn::Exn::from(ErrorKind::Config(format!("dataset `{name}`: {message}")));

        let remote = config.csv_url.is_some() || config.json_url.is_some();
        let local = config.csv_local.is_some() || config.json_local.is_some();
        match (remote, local) {
            (true, true) => return Err(config_error("both a remote URL and a local path are set")),
            (false, false) => return Err(config_error("no source configured")),
            _ => {},
        }
        let csv = config.csv_url.is_some() || config.csv_local.is_some();
        let json = config.json_url.is_some() || config.json_local.is_some();
        if csv && json {
            return Err(config_error("both csv and json are set"));
        }
        let format = if csv { Format::Csv } else { Format::Json };

        let url = config.csv_url.as_deref().or(config.json_url.as_deref());
        let path = config.csv_local.as_ref().or(config.json_local.as_ref());
        let source = match (url, path) {
            (Some(url), _) => {
                if url.trim().is_empty() {
                    return Err(config_error("empty URL"));
                }
                let url = Url::parse(url).map_err(|e| config_error(&format!("invalid URL `{url}`: {e}")))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(config_error(&format!("unsupported URL scheme `{}`", url.scheme())));
                }
                Origin::Remote { url }
            },
            (None, Some(path)) => {
                if path.as_os_str().is_empty() {
                    return Err(config_error("empty local path"));
                }
                Origin::Local { path: path.clone() }
            },
            (None, None) => return Err(config_error("no source configured")),
        };

        let pagination = match &config.paginate {
            None => None,
            Some(_) if !source.is_remote() => return Err(config_error("pagination requires a remote source")),
            // Page advances are read from the body with a JSON pointer.
            Some(_) if format != Format::Json => return Err(config_error("pagination requires a json source")),
            Some(PaginateConfig::Offset(offset)) => {
                if offset.param.is_empty() {
                    return Err(config_error("pagination parameter is empty"));
                }
                let advance = match &offset.advance {
                    AdvanceConfig::ArrayLength(pointer) => Advance::ArrayLength(pointer.clone()),
                    AdvanceConfig::Value(pointer) => Advance::Value(pointer.clone()),
                };
                if !advance.pointer().is_empty() && !advance.pointer().starts_with('/') {
                    return Err(config_error(&format!("`{}` is not a JSON pointer", advance.pointer())));
                }
                Some(Pagination { param: offset.param.clone(), advance })
            },
        };

        let request = RequestSpec {
            params: config.request.params.iter().map(|(k, v)| (k.clone(), v.to_string())).collect(),
            headers: config.request.headers.iter().map(|(k, v)| (k.clone(), v.to_string())).collect(),
            timeout: config.request.timeout_secs.map(Duration::from_secs),
        };

        Ok(Self {
            name,
            source,
            format,
            incremental: config.incremental,
            copy: config.copy,
            pagination,
            request,
        })
    }

    pub fn is_paginated(&self) -> bool {
        self.pagination.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tabstore_config::{OffsetConfig, RequestConfig, Scalar};

    fn remote_csv() -> DatasetConfig {
        DatasetConfig {
            csv_url: Some("https://example.org/data.csv".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_remote_csv() {
        let descriptor = DatasetDescriptor::new("my_dataset", &remote_csv()).unwrap();
        assert_eq!(descriptor.format, Format::Csv);
        assert!(descriptor.source.is_remote());
        assert!(!descriptor.is_paginated());
    }

    #[test]
    fn test_local_json() {
        let config = DatasetConfig {
            json_local: Some(PathBuf::from("testdata.json")),
            copy: true,
            ..Default::default()
        };
        let descriptor = DatasetDescriptor::new("local", &config).unwrap();
        assert_eq!(descriptor.format, Format::Json);
        assert_eq!(descriptor.source, Origin::Local { path: PathBuf::from("testdata.json") });
        assert!(descriptor.copy);
    }

    #[test]
    fn test_request_spec() {
        let config = DatasetConfig {
            request: RequestConfig {
                params: [("limit".to_string(), Scalar::Int(10))].into(),
                headers: [("Accept".to_string(), Scalar::String("text/csv".to_string()))].into(),
                timeout_secs: Some(5),
            },
            ..remote_csv()
        };
        let descriptor = DatasetDescriptor::new("ds", &config).unwrap();
        assert_eq!(descriptor.request.params, [("limit".to_string(), "10".to_string())]);
        assert_eq!(descriptor.request.headers, [("Accept".to_string(), "text/csv".to_string())]);
        assert_eq!(descriptor.request.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_remote_and_local_is_config_error() {
        let config = DatasetConfig {
            csv_local: Some(PathBuf::from("testdata.csv")),
            ..remote_csv()
        };
        let err = DatasetDescriptor::new("ds", &config).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[test]
    fn test_no_source_is_config_error() {
        let err = DatasetDescriptor::new("ds", &DatasetConfig::default()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[rstest]
    #[case::both_formats(DatasetConfig { csv_url: Some("https://a.org/x".into()), json_url: Some("https://a.org/y".into()), ..Default::default() })]
    #[case::both_local_formats(DatasetConfig { csv_local: Some("a.csv".into()), json_local: Some("a.json".into()), ..Default::default() })]
    #[case::empty_url(DatasetConfig { csv_url: Some(" ".into()), ..Default::default() })]
    #[case::bad_url(DatasetConfig { csv_url: Some("not a url".into()), ..Default::default() })]
    #[case::ftp_url(DatasetConfig { csv_url: Some("ftp://a.org/x.csv".into()), ..Default::default() })]
    #[case::empty_path(DatasetConfig { csv_local: Some("".into()), ..Default::default() })]
    #[case::paginated_local(DatasetConfig {
        json_local: Some("a.json".into()),
        paginate: Some(PaginateConfig::Offset(OffsetConfig { param: "offset".into(), advance: AdvanceConfig::Value("/n".into()) })),
        ..Default::default()
    })]
    #[case::paginated_csv(DatasetConfig {
        csv_url: Some("https://a.org/api.csv".into()),
        paginate: Some(PaginateConfig::Offset(OffsetConfig { param: "offset".into(), advance: AdvanceConfig::Value("/count".into()) })),
        ..Default::default()
    })]
    #[case::bad_pointer(DatasetConfig {
        json_url: Some("https://a.org/api".into()),
        paginate: Some(PaginateConfig::Offset(OffsetConfig { param: "offset".into(), advance: AdvanceConfig::ArrayLength("features".into()) })),
        ..Default::default()
    })]
    fn test_invalid_configs(#[case] config: DatasetConfig) {
        let err = DatasetDescriptor::new("ds", &config).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case("..")]
    #[case("last_update")]
    #[case("last_complete_update")]
    fn test_invalid_names(#[case] name: &str) {
        let err = DatasetDescriptor::new(name, &remote_csv()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[rstest]
    #[case("newest", Version::Newest)]
    #[case("oldest", Version::Oldest)]
    fn test_version_from_str(#[case] input: &str, #[case] expected: Version) {
        assert_eq!(input.parse::<Version>().unwrap(), expected);
        assert_eq!(expected.to_string(), input);
    }

    #[test]
    fn test_unknown_version_is_config_error() {
        let err = "latest".parse::<Version>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[rstest]
    #[case(Advance::ArrayLength("/features".into()), br#"{"features": [1, 2, 3]}"#, 3)]
    #[case(Advance::ArrayLength("/features".into()), br#"{"features": []}"#, 0)]
    #[case(Advance::Value("/meta/count".into()), br#"{"meta": {"count": 25}}"#, 25)]
    #[case(Advance::ArrayLength("".into()), br#"[{}, {}]"#, 2)]
    fn test_advance_extract(#[case] advance: Advance, #[case] body: &[u8], #[case] expected: u64) {
        assert_eq!(advance.extract(body).unwrap(), expected);
    }

    #[rstest]
    #[case(Advance::ArrayLength("/features".into()), b"not json")]
    #[case(Advance::ArrayLength("/missing".into()), br#"{"features": []}"#)]
    #[case(Advance::Value("/count".into()), br#"{"count": -1}"#)]
    #[case(Advance::ArrayLength("/count".into()), br#"{"count": 3}"#)]
    fn test_advance_extract_errors(#[case] advance: Advance, #[case] body: &[u8]) {
        let err = advance.extract(body).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Fetch(_)));
    }
}
