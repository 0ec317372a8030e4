//! S3-compatible storage backend.
//!
//! This module provides a storage backend implementation for S3-compatible
//! services including AWS S3, Backblaze B2, MinIO, and others.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file (`key_id`
//! and `key_secret`); the AWS credential chain is not consulted.

use crate::{
    ObjectInfo, StorageBackend,
    backend::ObjectInfoStream,
    error::{ErrorKind, Result},
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::{ByteStream, DateTime},
    types::{BucketLocationConstraint, CreateBucketConfiguration, ObjectCannedAcl},
};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabstore_config::S3Config;
use time::OffsetDateTime;
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// Location constraint used when a missing bucket has to be created and the
/// configuration does not name one.
const DEFAULT_LOCATION: &str = "eu-central-1";
/// AWS rejects an explicit location constraint for its default region.
const UNCONSTRAINED_REGION: &str = "us-east-1";

/// S3-compatible storage backend.
///
/// Stores objects in an S3 bucket, optionally under a key prefix. All paths
/// are relative to the configured prefix (if any). The bucket is checked on
/// first use and created if it does not exist.
///
/// # Examples
///
/// ```no_run
/// use tabstore_config::S3Config;
/// use tabstore_storage::backend::S3Backend;
///
/// # fn example(config: &S3Config) -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new("s3", config)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    region: String,
    endpoint: Option<String>,
    location: Option<String>,
    public_url: Option<String>,
    cache_control: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
    bucket_ready: Arc<OnceCell<()>>,
}

impl S3Backend {
    /// Create a new S3 storage backend from its configuration block.
    pub fn new(name: impl Into<String>, config: &S3Config) -> Result<Self> {
        let credentials = Credentials::new(&config.key_id, &config.key_secret, None, None, "tabstore-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = &config.endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        let client = Client::from_conf(config_builder.build());
        Self::from_client(name, client, config)
    }

    /// Create a backend around an already-configured client.
    pub fn from_client(name: impl Into<String>, client: Client, config: &S3Config) -> Result<Self> {
        let prefix = config
            .prefix
            .as_deref()
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        Ok(Self {
            name: name.into(),
            client,
            bucket: config.bucket.clone(),
            prefix,
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            location: config.location.clone(),
            public_url: config.public_url.clone(),
            cache_control: config.cache_control.clone(),
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
            bucket_ready: Arc::new(OnceCell::new()),
        })
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<String> {
        let validated = validate_path(path)?;
        let path_str = validated.to_str().ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}/{path_str}"),
            None => path_str.to_string(),
        })
    }

    /// Strip the configured prefix from an S3 key to get relative path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        let relative = match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix.as_str()).and_then(|s| s.strip_prefix('/')).unwrap_or(key),
            None => key,
        };
        validate_path(relative)
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn map_sdk_error<E, R>(err: SdkError<E, R>) -> ErrorKind
    where
        E: std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let message = DisplayErrorContext(&err).to_string();
        match err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => ErrorKind::Network(message),
            _ => ErrorKind::BackendError(message),
        }
    }

    /// Make sure the bucket exists, creating it on first use.
    async fn ensure_bucket(&self) -> Result<()> {
        self.bucket_ready
            .get_or_try_init(|| async {
                let _permit = self.acquire_permit().await?;
                let head = self.client.head_bucket().bucket(&self.bucket).send().await;
                match head {
                    Ok(_) => return Ok(()),
                    Err(err) if !err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                        exn::bail!(Self::map_sdk_error(err));
                    },
                    Err(_) => {},
                }
                let location = self.location.as_deref().unwrap_or(DEFAULT_LOCATION);
                tracing::info!(bucket = %self.bucket, location, "creating missing bucket");
                let mut request = self.client.create_bucket().bucket(&self.bucket);
                if location != UNCONSTRAINED_REGION {
                    request = request.create_bucket_configuration(
                        CreateBucketConfiguration::builder()
                            .location_constraint(BucketLocationConstraint::from(location))
                            .build(),
                    );
                }
                request.send().await.map_err(Self::map_sdk_error)?;
                Ok(())
            })
            .await
            .map(|_| ())
    }

    fn content_type(path: &Path) -> &'static str {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("csv") => "text/csv",
            Some("json") => "application/json",
            _ => "text/plain",
        }
    }

    fn public_url(&self, key: &str) -> String {
        match (&self.public_url, &self.endpoint) {
            (Some(base), _) => format!("{}/{key}", base.trim_end_matches('/')),
            (None, Some(endpoint)) => format!("{}/{}/{key}", endpoint.trim_end_matches('/'), self.bucket),
            (None, None) => format!("https://{}.s3.{}.amazonaws.com/{key}", self.bucket, self.region),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("s3://{}/{prefix}", self.bucket),
            None => format!("s3://{}", self.bucket),
        }
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> ObjectInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        let key_prefix = match &validated_prefix {
            Some(pfx) => match self.full_key(pfx) {
                Ok(key) => Some(key),
                Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
            },
            None => self.prefix.as_ref().map(|p| format!("{p}/")),
        };

        Box::pin(stream! {
            if let Err(e) = self.ensure_bucket().await {
                yield Err(e);
                return;
            }
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(key_prefix)
                .into_paginator()
                .send();
            loop {
                let permit = match self.acquire_permit().await {
                    Ok(permit) => permit,
                    Err(e) => { yield Err(e); return; },
                };
                let page = match pages.next().await {
                    Some(Ok(page)) => page,
                    Some(Err(err)) => { yield Err(exn::Exn::from(Self::map_sdk_error(err))); return; },
                    None => return,
                };
                drop(permit);
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    // Zero-byte "directory" placeholders.
                    if key.ends_with('/') {
                        continue;
                    }
                    let relative = match self.relative_path(key) {
                        Ok(relative) => relative,
                        Err(e) => { yield Err(e); continue; },
                    };
                    // S3 prefixes are plain string prefixes; match per component.
                    if validated_prefix.as_ref().is_some_and(|pfx| !relative.starts_with(pfx)) {
                        continue;
                    }
                    let modified = match object.last_modified().map(Self::parse_datetime).transpose() {
                        Ok(modified) => modified.unwrap_or(OffsetDateTime::UNIX_EPOCH),
                        Err(e) => { yield Err(e); continue; },
                    };
                    let size = object.size().unwrap_or_default().max(0) as u64;
                    yield Ok(ObjectInfo::new(relative, size, modified));
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let key = self.full_key(path)?;
        self.ensure_bucket().await?;
        let _permit = self.acquire_permit().await?;
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => exn::bail!(Self::map_sdk_error(err)),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.full_key(path)?;
        self.ensure_bucket().await?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(err) => exn::bail!(Self::map_sdk_error(err)),
        };
        let body = output
            .body
            .collect()
            .await
            .or_raise(|| ErrorKind::Network(format!("failed to read body of `{key}`")))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn store(&self, path: &Path, data: &[u8], publish: bool) -> Result<String> {
        let key = self.full_key(path)?;
        self.ensure_bucket().await?;
        let _permit = self.acquire_permit().await?;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(Self::content_type(path))
            .body(ByteStream::from(data.to_vec()));
        if publish {
            request = request.acl(ObjectCannedAcl::PublicRead).set_cache_control(self.cache_control.clone());
        }
        request.send().await.map_err(Self::map_sdk_error)?;
        tracing::debug!(bucket = %self.bucket, key = %key, publish, "stored object");
        Ok(match publish {
            true => self.public_url(&key),
            false => format!("s3://{}/{key}", self.bucket),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::{
        create_bucket::CreateBucketOutput,
        get_object::{GetObjectError, GetObjectOutput},
        head_bucket::{HeadBucketError, HeadBucketOutput},
        head_object::{HeadObjectError, HeadObjectOutput},
        list_objects_v2::ListObjectsV2Output,
        put_object::PutObjectOutput,
    };
    use aws_sdk_s3::types::{
        Object,
        error::{NoSuchKey, NotFound},
    };
    use aws_smithy_mocks::{Rule, RuleMode, mock, mock_client};

    fn config(prefix: Option<&str>) -> S3Config {
        S3Config {
            bucket: "bucket".to_string(),
            prefix: prefix.map(str::to_string),
            region: "eu-central-1".to_string(),
            endpoint: None,
            key_id: "id".to_string(),
            key_secret: "secret".to_string(),
            location: None,
            public_url: None,
            cache_control: Some("max-age=60".to_string()),
        }
    }

    fn bucket_exists() -> Rule {
        mock!(Client::head_bucket).then_output(|| HeadBucketOutput::builder().build())
    }

    fn backend(prefix: Option<&str>, rules: &[&Rule]) -> S3Backend {
        let client = mock_client!(aws_sdk_s3, RuleMode::MatchAny, rules);
        S3Backend::from_client("s3", client, &config(prefix)).unwrap()
    }

    #[test]
    fn test_full_key_and_relative_path() {
        let backend = backend(Some("/library/"), &[]);
        assert_eq!(backend.full_key(Path::new("ds/last_update")).unwrap(), "library/ds/last_update");
        assert_eq!(backend.relative_path("library/ds/last_update").unwrap(), Path::new("ds/last_update"));
        assert_eq!(backend.root(), "s3://bucket/library");

        let backend = self::backend(None, &[]);
        assert_eq!(backend.full_key(Path::new("ds/last_update")).unwrap(), "ds/last_update");
        assert!(backend.full_key(Path::new("../escape")).is_err());
    }

    #[test]
    fn test_public_url() {
        let mut backend = backend(None, &[]);
        assert_eq!(backend.public_url("ds/data.csv"), "https://bucket.s3.eu-central-1.amazonaws.com/ds/data.csv");
        backend.endpoint = Some("https://minio.local/".to_string());
        assert_eq!(backend.public_url("ds/data.csv"), "https://minio.local/bucket/ds/data.csv");
        backend.public_url = Some("https://cdn.example.org".to_string());
        assert_eq!(backend.public_url("ds/data.csv"), "https://cdn.example.org/ds/data.csv");
    }

    #[test]
    fn test_content_type() {
        assert_eq!(S3Backend::content_type(Path::new("a/data.csv")), "text/csv");
        assert_eq!(S3Backend::content_type(Path::new("a/data.json")), "application/json");
        assert_eq!(S3Backend::content_type(Path::new("a/last_update")), "text/plain");
    }

    #[tokio::test]
    async fn test_exists() {
        let found = mock!(Client::head_object)
            .match_requests(|req| req.key() == Some("ds/present"))
            .then_output(|| HeadObjectOutput::builder().build());
        let missing = mock!(Client::head_object)
            .match_requests(|req| req.key() == Some("ds/absent"))
            .then_error(|| HeadObjectError::NotFound(NotFound::builder().build()));
        let backend = backend(None, &[&bucket_exists(), &found, &missing]);
        assert!(backend.exists(Path::new("ds/present")).await.unwrap());
        assert!(!backend.exists(Path::new("ds/absent")).await.unwrap());
    }

    #[tokio::test]
    async fn test_read() {
        let get = mock!(Client::get_object)
            .match_requests(|req| req.key() == Some("library/ds/last_update"))
            .then_output(|| GetObjectOutput::builder().body(ByteStream::from_static(b"2024")).build());
        let backend = backend(Some("library"), &[&bucket_exists(), &get]);
        assert_eq!(backend.read(Path::new("ds/last_update")).await.unwrap(), b"2024");
    }

    #[tokio::test]
    async fn test_read_missing_key() {
        let get = mock!(Client::get_object).then_error(|| GetObjectError::NoSuchKey(NoSuchKey::builder().build()));
        let backend = backend(None, &[&bucket_exists(), &get]);
        let err = backend.read(Path::new("ds/missing.csv")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_store_returns_location() {
        let put = mock!(Client::put_object)
            .match_requests(|req| req.acl().is_none() && req.content_type() == Some("text/csv"))
            .then_output(|| PutObjectOutput::builder().build());
        let backend = backend(None, &[&bucket_exists(), &put]);
        let location = backend.store(Path::new("ds/data/data.csv"), b"a,b", false).await.unwrap();
        assert_eq!(location, "s3://bucket/ds/data/data.csv");
    }

    #[tokio::test]
    async fn test_store_publish() {
        let put = mock!(Client::put_object)
            .match_requests(|req| {
                req.acl() == Some(&ObjectCannedAcl::PublicRead) && req.cache_control() == Some("max-age=60")
            })
            .then_output(|| PutObjectOutput::builder().build());
        let backend = backend(None, &[&bucket_exists(), &put]);
        let location = backend.store(Path::new("ds/data.json"), b"{}", true).await.unwrap();
        assert_eq!(location, "https://bucket.s3.eu-central-1.amazonaws.com/ds/data.json");
    }

    #[tokio::test]
    async fn test_missing_bucket_is_created() {
        let head = mock!(Client::head_bucket).then_error(|| HeadBucketError::NotFound(NotFound::builder().build()));
        let create = mock!(Client::create_bucket)
            .match_requests(|req| {
                req.create_bucket_configuration()
                    .and_then(|c| c.location_constraint())
                    .is_some_and(|l| l.as_str() == DEFAULT_LOCATION)
            })
            .then_output(|| CreateBucketOutput::builder().build());
        let put = mock!(Client::put_object).then_output(|| PutObjectOutput::builder().build());
        let put_again = mock!(Client::put_object).then_output(|| PutObjectOutput::builder().build());
        let backend = backend(None, &[&head, &create, &put, &put_again]);
        backend.store(Path::new("ds/last_update"), b"x", false).await.unwrap();
        assert_eq!(create.num_calls(), 1);
        // Checked only once.
        backend.store(Path::new("ds/last_update"), b"y", false).await.unwrap();
        assert_eq!(head.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_list_matches_whole_components() {
        let list = mock!(Client::list_objects_v2)
            .match_requests(|req| req.prefix() == Some("library/ds/data"))
            .then_output(|| {
                ListObjectsV2Output::builder()
                    .contents(Object::builder().key("library/ds/data/a.csv").size(3).last_modified(DateTime::from_secs(0)).build())
                    .contents(Object::builder().key("library/ds/data2/b.csv").size(4).build())
                    .build()
            });
        let backend = backend(Some("library"), &[&bucket_exists(), &list]);
        let objects = backend.list(Some(Path::new("ds/data"))).await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].path, Path::new("ds/data/a.csv"));
        assert_eq!(objects[0].size, 3);
        assert_eq!(objects[0].modified, OffsetDateTime::UNIX_EPOCH);
    }
}
