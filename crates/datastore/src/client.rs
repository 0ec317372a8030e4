//! Remote source clients.
//!
//! [`SourceClient`] is the seam between the store and the network. The store
//! only ever sees a fully-buffered [`Payload`]; judging the status code and
//! body is left to the store so every client behaves the same way.

use crate::descriptor::RequestSpec;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;

pub type ClientHandle = Arc<dyn SourceClient + Send + Sync>;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// One GET request against a remote source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}
impl Request {
    pub fn new(url: Url, spec: &RequestSpec) -> Self {
        Self {
            url,
            query: spec.params.clone(),
            headers: spec.headers.clone(),
            timeout: spec.timeout,
        }
    }

    /// Set a query parameter, replacing any configured value of the same name.
    pub fn with_query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.retain(|(k, _)| k != name);
        self.query.push((name.to_string(), value.to_string()));
        self
    }
}

/// A fully-buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub status: u16,
    pub body: Vec<u8>,
}
impl Payload {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Perform the request and buffer the whole body.
    ///
    /// Transport failures and timeouts are [`Fetch`](ErrorKind::Fetch)
    /// errors. Non-2xx responses are *not* errors at this level.
    async fn get(&self, request: &Request) -> Result<Payload>;
}

/// [`SourceClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}
impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .or_raise(|| ErrorKind::Fetch("could not build HTTP client".to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceClient for HttpClient {
    async fn get(&self, request: &Request) -> Result<Payload> {
        let mut builder = self.client.get(request.url.clone()).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        let url = &request.url;
        let response = builder.send().await.or_raise(|| ErrorKind::Fetch(format!("request to {url} failed")))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .or_raise(|| ErrorKind::Fetch(format!("reading response from {url} failed")))?;
        tracing::debug!(%url, status, bytes = body.len(), "received response");
        Ok(Payload { status, body: body.to_vec() })
    }
}
