//! Client for the upstream origin consulted on a cache miss.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;
use tracing::debug;

use crate::key::ResourceKey;

/// Origin used when none is configured.
pub const DEFAULT_ORIGIN: &str = "https://http.cat";

const USER_AGENT_VALUE: &str = concat!("catcache/", env!("CARGO_PKG_VERSION"));

/// Reasons a fetch from the origin produced no resource.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Source of truth for resources missing from the cache.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    async fn fetch(&self, key: &ResourceKey) -> Result<Bytes, UpstreamError>;
}

/// [`Upstream`] that issues `GET <origin>/<key>`.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    /// Builds a client for `base_url`. `timeout` bounds each whole request;
    /// `None` leaves reqwest's default (no timeout).
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, UpstreamError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let mut builder = reqwest::Client::builder().default_headers(default_headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(UpstreamError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, key: &ResourceKey) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, key: &ResourceKey) -> Result<Bytes, UpstreamError> {
        let url = self.url_for(key);
        debug!(url = %url, "fetching from upstream");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| UpstreamError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url,
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|source| UpstreamError::Body { url, source })
    }
}
