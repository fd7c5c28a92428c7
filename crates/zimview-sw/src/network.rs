//! Network access for requests outside the archive.

use async_trait::async_trait;
use bytes::Bytes;
use http::Response;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;
use zimview_common::ViewerError;

/// Errors that can occur while fetching from the network.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Offline")]
    Offline,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for ViewerError {
    fn from(err: NetError) -> Self {
        ViewerError::network_with_source("network fetch failed", err)
    }
}

/// Fetches a URL the way the page would without interception.
#[async_trait]
pub trait NetworkFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Response<Bytes>, NetError>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, NetError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NetworkFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Response<Bytes>, NetError> {
        trace!(%url, "Network fetch");
        let upstream = self.client.get(url.clone()).send().await?;
        let status = upstream.status();
        let headers = upstream.headers().clone();
        let body = upstream.bytes().await?;
        debug!(%url, %status, bytes = body.len(), "Network response");

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Fetcher for installations without any network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

#[async_trait]
impl NetworkFetcher for OfflineFetcher {
    async fn fetch(&self, url: &Url) -> Result<Response<Bytes>, NetError> {
        trace!(%url, "Offline, not fetching");
        Err(NetError::Offline)
    }
}
