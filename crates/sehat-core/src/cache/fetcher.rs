//! Network access for the cache worker

use std::future::Future;

use reqwest::header::CONTENT_TYPE;

use super::Asset;
use crate::error::{Error, Result};
use crate::util::{base_url, has_http_scheme};

/// Fetches assets from the network on behalf of the cache worker.
pub trait AssetFetcher: Send + Sync + 'static {
    /// Fetch `url`. Transport failures are errors; HTTP error statuses are
    /// returned as assets.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Asset>> + Send;
}

/// Fetches paths relative to an HTTP origin
#[derive(Clone)]
pub struct HttpAssetFetcher {
    origin: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpAssetFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAssetFetcher")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl HttpAssetFetcher {
    /// Create a fetcher for the given origin, e.g. `https://sehatlink.in`.
    pub fn new(origin: impl Into<String>) -> Result<Self> {
        let origin = base_url(&origin.into()).ok_or_else(|| {
            Error::Config("asset origin must include http:// or https://".to_string())
        })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            origin,
            client,
        })
    }

    /// Absolute URL for a request path
    pub fn resolve(&self, url: &str) -> String {
        if has_http_scheme(url) {
            url.to_string()
        } else {
            format!("{}/{}", self.origin, url.trim_start_matches('/'))
        }
    }
}

impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> Result<Asset> {
        let response = self
            .client
            .get(self.resolve(url))
            .send()
            .await
            .map_err(|error| Error::Fetch(format!("{url}: {error}")))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|error| Error::Fetch(format!("{url}: {error}")))?;

        Ok(Asset {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}
