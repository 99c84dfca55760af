//! Per-request fetch strategies

use super::{
    Asset, AssetFetcher, AssetResponse, CacheManifest, CacheStorage, ResponseSource, RUNTIME_CACHE,
};
use crate::error::Result;

/// Body of the synthetic response served when nothing else is available
pub const OFFLINE_NOTICE: &str = "You're offline. Data will sync when online.";

const STATIC_EXTENSIONS: [&str; 12] = [
    "js", "css", "html", "png", "jpg", "jpeg", "svg", "webp", "ico", "woff", "woff2", "webmanifest",
];

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Cache, then network; fills the runtime cache on a miss
    CacheFirst,
    /// Network, then cache; refreshes the runtime cache on success
    NetworkFirst,
}

impl FetchStrategy {
    /// Pick the strategy for a request.
    ///
    /// Data requests (`/api/` or JSON) go to the network first. Manifest
    /// members and static files are cache-first. Anything else is treated
    /// as data.
    pub fn for_request(url: &str, manifest: Option<&CacheManifest>) -> Self {
        let path = request_path(url);
        if path.contains("/api/") || path.ends_with(".json") {
            return Self::NetworkFirst;
        }
        if manifest.is_some_and(|manifest| manifest.contains(url) || manifest.contains(path)) {
            return Self::CacheFirst;
        }
        let is_static = path.rsplit_once('.').is_some_and(|(_, ext)| {
            STATIC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        });
        if is_static {
            Self::CacheFirst
        } else {
            Self::NetworkFirst
        }
    }
}

/// Path of a request without origin, query or fragment
fn request_path(url: &str) -> &str {
    let rest = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest.find('/').map_or("/", |idx| &rest[idx..]));
    let end = rest.find(|c: char| c == '?' || c == '#').unwrap_or(rest.len());
    &rest[..end]
}

/// Synthetic 503 served when neither cache nor network can answer.
pub fn offline_notice() -> AssetResponse {
    AssetResponse {
        asset: Asset {
            status: 503,
            content_type: Some("text/plain; charset=utf-8".to_string()),
            body: OFFLINE_NOTICE.as_bytes().to_vec(),
        },
        source: ResponseSource::OfflineNotice,
    }
}

/// Answer one request with the given strategy.
pub(crate) async fn respond<F: AssetFetcher>(
    storage: &CacheStorage,
    fetcher: &F,
    strategy: FetchStrategy,
    precache: Option<&str>,
    url: &str,
) -> Result<AssetResponse> {
    match strategy {
        FetchStrategy::CacheFirst => {
            if let Some(asset) = lookup_cached(storage, precache, url)? {
                return Ok(cached(asset));
            }
            match fetcher.fetch(url).await {
                Ok(asset) => {
                    if asset.is_success() {
                        storage.put(RUNTIME_CACHE, url, &asset)?;
                    }
                    Ok(fetched(asset))
                }
                Err(error) => {
                    tracing::debug!("Cache miss while offline for {url}: {error}");
                    Ok(offline_notice())
                }
            }
        }
        FetchStrategy::NetworkFirst => match fetcher.fetch(url).await {
            Ok(asset) => {
                if asset.is_success() {
                    storage.put(RUNTIME_CACHE, url, &asset)?;
                }
                Ok(fetched(asset))
            }
            Err(error) => {
                tracing::debug!("Network unavailable for {url}, trying cache: {error}");
                Ok(lookup_cached(storage, precache, url)?.map_or_else(offline_notice, cached))
            }
        },
    }
}

/// Precache entries are keyed by manifest path, so a query string or an
/// absolute URL still finds them. Runtime entries are keyed by the full URL.
fn lookup_cached(
    storage: &CacheStorage,
    precache: Option<&str>,
    url: &str,
) -> Result<Option<Asset>> {
    if let Some(precache) = precache {
        if let Some(asset) = storage.lookup(precache, url)? {
            return Ok(Some(asset));
        }
        let path = request_path(url);
        if path != url {
            if let Some(asset) = storage.lookup(precache, path)? {
                return Ok(Some(asset));
            }
        }
    }
    storage.lookup(RUNTIME_CACHE, url)
}

const fn cached(asset: Asset) -> AssetResponse {
    AssetResponse {
        asset,
        source: ResponseSource::Cache,
    }
}

const fn fetched(asset: Asset) -> AssetResponse {
    AssetResponse {
        asset,
        source: ResponseSource::Network,
    }
}
