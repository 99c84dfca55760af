//! Offline asset cache served by a background worker task

mod fetcher;
mod storage;
mod strategy;
mod worker;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use fetcher::{AssetFetcher, HttpAssetFetcher};
pub use storage::{CacheStorage, VersionState};
pub use strategy::{offline_notice, FetchStrategy, OFFLINE_NOTICE};
pub use worker::{CacheSession, CacheStatus, CacheWorker, CacheWorkerHandle, InstallOutcome};

/// Name of the shared runtime cache filled on fetch
pub const RUNTIME_CACHE: &str = "runtime";

/// Host fragments of preview deployments, where registration is skipped
const PREVIEW_HOST_MARKERS: [&str; 2] = ["vusercontent.net", "preview"];

/// Precache name for an application version
pub fn precache_name(version: &str) -> String {
    format!("precache-{version}")
}

/// Assets to precache for one application version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Application version the assets belong to
    pub version: String,
    /// Asset paths, fetched relative to the asset origin
    pub assets: Vec<String>,
}

impl CacheManifest {
    /// Create a manifest
    pub fn new(
        version: impl Into<String>,
        assets: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            version: version.into(),
            assets: assets.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `url` is one of the precached assets
    pub fn contains(&self, url: &str) -> bool {
        self.assets.iter().any(|asset| asset == url)
    }
}

/// A stored or fetched response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// HTTP status code
    pub status: u16,
    /// `Content-Type` header, if any
    pub content_type: Option<String>,
    /// Response body
    pub body: Vec<u8>,
}

impl Asset {
    /// A 200 response
    pub fn ok(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.into()),
            body: body.into(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    /// Served from the precache or runtime cache
    Cache,
    /// Fetched from the network
    Network,
    /// Neither was available
    OfflineNotice,
}

/// Response returned by a cache session fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    /// The response itself
    pub asset: Asset,
    /// Where it came from
    pub source: ResponseSource,
}

/// Capabilities of the platform the worker is registered on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPlatform {
    /// Whether background workers can run at all
    pub supports_background_workers: bool,
    /// Host the application is served from
    pub host: String,
}

impl WorkerPlatform {
    /// A platform that supports background workers
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            supports_background_workers: true,
            host: host.into(),
        }
    }

    /// A platform without background worker support
    pub fn unsupported(host: impl Into<String>) -> Self {
        Self {
            supports_background_workers: false,
            host: host.into(),
        }
    }

    /// Whether the host is a preview deployment
    pub fn is_preview_host(&self) -> bool {
        let host = self.host.to_ascii_lowercase();
        PREVIEW_HOST_MARKERS
            .iter()
            .any(|marker| host.contains(marker))
    }

    /// Check that a worker may be registered here
    pub fn ensure_supported(&self) -> Result<()> {
        if !self.supports_background_workers {
            return Err(Error::WorkerUnsupported(
                "background workers are not available".into(),
            ));
        }
        if self.is_preview_host() {
            return Err(Error::WorkerUnsupported(format!(
                "preview host {}",
                self.host
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_hosts_are_unsupported() {
        for host in ["abc.vusercontent.net", "preview.sehatlink.in", "PREVIEW-42.example"] {
            let error = WorkerPlatform::new(host).ensure_supported().unwrap_err();
            assert!(matches!(error, Error::WorkerUnsupported(_)), "{host}");
        }
    }

    #[test]
    fn test_platform_support() {
        assert!(WorkerPlatform::new("sehatlink.in").ensure_supported().is_ok());
        assert!(matches!(
            WorkerPlatform::unsupported("sehatlink.in").ensure_supported(),
            Err(Error::WorkerUnsupported(_))
        ));
    }

    #[test]
    fn test_manifest_membership() {
        let manifest = CacheManifest::new("1.0.0", ["/", "/emergency"]);
        assert!(manifest.contains("/emergency"));
        assert!(!manifest.contains("/nutrition"));
        assert_eq!(precache_name(&manifest.version), "precache-1.0.0");
    }
}
