//! Runtime settings for the sync engine and cache worker.
//!
//! Settings come from a JSON file with every field optional, then
//! environment overrides. `validate` normalizes text fields and rejects
//! values the engine cannot run with.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheManifest;
use crate::error::{Error, Result};
use crate::sync::RetryPolicy;
use crate::util::{base_url, normalize_text_option};

/// Environment variable overriding `sync_endpoint_url`
pub const SYNC_URL_ENV: &str = "SEHAT_SYNC_URL";
/// Environment variable overriding `asset_origin`
pub const ASSET_ORIGIN_ENV: &str = "SEHAT_ASSET_ORIGIN";

const DEFAULT_PRECACHE: [&str; 4] = ["/", "/emergency", "/health-tips", "/nutrition"];

/// Sync and caching settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Base URL of the sync service; unset keeps everything local
    pub sync_endpoint_url: Option<String>,
    pub retry_ceiling: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub delivery_timeout_ms: u64,
    /// Version the precache is keyed by
    pub app_version: String,
    /// Origin assets are fetched from; unset disables the cache worker
    pub asset_origin: Option<String>,
    /// Paths precached at install
    pub precache: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            sync_endpoint_url: None,
            retry_ceiling: policy.retry_ceiling,
            backoff_base_ms: duration_millis(policy.base_delay),
            backoff_cap_ms: duration_millis(policy.max_delay),
            delivery_timeout_ms: 15_000,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            asset_origin: None,
            precache: DEFAULT_PRECACHE.map(ToString::to_string).to_vec(),
        }
    }
}

impl SyncSettings {
    /// Parse settings from JSON; missing fields take defaults.
    pub fn parse(payload: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid settings JSON: {error}")))?;
        settings.validate()
    }

    /// Load settings from a file. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(payload) => Self::parse(&payload),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(error.into()),
        }
    }

    /// Apply `SEHAT_SYNC_URL` and `SEHAT_ASSET_ORIGIN` from the process
    /// environment.
    #[must_use]
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary environment lookup
    #[must_use]
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = normalize_text_option(lookup(SYNC_URL_ENV)) {
            self.sync_endpoint_url = Some(url);
        }
        if let Some(origin) = normalize_text_option(lookup(ASSET_ORIGIN_ENV)) {
            self.asset_origin = Some(origin);
        }
        self
    }

    /// Normalize text fields and check ranges.
    pub fn validate(mut self) -> Result<Self> {
        self.sync_endpoint_url = normalize_url(self.sync_endpoint_url.take(), "sync_endpoint_url")?;
        self.asset_origin = normalize_url(self.asset_origin.take(), "asset_origin")?;
        self.app_version = normalize_text_option(Some(self.app_version))
            .ok_or_else(|| Error::Config("app_version must not be empty".to_string()))?;

        if self.backoff_base_ms == 0 {
            return Err(Error::Config("backoff_base_ms must be positive".to_string()));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(Error::Config(
                "backoff_cap_ms must not be below backoff_base_ms".to_string(),
            ));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(Error::Config("delivery_timeout_ms must be positive".to_string()));
        }

        let mut precache = Vec::with_capacity(self.precache.len());
        for path in self.precache {
            let path = normalize_text_option(Some(path))
                .ok_or_else(|| Error::Config("precache entries must not be empty".to_string()))?;
            if !precache.contains(&path) {
                precache.push(path);
            }
        }
        self.precache = precache;
        Ok(self)
    }

    /// Retry policy for the reconciliation engine
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_ceiling: self.retry_ceiling,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_cap_ms),
        }
    }

    /// Per-attempt delivery timeout
    pub const fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Precache manifest for the configured version
    pub fn manifest(&self) -> CacheManifest {
        CacheManifest::new(self.app_version.clone(), self.precache.iter().cloned())
    }
}

fn normalize_url(raw: Option<String>, field: &str) -> Result<Option<String>> {
    let Some(url) = normalize_text_option(raw) else {
        return Ok(None);
    };
    base_url(&url)
        .map(Some)
        .ok_or_else(|| Error::Config(format!("{field} must include http:// or https://")))
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
