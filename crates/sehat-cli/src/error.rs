use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] sehat_core::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Food description cannot be empty")]
    EmptyFood,
    #[error("Offline asset cache is not configured (set asset_origin or SEHAT_ASSET_ORIGIN)")]
    CacheDisabled,
    #[error("Precaching {0} failed; the previous version keeps serving")]
    InstallFailed(String),
    #[error("Timed out waiting for the cache install to finish")]
    InstallTimeout,
    #[error("Failed to resolve the {0} directory")]
    NoHomeDirectory(&'static str),
}
