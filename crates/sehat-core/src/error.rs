//! Error types for sehat-core

use thiserror::Error;

use crate::models::ActionId;

/// Result type alias using sehat-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sehat-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local write or read failed (storage full, locked or missing).
    /// Always surfaced to the user: the action was not recorded.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A single delivery attempt failed; retried with backoff.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// Retry ceiling exceeded; the action needs a manual retry.
    #[error("Delivery abandoned for action {id} after {attempts} attempts")]
    DeliveryAbandoned {
        /// Abandoned action
        id: ActionId,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Fetching an asset from the network failed.
    #[error("Asset fetch failed: {0}")]
    Fetch(String),

    /// Background caching is not available on this platform (degraded mode).
    #[error("Background worker unsupported: {0}")]
    WorkerUnsupported(String),

    /// Another action is already being delivered.
    #[error("Action {in_flight} is already in flight")]
    QueueBusy {
        /// The action currently in flight
        in_flight: ActionId,
    },

    /// Status change not allowed from the action's current status.
    #[error("Action {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Action being updated
        id: ActionId,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Database was written by a newer build.
    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew {
        /// Version found on disk
        found: i32,
        /// Highest version this build understands
        supported: i32,
    },

    /// A stored row could not be decoded.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The reconciliation engine or cache worker task has stopped.
    #[error("Background task stopped: {0}")]
    TaskStopped(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}

impl Error {
    /// Whether this error risks losing user data and must be shown to the user.
    pub const fn is_data_loss_risk(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::DeliveryAbandoned { .. }
        )
    }
}
