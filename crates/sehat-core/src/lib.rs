//! sehat-core - Offline-first persistence and sync for SehatLink
//!
//! Every user action is written to on-device storage first, queued, and
//! delivered to the sync service once connectivity returns. A background
//! cache worker keeps pages and static assets available offline.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod network;
pub mod queue;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{ActionId, ActionKind, ActionStatus, QueuedAction};
pub use services::OfflineSupportService;
