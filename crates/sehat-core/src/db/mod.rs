//! Durable storage layer for SehatLink

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use migrations::CURRENT_VERSION;
pub use store::{keys, PersistentStore, SqliteStore};
pub(crate) use store::upsert_entry;
