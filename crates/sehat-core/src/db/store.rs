//! Key/value repository for data of record

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Database;
use crate::error::Result;
use crate::util::unix_millis_now;

/// Well-known keys in the persistent storage namespace.
pub mod keys {
    /// Ordered list of logged meals
    pub const NUTRITION_LOG: &str = "nutritionLog";
    /// Most recent nutrition summary shared with a CHW
    pub const PENDING_CHW_SHARE: &str = "pendingCHWShare";
    /// Installation id used to scope idempotency keys
    pub const DEVICE_ID: &str = "deviceId";
}

/// Trait for durable key/value storage operations
///
/// Calls are synchronous from the caller's perspective and durable once they
/// return. There are no multi-key transactions; callers that need ordering
/// across keys go through the sync queue instead.
pub trait PersistentStore {
    /// Store a raw value, replacing any previous one
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Load a raw value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove a value; removing an absent key is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// Store a value serialized as JSON
    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.put(key, &serde_json::to_string(value)?)
    }

    /// Load a JSON value
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)?
            .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }
}

/// `SQLite` implementation of `PersistentStore`
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Create a new store over the given database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }
}

impl PersistentStore for SqliteStore {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.db.with_connection(|conn| upsert_entry(conn, key, value))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.db.with_connection(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1",
                    [key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", [key])?;
            Ok(())
        })
    }
}

/// Upsert one entry on an open connection or transaction.
pub(crate) fn upsert_entry(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE
         SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, unix_millis_now()],
    )?;
    Ok(())
}
