//! Durable cache storage: versions and cached responses

use rusqlite::{params, OptionalExtension};

use super::{Asset, CacheManifest};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::util::unix_millis_now;

/// Lifecycle state of a stored cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    /// Precache complete, waiting for old sessions to close
    Waiting,
    /// Serving sessions
    Active,
}

impl VersionState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
        }
    }
}

/// Named caches and installed versions in the shared database.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    db: Database,
}

impl CacheStorage {
    /// Create storage over the given database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a response, replacing any previous one for the same url
    pub fn put(&self, cache_name: &str, url: &str, asset: &Asset) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO cache_entries (cache_name, url, status, content_type, body, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(cache_name, url) DO UPDATE SET
                    status = excluded.status,
                    content_type = excluded.content_type,
                    body = excluded.body,
                    stored_at = excluded.stored_at",
                params![
                    cache_name,
                    url,
                    asset.status,
                    asset.content_type,
                    asset.body,
                    unix_millis_now()
                ],
            )?;
            Ok(())
        })
    }

    /// Look up a stored response
    pub fn lookup(&self, cache_name: &str, url: &str) -> Result<Option<Asset>> {
        self.db.with_connection(|conn| {
            let asset = conn
                .query_row(
                    "SELECT status, content_type, body FROM cache_entries
                     WHERE cache_name = ?1 AND url = ?2",
                    params![cache_name, url],
                    |row| {
                        Ok(Asset {
                            status: row.get(0)?,
                            content_type: row.get(1)?,
                            body: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(asset)
        })
    }

    /// Drop every entry of a cache
    pub fn delete_cache(&self, cache_name: &str) -> Result<usize> {
        self.db.with_connection(|conn| {
            let removed =
                conn.execute("DELETE FROM cache_entries WHERE cache_name = ?1", [cache_name])?;
            Ok(removed)
        })
    }

    /// Number of entries in a cache
    pub fn entry_count(&self, cache_name: &str) -> Result<usize> {
        self.db.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?1",
                [cache_name],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }

    /// Record a version in the given state
    pub fn record_version(&self, manifest: &CacheManifest, state: VersionState) -> Result<()> {
        let encoded = serde_json::to_string(manifest)?;
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO cache_versions (version, state, manifest, installed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(version) DO UPDATE SET
                    state = excluded.state,
                    manifest = excluded.manifest,
                    installed_at = excluded.installed_at",
                params![manifest.version, state.as_str(), encoded, unix_millis_now()],
            )?;
            Ok(())
        })
    }

    /// Forget a version and its precache
    pub fn discard_version(&self, version: &str, precache: &str) -> Result<()> {
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM cache_entries WHERE cache_name = ?1", [precache])?;
            tx.execute("DELETE FROM cache_versions WHERE version = ?1", [version])?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Make `next` the active version and drop the previous one with its
    /// precache, atomically.
    pub fn activate(&self, next: &str, previous: Option<(&str, &str)>) -> Result<()> {
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE cache_versions SET state = 'active' WHERE version = ?1",
                [next],
            )?;
            if updated == 0 {
                return Err(Error::NotFound(format!("cache version {next}")));
            }
            if let Some((version, precache)) = previous {
                tx.execute("DELETE FROM cache_entries WHERE cache_name = ?1", [precache])?;
                tx.execute("DELETE FROM cache_versions WHERE version = ?1", [version])?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Most recently installed version in the given state
    pub fn version_in_state(&self, state: VersionState) -> Result<Option<CacheManifest>> {
        let encoded: Option<String> = self.db.with_connection(|conn| {
            let encoded = conn
                .query_row(
                    "SELECT manifest FROM cache_versions WHERE state = ?1
                     ORDER BY installed_at DESC LIMIT 1",
                    [state.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(encoded)
        })?;

        encoded
            .map(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|e| Error::CorruptRecord(format!("cache manifest: {e}")))
            })
            .transpose()
    }
}
