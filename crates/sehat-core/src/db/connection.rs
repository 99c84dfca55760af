//! Database connection management

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use super::migrations;
use crate::error::{Error, Result};

/// Shared handle to the on-device `SQLite` database.
///
/// Cloning is cheap; all clones share one connection. Every component that
/// needs durable state (store, queue, cache worker) goes through this handle,
/// so writes are visible to subsequent reads from any of them.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        let database = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        };
        database.configure()?;
        database.migrate()?;
        tracing::debug!("Opened database at {:?}", database.path);
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for durability on flaky devices
    fn configure(&self) -> Result<()> {
        self.with_connection(|conn| {
            // In-memory databases report "memory" and cannot switch to WAL
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })
            .ok();
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(Duration::from_secs(5))?;
            Ok(())
        })
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        self.with_connection(|conn| migrations::run(conn))
    }

    /// Run a closure with exclusive access to the connection.
    ///
    /// Keep closures short and never hold them across an `.await`.
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::StorageUnavailable("database lock poisoned".into()))?;
        f(&mut conn)
    }

    /// Path of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
