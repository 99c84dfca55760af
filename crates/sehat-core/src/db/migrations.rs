//! Database migrations

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
///
/// A database written by a newer build is left untouched.
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version > CURRENT_VERSION {
        return Err(Error::SchemaTooNew {
            found: version,
            supported: CURRENT_VERSION,
        });
    }
    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn apply(conn: &mut Connection, version: i32, sql: &str) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Version 1: key/value records and the action queue
const MIGRATION_V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS kv_entries (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS queued_actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_queued_actions_status ON queued_actions(status, id);
";

/// Version 2: single in-flight guard and offline asset cache
const MIGRATION_V2: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_queued_actions_single_in_flight
        ON queued_actions(status) WHERE status = 'in_flight';
    CREATE TABLE IF NOT EXISTS cache_versions (
        version TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        manifest TEXT NOT NULL,
        installed_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS cache_entries (
        cache_name TEXT NOT NULL,
        url TEXT NOT NULL,
        status INTEGER NOT NULL,
        content_type TEXT,
        body BLOB NOT NULL,
        stored_at INTEGER NOT NULL,
        PRIMARY KEY (cache_name, url)
    );
";

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
        assert!(table_exists(&conn, "kv_entries"));
        assert!(table_exists(&conn, "queued_actions"));
        assert!(table_exists(&conn, "cache_entries"));
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap(); // Should not fail

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_upgrade_from_v1_keeps_queued_rows() {
        let mut conn = setup();
        apply(&mut conn, 1, MIGRATION_V1).unwrap();
        conn.execute(
            "INSERT INTO queued_actions (kind, payload, created_at) VALUES ('chw-share', '{}', 1)",
            [],
        )
        .unwrap();

        run(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM queued_actions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_refuses_newer_schema() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (99)", [])
            .unwrap();

        let error = run(&mut conn).unwrap_err();
        assert!(matches!(
            error,
            Error::SchemaTooNew {
                found: 99,
                supported: CURRENT_VERSION
            }
        ));
    }

    #[test]
    fn test_single_in_flight_index() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO queued_actions (kind, payload, created_at, status)
             VALUES ('chw-share', '{}', 1, 'in_flight')",
            [],
        )
        .unwrap();

        let second = conn.execute(
            "INSERT INTO queued_actions (kind, payload, created_at, status)
             VALUES ('chw-share', '{}', 2, 'in_flight')",
            [],
        );
        assert!(second.is_err());
    }
}
