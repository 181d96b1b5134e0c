//! SQLite schema for the durable key/value store

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info, trace};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Version tracking plus a single key/value table
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

INSERT OR IGNORE INTO schema_version (version) VALUES (1);
"#;

/// Version recorded in the database, 0 for a fresh file
pub fn current_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !table_exists {
        trace!("schema_version table does not exist, returning version 0");
        return Ok(0);
    }

    let version: Option<i32> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

/// Bring the schema up to [`SCHEMA_VERSION`]; idempotent
pub fn migrate(conn: &Connection) -> Result<()> {
    let current = current_version(conn)?;
    debug!(current, target = SCHEMA_VERSION, "checking schema version");

    if current > SCHEMA_VERSION {
        return Err(Error::unavailable(format!(
            "database schema v{} is newer than supported v{}",
            current, SCHEMA_VERSION
        )));
    }

    if current == SCHEMA_VERSION {
        return Ok(());
    }

    info!(from = current, to = SCHEMA_VERSION, "migrating schema");
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_is_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (99)", []).unwrap();
        assert!(matches!(migrate(&conn), Err(Error::Unavailable(_))));
    }
}
