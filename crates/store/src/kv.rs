//! Key/value backends.
//!
//! The durable scope is usually a [`SqliteKv`]; the volatile per-process scope is a [`MemoryKv`].

use crate::error::{Error, Result};
use crate::schema;
use murmur_core::logging::sanitize_path;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::instrument;

/// String-keyed storage with whole-value replacement
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Process-lifetime store
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        self.entries.lock().map_err(|_| Error::unavailable("memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.lock()?.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// SQLite-backed store surviving restarts
#[derive(Debug)]
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// Open or create the database file, creating parent directories as needed
    #[instrument(skip_all, fields(db_path = %sanitize_path(db_path)))]
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        schema::migrate(&conn)?;
        tracing::debug!("durable store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::unavailable("database lock poisoned"))
    }
}

impl KeyValueStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
        let keys = stmt.query_map(params![prefix], |row| row.get(0))?.collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("1".to_string()));

        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("2".to_string()));

        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_memory_kv() {
        exercise(&MemoryKv::new());
    }

    #[test]
    fn test_sqlite_kv_in_memory() {
        exercise(&SqliteKv::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_kv_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("murmur.db");

        {
            let store = SqliteKv::open(&db_path).unwrap();
            store.set("chat_messages_abc", "[]").unwrap();
        }

        let store = SqliteKv::open(&db_path).unwrap();
        assert_eq!(store.get("chat_messages_abc").unwrap(), Some("[]".to_string()));
    }

    #[test]
    fn test_keys_with_prefix() {
        for store in [
            Box::new(MemoryKv::new()) as Box<dyn KeyValueStore>,
            Box::new(SqliteKv::open_in_memory().unwrap()),
        ] {
            prefixed(store.as_ref());
        }
    }

    fn prefixed(store: &dyn KeyValueStore) {
        store.set("chat_messages_b", "[]").unwrap();
        store.set("chat_messages_a", "[]").unwrap();
        store.set("chat_session_id", "a").unwrap();
        store.set("chat_messages%", "[]").unwrap();

        assert_eq!(
            store.keys_with_prefix("chat_messages_").unwrap(),
            vec!["chat_messages_a".to_string(), "chat_messages_b".to_string()]
        );
    }
}
