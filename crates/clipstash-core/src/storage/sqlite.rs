//! SQLite-backed key-value store
//!
//! Keeps the whole storage area in one database file. Values are stored as
//! JSON text; the connection is shared behind a mutex and each call is a
//! single short statement.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::kv::{KvChange, KvStore, CHANGE_CHANNEL_CAPACITY};
use super::schema::{init_schema, needs_init};

/// Single-file SQLite key-value store
pub struct SqliteKv {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<KvChange>,
}

impl SqliteKv {
    /// Open the database at `path`, creating it and its schema if needed
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        if needs_init(&conn) {
            debug!("Initializing key-value schema");
            init_schema(&conn)?;
        }

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    fn notify(&self, key: &str) {
        let _ = self.changes.send(KvChange {
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let text: Option<String> = {
            let conn = self.conn.lock()?;
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?
        };

        match text {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| StorageError::invalid_value(key, e)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let text = serde_json::to_string(&value).map_err(|e| StorageError::invalid_value(key, e))?;
        {
            let conn = self.conn.lock()?;
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, text],
            )?;
        }
        self.notify(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let removed = {
            let conn = self.conn.lock()?;
            conn.execute("DELETE FROM kv WHERE key = ?1", [key])?
        };
        if removed > 0 {
            self.notify(key);
        }
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }
}
