//! SQLite-backed store.
//!
//! One table, keyed by `(namespace, key)`, so several SDK instances can share
//! a database file without seeing each other's queues.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::KeyValueStore;
use crate::errors::Result;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS kv_items (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
)";

/// Durable [`KeyValueStore`] on a single SQLite file.
///
/// The connection sits behind a `parking_lot::Mutex`; every operation is a
/// single statement so no transaction spans calls.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    namespace: String,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the database at `path`, scoped to `namespace`.
    pub fn open(path: &Path, namespace: impl Into<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(CREATE_TABLE)?;

        let namespace = namespace.into();
        info!(path = %path.display(), namespace = %namespace, "key-value store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            namespace,
            path: path.to_owned(),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(namespace: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLE)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            namespace: namespace.into(),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Same database, different namespace.
    #[must_use]
    pub fn scoped(&self, namespace: impl Into<String>) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            namespace: namespace.into(),
            path: self.path.clone(),
        }
    }

    /// Database file path (`:memory:` for in-memory stores).
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for SqliteStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM kv_items WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO kv_items (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![self.namespace, key, value, now],
        )?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "DELETE FROM kv_items WHERE namespace = ?1 AND key = ?2",
            params![self.namespace, key],
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("namespace", &self.namespace)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
