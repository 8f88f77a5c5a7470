//! Storage connection handle.
//!
//! A [`Store`] owns one SQLite connection. Every [`Directory`](crate::Directory)
//! is built on a store the caller opened; the directory never creates tables
//! on its own, so a fresh database must be provisioned first:
//!
//! ```no_run
//! use blobdir::{Directory, DirectoryConfig, Store};
//!
//! let store = Store::open("index.db", &DirectoryConfig::default())?;
//! store.provision(false)?;
//! let dir = Directory::new(store)?;
//! # Ok::<(), blobdir::DirError>(())
//! ```

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::DirectoryConfig;
use crate::error::{DirError, DirResult};

/// Tables that must exist before a directory can use the store.
pub(crate) const REQUIRED_TABLES: [&str; 4] = ["file_meta", "blobs", "blob_chunks", "file_locks"];

const SCHEMA: &str = r#"
-- Metadata store: one row per logical file (tombstoned on delete)
CREATE TABLE IF NOT EXISTS file_meta (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    last_touched_at INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

-- Blob store: one row per blob, content split into chunks
CREATE TABLE IF NOT EXISTS blobs (
    name TEXT PRIMARY KEY,
    length INTEGER NOT NULL DEFAULT 0,
    chunk_size INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS blob_chunks (
    name TEXT NOT NULL,
    idx INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (name, idx)
) WITHOUT ROWID;

-- Lock collection: at most one row per lock name
CREATE TABLE IF NOT EXISTS file_locks (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    owner TEXT NOT NULL,
    release_at INTEGER NOT NULL
);
"#;

const DROP_SCHEMA: &str = r#"
DROP TABLE IF EXISTS file_locks;
DROP TABLE IF EXISTS blob_chunks;
DROP TABLE IF EXISTS blobs;
DROP TABLE IF EXISTS file_meta;
"#;

/// Handle to the underlying database.
///
/// Thread-safe via an internal mutex around the connection. Separate
/// processes (or separate `Store`s in one process) coordinate through
/// SQLite's own file locking.
pub struct Store {
    conn: Mutex<Connection>,
    config: DirectoryConfig,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("conn", &"<locked>")
            .finish()
    }
}

impl Store {
    /// Open (or create) a database file. Does not create any tables.
    pub fn open<P: AsRef<Path>>(path: P, config: &DirectoryConfig) -> DirResult<Self> {
        config.validate()?;
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        // journal_mode answers with the resulting mode, so it needs a row callback
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(config.busy_timeout())?;
        tracing::debug!(path = %path.display(), "opened store");
        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database (for testing).
    pub fn in_memory(config: &DirectoryConfig) -> DirResult<Self> {
        config.validate()?;
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            path: None,
        })
    }

    /// Create the required tables, optionally dropping existing ones first.
    ///
    /// Safe to call on an already provisioned store when `drop_existing`
    /// is false.
    pub fn provision(&self, drop_existing: bool) -> DirResult<()> {
        let conn = self.conn.lock();
        if drop_existing {
            conn.execute_batch(DROP_SCHEMA)?;
        }
        conn.execute_batch(SCHEMA)?;
        tracing::info!(drop_existing, path = ?self.path, "provisioned store");
        Ok(())
    }

    /// Fail with [`DirError::NotProvisioned`] naming the first missing table.
    pub fn check_provisioned(&self) -> DirResult<()> {
        let conn = self.conn.lock();
        for table in REQUIRED_TABLES {
            let found = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |_| Ok(()),
                )
                .optional()?;
            if found.is_none() {
                return Err(DirError::NotProvisioned(table.to_string()));
            }
        }
        Ok(())
    }

    /// Config this store was opened with.
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Database file, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> DirResult<T>) -> DirResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on success.
    ///
    /// IMMEDIATE takes SQLite's write lock up front, so a read-then-write
    /// sequence inside `f` cannot interleave with another writer, even one
    /// in a different process.
    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&Connection) -> DirResult<T>) -> DirResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&*tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Current wall-clock time as unix milliseconds.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Convert stored unix milliseconds back to a `SystemTime`.
pub(crate) fn from_unix_millis(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_store_is_not_provisioned() {
        let store = Store::in_memory(&DirectoryConfig::default()).unwrap();
        let err = store.check_provisioned().unwrap_err();
        assert!(matches!(err, DirError::NotProvisioned(ref t) if t == "file_meta"));
    }

    #[test]
    fn test_provision_is_idempotent() {
        let store = Store::in_memory(&DirectoryConfig::default()).unwrap();
        store.provision(false).unwrap();
        store.provision(false).unwrap();
        store.check_provisioned().unwrap();
    }

    #[test]
    fn test_partial_schema_names_missing_table() {
        let store = Store::in_memory(&DirectoryConfig::default()).unwrap();
        store.provision(false).unwrap();
        store
            .with_conn(|conn| {
                conn.execute_batch("DROP TABLE file_locks;")?;
                Ok(())
            })
            .unwrap();

        let err = store.check_provisioned().unwrap_err();
        assert!(matches!(err, DirError::NotProvisioned(ref t) if t == "file_locks"));
    }

    #[test]
    fn test_drop_existing_clears_rows() {
        let store = Store::in_memory(&DirectoryConfig::default()).unwrap();
        store.provision(false).unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO file_meta (name, last_touched_at) VALUES ('seg0', 1)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        store.provision(true).unwrap();
        let count: i64 = store
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM file_meta", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DirectoryConfig::default().with_chunk_size(0);
        assert!(matches!(Store::in_memory(&config), Err(DirError::Config(_))));
    }

    #[test]
    fn test_millis_round_trip() {
        let now = unix_millis();
        let t = from_unix_millis(now);
        assert_eq!(t.duration_since(UNIX_EPOCH).unwrap().as_millis() as i64, now);
    }
}
