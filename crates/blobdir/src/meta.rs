//! Metadata store: file records and lock records.
//!
//! Free functions over a `&Connection`, so callers can compose them inside
//! one transaction (see [`Store::with_tx`](crate::Store)).

use rusqlite::{Connection, OptionalExtension, params};
use std::time::SystemTime;

use crate::error::DirResult;
use crate::store::from_unix_millis;

/// One logical file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    /// Unix milliseconds of the last write-close or touch.
    pub last_touched_at: i64,
    pub is_deleted: bool,
}

impl FileRecord {
    pub fn last_touched(&self) -> SystemTime {
        from_unix_millis(self.last_touched_at)
    }
}

/// One held (or stale) lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub id: i64,
    pub name: String,
    /// Token of the holder that wrote this record.
    pub owner: String,
    /// Unix milliseconds after which the lease may be reclaimed.
    pub release_at: i64,
}

impl LockRecord {
    /// A lease that reached `release_at` is equivalent to no lease.
    pub fn is_expired(&self, now: i64) -> bool {
        self.release_at <= now
    }
}

// ============================================================================
// File records
// ============================================================================

/// Get the record for `name`, tombstones included.
pub(crate) fn get_file(conn: &Connection, name: &str) -> DirResult<Option<FileRecord>> {
    let record = conn
        .query_row(
            "SELECT id, name, last_touched_at, is_deleted FROM file_meta WHERE name = ?1",
            params![name],
            |row| {
                Ok(FileRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    last_touched_at: row.get(2)?,
                    is_deleted: row.get::<_, i32>(3)? != 0,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Get the record for `name` only if it is live.
pub(crate) fn get_live_file(conn: &Connection, name: &str) -> DirResult<Option<FileRecord>> {
    Ok(get_file(conn, name)?.filter(|r| !r.is_deleted))
}

/// Names of live files in insertion order.
pub(crate) fn list_live(conn: &Connection) -> DirResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM file_meta WHERE is_deleted = 0 ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}

/// Create the record, or revive a tombstone, stamping it with `now`.
pub(crate) fn upsert_live(conn: &Connection, name: &str, now: i64) -> DirResult<()> {
    conn.execute(
        "INSERT INTO file_meta (name, last_touched_at, is_deleted) VALUES (?1, ?2, 0)
         ON CONFLICT(name) DO UPDATE SET last_touched_at = excluded.last_touched_at, is_deleted = 0",
        params![name, now],
    )?;
    Ok(())
}

/// Update `last_touched_at` of a live record. Returns false if none matched.
pub(crate) fn touch(conn: &Connection, name: &str, now: i64) -> DirResult<bool> {
    let updated = conn.execute(
        "UPDATE file_meta SET last_touched_at = ?2 WHERE name = ?1 AND is_deleted = 0",
        params![name, now],
    )?;
    Ok(updated > 0)
}

/// Tombstone a live record. Returns false if there was nothing live.
pub(crate) fn mark_deleted(conn: &Connection, name: &str, now: i64) -> DirResult<bool> {
    let updated = conn.execute(
        "UPDATE file_meta SET is_deleted = 1, last_touched_at = ?2 WHERE name = ?1 AND is_deleted = 0",
        params![name, now],
    )?;
    Ok(updated > 0)
}

/// Move a record to a new name. The target name must be free.
pub(crate) fn rename(conn: &Connection, from: &str, to: &str) -> DirResult<()> {
    conn.execute(
        "UPDATE file_meta SET name = ?2 WHERE name = ?1",
        params![from, to],
    )?;
    Ok(())
}

/// Physically remove the record for `name`, whatever its state.
pub(crate) fn purge(conn: &Connection, name: &str) -> DirResult<()> {
    conn.execute("DELETE FROM file_meta WHERE name = ?1", params![name])?;
    Ok(())
}

/// Physically remove every tombstone. Returns how many were removed.
pub(crate) fn purge_tombstones(conn: &Connection) -> DirResult<usize> {
    Ok(conn.execute("DELETE FROM file_meta WHERE is_deleted = 1", [])?)
}

// ============================================================================
// Lock records
// ============================================================================

pub(crate) fn get_lock(conn: &Connection, name: &str) -> DirResult<Option<LockRecord>> {
    let record = conn
        .query_row(
            "SELECT id, name, owner, release_at FROM file_locks WHERE name = ?1",
            params![name],
            |row| {
                Ok(LockRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    owner: row.get(2)?,
                    release_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Write the lease for `name`, replacing any existing record.
pub(crate) fn put_lock(conn: &Connection, name: &str, owner: &str, release_at: i64) -> DirResult<()> {
    conn.execute(
        "INSERT INTO file_locks (name, owner, release_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET owner = excluded.owner, release_at = excluded.release_at",
        params![name, owner, release_at],
    )?;
    Ok(())
}

/// Extend a lease, only if `owner` still holds it. Returns false otherwise.
pub(crate) fn extend_lock(
    conn: &Connection,
    name: &str,
    owner: &str,
    release_at: i64,
) -> DirResult<bool> {
    let updated = conn.execute(
        "UPDATE file_locks SET release_at = ?3 WHERE name = ?1 AND owner = ?2",
        params![name, owner, release_at],
    )?;
    Ok(updated > 0)
}

/// Delete the lock record if it belongs to `owner`. Returns false otherwise.
pub(crate) fn delete_lock_owned(conn: &Connection, name: &str, owner: &str) -> DirResult<bool> {
    let deleted = conn.execute(
        "DELETE FROM file_locks WHERE name = ?1 AND owner = ?2",
        params![name, owner],
    )?;
    Ok(deleted > 0)
}

/// Delete the lock record unconditionally. Returns the removed record.
pub(crate) fn delete_lock(conn: &Connection, name: &str) -> DirResult<Option<LockRecord>> {
    let existing = get_lock(conn, name)?;
    if existing.is_some() {
        conn.execute("DELETE FROM file_locks WHERE name = ?1", params![name])?;
    }
    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DirectoryConfig, Store};

    fn store() -> Store {
        let store = Store::in_memory(&DirectoryConfig::default()).unwrap();
        store.provision(false).unwrap();
        store
    }

    #[test]
    fn test_file_record_lifecycle() {
        let store = store();
        store
            .with_conn(|conn| {
                assert!(get_file(conn, "seg0")?.is_none());

                upsert_live(conn, "seg0", 100)?;
                let rec = get_live_file(conn, "seg0")?.unwrap();
                assert_eq!(rec.last_touched_at, 100);
                assert!(!rec.is_deleted);

                assert!(touch(conn, "seg0", 200)?);
                assert_eq!(get_file(conn, "seg0")?.unwrap().last_touched_at, 200);

                assert!(mark_deleted(conn, "seg0", 300)?);
                assert!(get_live_file(conn, "seg0")?.is_none());
                assert!(get_file(conn, "seg0")?.unwrap().is_deleted);

                // second delete finds nothing live
                assert!(!mark_deleted(conn, "seg0", 400)?);
                // touching a tombstone does nothing
                assert!(!touch(conn, "seg0", 500)?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_revive_keeps_insertion_order() {
        let store = store();
        store
            .with_conn(|conn| {
                upsert_live(conn, "a", 1)?;
                upsert_live(conn, "b", 2)?;
                mark_deleted(conn, "a", 3)?;
                assert_eq!(list_live(conn)?, vec!["b".to_string()]);

                upsert_live(conn, "a", 4)?;
                assert_eq!(list_live(conn)?, vec!["a".to_string(), "b".to_string()]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_purge_tombstones() {
        let store = store();
        store
            .with_conn(|conn| {
                upsert_live(conn, "a", 1)?;
                upsert_live(conn, "b", 1)?;
                mark_deleted(conn, "a", 2)?;
                assert_eq!(purge_tombstones(conn)?, 1);
                assert!(get_file(conn, "a")?.is_none());
                assert!(get_file(conn, "b")?.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_lock_records() {
        let store = store();
        store
            .with_conn(|conn| {
                put_lock(conn, "write.lock", "owner-a", 1_000)?;
                let rec = get_lock(conn, "write.lock")?.unwrap();
                assert_eq!(rec.owner, "owner-a");
                assert!(!rec.is_expired(999));
                assert!(rec.is_expired(1_000));

                assert!(!extend_lock(conn, "write.lock", "owner-b", 5_000)?);
                assert!(extend_lock(conn, "write.lock", "owner-a", 5_000)?);
                assert_eq!(get_lock(conn, "write.lock")?.unwrap().release_at, 5_000);

                assert!(!delete_lock_owned(conn, "write.lock", "owner-b")?);
                assert!(delete_lock_owned(conn, "write.lock", "owner-a")?);
                assert!(get_lock(conn, "write.lock")?.is_none());

                put_lock(conn, "write.lock", "owner-c", 1)?;
                assert_eq!(delete_lock(conn, "write.lock")?.unwrap().owner, "owner-c");
                assert!(delete_lock(conn, "write.lock")?.is_none());
                Ok(())
            })
            .unwrap();
    }
}
