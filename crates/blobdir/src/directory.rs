//! The directory facade.
//!
//! [`Directory`] is what an index engine codes against: a flat namespace of
//! files with length and modified-time queries, delete/rename/touch, stream
//! factories and named locks. It composes the metadata store, the blob store
//! and the lock manager over one [`Store`].

use std::time::SystemTime;

use crate::blob::{self, BlobInfo};
use crate::config::DirectoryConfig;
use crate::error::{DirError, DirResult, check_name};
use crate::input::InputStream;
use crate::lock::{Lock, LockManager};
use crate::meta::{self, FileRecord};
use crate::output::OutputStream;
use crate::store::{Store, unix_millis};

/// A virtual directory stored in a database.
///
/// Streams and locks borrow the directory, so none of them can outlive it
/// (or the connection it owns).
#[derive(Debug)]
pub struct Directory {
    store: Store,
}

impl Directory {
    /// Wrap a provisioned store.
    ///
    /// Fails with [`DirError::NotProvisioned`] if any required table is
    /// missing. Tables are never created here; see [`Store::provision`].
    pub fn new(store: Store) -> DirResult<Self> {
        store.check_provisioned()?;
        Ok(Self { store })
    }

    /// Give the connection back.
    pub fn into_store(self) -> Store {
        self.store
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &DirectoryConfig {
        self.store.config()
    }

    /// Names of all live files, in creation order.
    pub fn list_files(&self) -> DirResult<Vec<String>> {
        self.store.with_conn(meta::list_live)
    }

    pub fn file_exists(&self, name: &str) -> DirResult<bool> {
        Ok(self
            .store
            .with_conn(|conn| meta::get_live_file(conn, name))?
            .is_some())
    }

    /// Length in bytes of a live file.
    pub fn file_length(&self, name: &str) -> DirResult<u64> {
        self.store.with_conn(|conn| {
            if meta::get_live_file(conn, name)?.is_none() {
                return Err(DirError::not_found(name));
            }
            Ok(blob::length(conn, name)?.unwrap_or(0))
        })
    }

    /// Time of the last write-close or touch.
    pub fn file_modified_time(&self, name: &str) -> DirResult<SystemTime> {
        self.store
            .with_conn(|conn| meta::get_live_file(conn, name))?
            .map(|record| record.last_touched())
            .ok_or_else(|| DirError::not_found(name))
    }

    /// The metadata record of a live file.
    pub fn file_record(&self, name: &str) -> DirResult<FileRecord> {
        self.store
            .with_conn(|conn| meta::get_live_file(conn, name))?
            .ok_or_else(|| DirError::not_found(name))
    }

    /// Storage layout of a live file's content.
    pub fn blob_info(&self, name: &str) -> DirResult<BlobInfo> {
        self.store.with_conn(|conn| {
            if meta::get_live_file(conn, name)?.is_none() {
                return Err(DirError::not_found(name));
            }
            blob::info(conn, name)?.ok_or_else(|| DirError::not_found(name))
        })
    }

    /// Tombstone the record and drop the content.
    ///
    /// Deleting a missing or already deleted file is a no-op.
    pub fn delete_file(&self, name: &str) -> DirResult<()> {
        let deleted = self.store.with_tx(|conn| {
            let deleted = meta::mark_deleted(conn, name, unix_millis())?;
            blob::delete(conn, name)?;
            Ok(deleted)
        })?;
        tracing::debug!(name = %name, deleted, "delete");
        Ok(())
    }

    /// Bump the modified time without changing content.
    pub fn touch_file(&self, name: &str) -> DirResult<()> {
        let touched = self
            .store
            .with_conn(|conn| meta::touch(conn, name, unix_millis()))?;
        if !touched {
            return Err(DirError::not_found(name));
        }
        Ok(())
    }

    /// Move `from` to `to`, record and content together.
    ///
    /// Fails with `Conflict` if `to` is a live file (both files are left
    /// alone) and `NotFound` if `from` is not. A tombstone at `to` is
    /// purged first. Renaming a file to itself does nothing.
    pub fn rename_file(&self, from: &str, to: &str) -> DirResult<()> {
        check_name(to)?;
        self.store.with_tx(|conn| {
            if meta::get_live_file(conn, from)?.is_none() {
                return Err(DirError::not_found(from));
            }
            if from == to {
                return Ok(());
            }
            match meta::get_file(conn, to)? {
                Some(target) if !target.is_deleted => return Err(DirError::conflict(to)),
                Some(_) => {
                    meta::purge(conn, to)?;
                    blob::delete(conn, to)?;
                }
                None => {}
            }
            meta::rename(conn, from, to)?;
            blob::rename(conn, from, to)
        })?;
        tracing::debug!(from = %from, to = %to, "rename");
        Ok(())
    }

    /// Open a writer on `name`, truncating any existing content.
    ///
    /// The record (live, or revived from a tombstone) and an empty blob
    /// exist as soon as this returns.
    pub fn create_output(&self, name: &str) -> DirResult<OutputStream<'_>> {
        check_name(name)?;
        let chunk_size = self.config().chunk_size;
        self.store.with_tx(|conn| {
            let now = unix_millis();
            blob::create_empty(conn, name, chunk_size, now)?;
            meta::upsert_live(conn, name, now)
        })?;
        tracing::debug!(name = %name, "output opened");
        Ok(OutputStream::new(&self.store, name))
    }

    /// Open a reader on a live file.
    pub fn open_input(&self, name: &str) -> DirResult<InputStream<'_>> {
        if !self.file_exists(name)? {
            return Err(DirError::not_found(name));
        }
        tracing::debug!(name = %name, "input opened");
        Ok(InputStream::new(&self.store, name))
    }

    /// Lock manager using the configured lease.
    pub fn locks(&self) -> LockManager<'_> {
        LockManager::new(&self.store)
    }

    /// Handle for the lock called `name`. Nothing is acquired yet.
    pub fn make_lock(&self, name: &str) -> Lock<'_> {
        Lock::new(self.locks(), name, self.config().lock_poll_interval())
    }

    /// Handle for the directory's exclusive-writer lock.
    pub fn write_lock(&self) -> Lock<'_> {
        self.make_lock(&self.config().write_lock_name)
    }

    /// Remove the lock called `name` whoever holds it.
    pub fn clear_lock(&self, name: &str) -> DirResult<()> {
        self.locks().force_release(name)
    }

    /// Physically remove tombstoned records. Returns how many went.
    pub fn purge_deleted(&self) -> DirResult<usize> {
        let purged = self.store.with_tx(meta::purge_tombstones)?;
        if purged > 0 {
            tracing::info!(purged, "purged deleted records");
        }
        Ok(purged)
    }

    /// Make the named files durable.
    ///
    /// Closed outputs are already committed, so this only checks the names.
    pub fn sync<I, S>(&self, names: I) -> DirResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            check_name(name.as_ref())?;
        }
        Ok(())
    }
}
