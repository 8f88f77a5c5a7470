//! Random-access output stream into a stored blob.

use std::io;

use crate::blob;
use crate::error::{DirError, DirResult};
use crate::meta;
use crate::store::{Store, unix_millis};

/// Write cursor over one file.
///
/// Bytes collect in a local buffer and go to the blob store once the
/// buffer reaches the configured threshold, on [`flush`](Self::flush),
/// on [`seek`](Self::seek), or on [`close`](Self::close). Closing also
/// stamps the file's `last_touched_at`.
///
/// The stream does not serialize against other writers on the same name;
/// hold the directory's write lock for that.
#[derive(Debug)]
pub struct OutputStream<'a> {
    store: &'a Store,
    name: String,
    buffer: Vec<u8>,
    /// File offset of `buffer[0]`.
    buffer_start: u64,
    threshold: usize,
    closed: bool,
}

impl<'a> OutputStream<'a> {
    pub(crate) fn new(store: &'a Store, name: impl Into<String>) -> Self {
        let threshold = store.config().write_buffer_size;
        Self {
            store,
            name: name.into(),
            buffer: Vec::with_capacity(threshold),
            buffer_start: 0,
            threshold,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write `data` at the current position.
    pub fn write(&mut self, data: &[u8]) -> DirResult<()> {
        self.ensure_open()?;
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= self.threshold {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Push buffered bytes to the blob store without closing.
    pub fn flush(&mut self) -> DirResult<()> {
        self.ensure_open()?;
        self.flush_buffer()
    }

    /// Move the cursor, flushing pending bytes first.
    pub fn seek(&mut self, position: u64) -> DirResult<()> {
        self.ensure_open()?;
        self.flush_buffer()?;
        self.buffer_start = position;
        Ok(())
    }

    pub fn file_pointer(&self) -> u64 {
        self.buffer_start.saturating_add(self.buffer.len() as u64)
    }

    /// File length including bytes not yet flushed.
    pub fn length(&self) -> DirResult<u64> {
        let stored = self
            .store
            .with_conn(|conn| blob::length(conn, &self.name))?
            .unwrap_or(0);
        Ok(stored.max(self.file_pointer()))
    }

    /// Flush, stamp `last_touched_at`, and close. Closing twice is fine.
    pub fn close(&mut self) -> DirResult<()> {
        if self.closed {
            return Ok(());
        }

        // pending bytes stay buffered until the commit, so a failed close can be retried
        self.store.with_tx(|conn| {
            let now = unix_millis();
            blob::write_at(conn, &self.name, self.buffer_start, &self.buffer, now)?;
            if !meta::touch(conn, &self.name, now)? {
                return Err(DirError::not_found(&self.name));
            }
            Ok(())
        })?;
        self.buffer_start += self.buffer.len() as u64;
        self.buffer = Vec::new();
        self.closed = true;

        tracing::debug!(name = %self.name, length = self.buffer_start, "output closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> DirResult<()> {
        if self.closed {
            return Err(DirError::StreamClosed(self.name.clone()));
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> DirResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.store.with_tx(|conn| {
            blob::write_at(conn, &self.name, self.buffer_start, &self.buffer, unix_millis())
        })?;
        tracing::debug!(name = %self.name, offset = self.buffer_start, bytes = self.buffer.len(), "flushed");
        self.buffer_start += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }
}

impl io::Write for OutputStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        OutputStream::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(OutputStream::flush(self)?)
    }
}

impl io::Seek for OutputStream<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(n) => Some(n),
            io::SeekFrom::Current(d) => self.file_pointer().checked_add_signed(d),
            io::SeekFrom::End(d) => self.length()?.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        OutputStream::seek(self, target)?;
        Ok(target)
    }
}

impl Drop for OutputStream<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(name = %self.name, error = %e, "failed to close output on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DirectoryConfig;

    fn store() -> Store {
        let config = DirectoryConfig::default()
            .with_chunk_size(8)
            .with_buffer_sizes(4, 4);
        let store = Store::in_memory(&config).unwrap();
        store.provision(false).unwrap();
        store
    }

    fn open<'a>(store: &'a Store, name: &str) -> OutputStream<'a> {
        store
            .with_tx(|conn| {
                blob::create_empty(conn, name, 8, 0)?;
                meta::upsert_live(conn, name, 0)
            })
            .unwrap();
        OutputStream::new(store, name)
    }

    fn content(store: &Store, name: &str) -> Vec<u8> {
        store.with_conn(|conn| blob::read_all(conn, name)).unwrap()
    }

    #[test]
    fn test_buffered_until_threshold() {
        let store = store();
        let mut out = open(&store, "f");
        out.write(b"ab").unwrap();
        assert!(content(&store, "f").is_empty());
        assert_eq!(out.length().unwrap(), 2);

        out.write(b"cd").unwrap();
        assert_eq!(content(&store, "f"), b"abcd");
    }

    #[test]
    fn test_flush_and_close() {
        let store = store();
        let mut out = open(&store, "f");
        out.write(b"x").unwrap();
        out.flush().unwrap();
        assert_eq!(content(&store, "f"), b"x");

        out.write(b"yz").unwrap();
        out.close().unwrap();
        out.close().unwrap();
        assert_eq!(content(&store, "f"), b"xyz");
        assert!(matches!(out.write(b"!"), Err(DirError::StreamClosed(_))));
    }

    #[test]
    fn test_close_stamps_touch_time() {
        let store = store();
        let mut out = open(&store, "f");
        out.write(b"data").unwrap();
        out.close().unwrap();

        let rec = store
            .with_conn(|conn| meta::get_live_file(conn, "f"))
            .unwrap()
            .unwrap();
        assert!(rec.last_touched_at > 0);
    }

    #[test]
    fn test_seek_overwrites() {
        let store = store();
        let mut out = open(&store, "f");
        out.write(b"0123456789").unwrap();
        out.seek(2).unwrap();
        out.write(b"AB").unwrap();
        assert_eq!(out.file_pointer(), 4);
        assert_eq!(out.length().unwrap(), 10);
        out.close().unwrap();
        assert_eq!(content(&store, "f"), b"01AB456789");
    }

    #[test]
    fn test_drop_closes() {
        let store = store();
        {
            let mut out = open(&store, "f");
            out.write(b"abc").unwrap();
        }
        assert_eq!(content(&store, "f"), b"abc");
    }

    #[test]
    fn test_std_io_write() {
        use std::io::Write;

        let store = store();
        let mut out = open(&store, "f");
        write!(out, "n={}", 42).unwrap();
        Write::flush(&mut out).unwrap();
        assert_eq!(content(&store, "f"), b"n=42");
    }

    #[test]
    fn test_failed_close_keeps_pending_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.db");
        let config = DirectoryConfig {
            busy_timeout_ms: 20,
            ..DirectoryConfig::default()
                .with_chunk_size(8)
                .with_buffer_sizes(4, 4)
        };
        let store = Store::open(&path, &config).unwrap();
        store.provision(false).unwrap();

        let mut out = open(&store, "f");
        out.write(b"abc").unwrap();

        // another connection holds the write lock past our busy timeout
        let blocker = rusqlite::Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();
        assert!(matches!(out.close(), Err(DirError::Store(_))));
        assert!(!out.is_closed());
        blocker.execute_batch("COMMIT").unwrap();

        out.close().unwrap();
        assert!(out.is_closed());
        assert_eq!(content(&store, "f"), b"abc");
    }

    #[test]
    fn test_write_beyond_addressable_range() {
        let store = store();
        let mut out = open(&store, "f");
        out.seek(u64::MAX - 1).unwrap();
        out.write(b"xyz").unwrap();
        assert_eq!(out.file_pointer(), u64::MAX);

        let err = out.flush().unwrap_err();
        assert!(matches!(err, DirError::Io(ref e) if e.kind() == io::ErrorKind::InvalidInput));
        assert!(content(&store, "f").is_empty());
    }

    #[test]
    fn test_close_after_delete_is_not_found() {
        let store = store();
        let mut out = open(&store, "f");
        out.write(b"abc").unwrap();
        store
            .with_tx(|conn| {
                meta::mark_deleted(conn, "f", 1)?;
                blob::delete(conn, "f")
            })
            .unwrap();
        assert!(matches!(out.close(), Err(DirError::NotFound(_))));
    }
}
