//! Random-access input stream over a stored blob.

use std::io;

use crate::blob;
use crate::error::{DirError, DirResult};
use crate::store::Store;

/// Read cursor over one file.
///
/// Reads go through a private buffer refilled with range reads from the
/// blob store. Each stream (and each clone) has its own position; nothing
/// is shared between cursors on the same name.
///
/// Unlike strict file I/O:
/// - reading past the end returns only the bytes that remain;
/// - reading an empty or missing blob returns no bytes but still advances
///   the position by the requested length.
#[derive(Debug, Clone)]
pub struct InputStream<'a> {
    store: &'a Store,
    name: String,
    position: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    buffer_size: usize,
    closed: bool,
}

impl<'a> InputStream<'a> {
    pub(crate) fn new(store: &'a Store, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            position: 0,
            buffer: Vec::new(),
            buffer_start: 0,
            buffer_size: store.config().read_buffer_size,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fill `buf` from the current position. Returns the byte count filled.
    pub fn read(&mut self, buf: &mut [u8]) -> DirResult<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut filled = self.copy_from_buffer(buf);
        while filled < buf.len() {
            let wanted = (buf.len() - filled).max(self.buffer_size);
            let (data, length) = self.store.with_conn(|conn| {
                let length = blob::length(conn, &self.name)?.unwrap_or(0);
                let data = blob::read_at(conn, &self.name, self.position, wanted)?;
                Ok((data, length))
            })?;

            if data.is_empty() {
                if length == 0 {
                    // empty or missing blob: a no-op read that still moves the cursor
                    self.position = self.position.saturating_add((buf.len() - filled) as u64);
                }
                break;
            }

            self.buffer_start = self.position;
            self.buffer = data;
            filled += self.copy_from_buffer(&mut buf[filled..]);
        }

        Ok(filled)
    }

    /// Read exactly `buf.len()` bytes or fail with `UnexpectedEof`.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> DirResult<()> {
        let n = self.read(buf)?;
        if n < buf.len() {
            return Err(DirError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{}: wanted {} bytes, got {}", self.name, buf.len(), n),
            )));
        }
        Ok(())
    }

    /// Move the cursor. No I/O and no bounds check until the next read.
    pub fn seek(&mut self, position: u64) {
        if position < self.position {
            // going backwards: the content may have changed since we buffered it
            self.buffer.clear();
        }
        self.position = position;
    }

    /// Current blob length, independent of the cursor.
    pub fn length(&self) -> DirResult<u64> {
        self.ensure_open()?;
        Ok(self
            .store
            .with_conn(|conn| blob::length(conn, &self.name))?
            .unwrap_or(0))
    }

    pub fn file_pointer(&self) -> u64 {
        self.position
    }

    /// Drop the buffer. Closing twice is fine.
    pub fn close(&mut self) {
        if !self.closed {
            tracing::debug!(name = %self.name, "input closed");
        }
        self.closed = true;
        self.buffer = Vec::new();
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

    /// Copy whatever the buffer holds at the cursor and advance past it.
    fn copy_from_buffer(&mut self, out: &mut [u8]) -> usize {
        let buffer_end = self.buffer_start + self.buffer.len() as u64;
        if self.position < self.buffer_start || self.position >= buffer_end {
            return 0;
        }
        let at = (self.position - self.buffer_start) as usize;
        let n = out.len().min(self.buffer.len() - at);
        out[..n].copy_from_slice(&self.buffer[at..at + n]);
        self.position += n as u64;
        n
    }
}

impl io::Read for InputStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        InputStream::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Seek for InputStream<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(n) => Some(n),
            io::SeekFrom::Current(d) => self.position.checked_add_signed(d),
            io::SeekFrom::End(d) => self.length()?.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        InputStream::seek(self, target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DirectoryConfig;
    use crate::store::unix_millis;
    use std::io::{Read, Seek, SeekFrom};

    fn store_with(name: &str, data: &[u8]) -> Store {
        let config = DirectoryConfig::default()
            .with_chunk_size(8)
            .with_buffer_sizes(4, 4);
        let store = Store::in_memory(&config).unwrap();
        store.provision(false).unwrap();
        store
            .with_conn(|conn| {
                blob::create_empty(conn, name, 8, 0)?;
                blob::write_at(conn, name, 0, data, unix_millis())
            })
            .unwrap();
        store
    }

    #[test]
    fn test_sequential_reads_cross_buffers() {
        let store = store_with("f", b"0123456789abcdef");
        let mut input = InputStream::new(&store, "f");

        let mut buf = [0u8; 6];
        assert_eq!(input.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"012345");
        assert_eq!(input.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"6789ab");
        assert_eq!(input.file_pointer(), 12);
    }

    #[test]
    fn test_read_past_end_truncates() {
        let store = store_with("f", b"hello");
        let mut input = InputStream::new(&store, "f");
        input.seek(3);

        let mut buf = [0u8; 10];
        assert_eq!(input.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(input.file_pointer(), 5);
        assert_eq!(input.read(&mut buf).unwrap(), 0);
        assert_eq!(input.file_pointer(), 5);
    }

    #[test]
    fn test_empty_blob_read_advances_position() {
        let store = store_with("empty", b"");
        let mut input = InputStream::new(&store, "empty");

        let mut buf = [7u8; 16];
        assert_eq!(input.read(&mut buf).unwrap(), 0);
        assert_eq!(input.file_pointer(), 16);
        assert_eq!(buf, [7u8; 16]);
    }

    #[test]
    fn test_missing_blob_read_advances_position() {
        let store = store_with("f", b"x");
        let mut input = InputStream::new(&store, "ghost");
        let mut buf = [0u8; 4];
        assert_eq!(input.read(&mut buf).unwrap(), 0);
        assert_eq!(input.file_pointer(), 4);
        assert_eq!(input.length().unwrap(), 0);
    }

    #[test]
    fn test_read_at_far_position() {
        let store = store_with("empty", b"");
        let mut input = InputStream::new(&store, "empty");
        input.seek(u64::MAX - 2);
        let mut buf = [0u8; 8];
        assert_eq!(input.read(&mut buf).unwrap(), 0);
        assert_eq!(input.file_pointer(), u64::MAX);

        let store = store_with("f", b"data");
        let mut input = InputStream::new(&store, "f");
        input.seek(u64::MAX);
        assert_eq!(input.read(&mut buf).unwrap(), 0);
        assert_eq!(input.file_pointer(), u64::MAX);
    }

    #[test]
    fn test_backward_seek_sees_new_content() {
        let store = store_with("f", b"aaaaaaaa");
        let mut input = InputStream::new(&store, "f");
        let mut buf = [0u8; 4];
        input.read(&mut buf).unwrap();
        assert_eq!(&buf, b"aaaa");

        store
            .with_conn(|conn| blob::write_at(conn, "f", 0, b"bbbb", unix_millis()))
            .unwrap();

        input.seek(0);
        input.read(&mut buf).unwrap();
        assert_eq!(&buf, b"bbbb");
    }

    #[test]
    fn test_clones_have_independent_cursors() {
        let store = store_with("f", b"0123456789");
        let mut a = InputStream::new(&store, "f");
        let mut b = a.clone();

        let mut buf = [0u8; 3];
        a.read(&mut buf).unwrap();
        a.read(&mut buf).unwrap();
        assert_eq!(&buf, b"345");

        b.read(&mut buf).unwrap();
        assert_eq!(&buf, b"012");
        assert_eq!(a.file_pointer(), 6);
        assert_eq!(b.file_pointer(), 3);
    }

    #[test]
    fn test_closed_stream_rejects_reads() {
        let store = store_with("f", b"data");
        let mut input = InputStream::new(&store, "f");
        input.close();
        input.close();
        let mut buf = [0u8; 1];
        assert!(matches!(input.read(&mut buf), Err(DirError::StreamClosed(_))));
    }

    #[test]
    fn test_std_io_traits() {
        let store = store_with("f", b"0123456789");
        let mut input = InputStream::new(&store, "f");

        assert_eq!(Seek::seek(&mut input, SeekFrom::End(-3)).unwrap(), 7);
        let mut rest = Vec::new();
        input.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"789");

        assert!(Seek::seek(&mut input, SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_read_exact_reports_eof() {
        let store = store_with("f", b"abc");
        let mut input = InputStream::new(&store, "f");
        let mut buf = [0u8; 5];
        let err = input.read_exact(&mut buf).unwrap_err();
        assert!(matches!(err, DirError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }
}
