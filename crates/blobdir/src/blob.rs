//! Blob store: raw file content, split into fixed-size chunks.
//!
//! Chunk `idx` of a blob holds bytes `[idx * chunk_size, (idx + 1) * chunk_size)`.
//! A chunk may be shorter than `chunk_size` or missing entirely (a write
//! that seeked past the end leaves a gap); bytes inside the blob's length
//! that no chunk covers read as zeros.

use rusqlite::{Connection, OptionalExtension, params};
use std::io;

use crate::error::{DirError, DirResult};

/// Size bookkeeping for one blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobInfo {
    pub length: u64,
    pub chunk_size: u64,
}

impl BlobInfo {
    /// Chunk indices covering `[start, end)`. `end` must be greater than `start`.
    fn chunk_span(&self, start: u64, end: u64) -> (i64, i64) {
        let first = start / self.chunk_size;
        let last = (end - 1) / self.chunk_size;
        (first as i64, last as i64)
    }
}

pub(crate) fn info(conn: &Connection, name: &str) -> DirResult<Option<BlobInfo>> {
    let info = conn
        .query_row(
            "SELECT length, chunk_size FROM blobs WHERE name = ?1",
            params![name],
            |row| {
                Ok(BlobInfo {
                    length: row.get::<_, i64>(0)? as u64,
                    chunk_size: row.get::<_, i64>(1)? as u64,
                })
            },
        )
        .optional()?;
    Ok(info)
}

/// Length of the blob, or `None` if there is no blob under `name`.
pub(crate) fn length(conn: &Connection, name: &str) -> DirResult<Option<u64>> {
    Ok(info(conn, name)?.map(|i| i.length))
}

/// Create an empty blob, discarding any previous content under `name`.
pub(crate) fn create_empty(
    conn: &Connection,
    name: &str,
    chunk_size: usize,
    now: i64,
) -> DirResult<()> {
    conn.execute("DELETE FROM blob_chunks WHERE name = ?1", params![name])?;
    conn.execute(
        "INSERT INTO blobs (name, length, chunk_size, updated_at) VALUES (?1, 0, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET
            length = 0, chunk_size = excluded.chunk_size, updated_at = excluded.updated_at",
        params![name, chunk_size as i64, now],
    )?;
    Ok(())
}

/// Read up to `len` bytes starting at `offset`.
///
/// Returns fewer bytes near the end of the blob and none past it or for a
/// missing blob.
pub(crate) fn read_at(conn: &Connection, name: &str, offset: u64, len: usize) -> DirResult<Vec<u8>> {
    let Some(info) = info(conn, name)? else {
        return Ok(Vec::new());
    };
    if len == 0 || offset >= info.length {
        return Ok(Vec::new());
    }

    let end = offset.saturating_add(len as u64).min(info.length);
    let mut out = vec![0u8; (end - offset) as usize];
    let (first, last) = info.chunk_span(offset, end);

    let mut stmt = conn.prepare(
        "SELECT idx, data FROM blob_chunks
         WHERE name = ?1 AND idx BETWEEN ?2 AND ?3 ORDER BY idx",
    )?;
    let rows = stmt.query_map(params![name, first, last], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;

    for row in rows {
        let (idx, data) = row?;
        let chunk_start = idx as u64 * info.chunk_size;
        let chunk_end = chunk_start + data.len() as u64;
        let from = offset.max(chunk_start);
        let to = end.min(chunk_end);
        if from >= to {
            continue;
        }
        let src = &data[(from - chunk_start) as usize..(to - chunk_start) as usize];
        out[(from - offset) as usize..(to - offset) as usize].copy_from_slice(src);
    }

    Ok(out)
}

/// Read the whole blob.
pub(crate) fn read_all(conn: &Connection, name: &str) -> DirResult<Vec<u8>> {
    match length(conn, name)? {
        Some(len) => read_at(conn, name, 0, len as usize),
        None => Ok(Vec::new()),
    }
}

/// Write `data` at `offset`, growing the blob if needed. Only the chunks
/// the write touches are rewritten.
pub(crate) fn write_at(
    conn: &Connection,
    name: &str,
    offset: u64,
    data: &[u8],
    now: i64,
) -> DirResult<()> {
    let info = info(conn, name)?.ok_or_else(|| DirError::not_found(name))?;
    if data.is_empty() {
        return Ok(());
    }

    // lengths are stored as SQLite INTEGER
    let end = offset
        .checked_add(data.len() as u64)
        .filter(|end| *end <= i64::MAX as u64)
        .ok_or_else(|| {
            DirError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{name}: write of {} bytes at {offset} is out of range", data.len()),
            ))
        })?;
    let (first, last) = info.chunk_span(offset, end);

    let mut select = conn.prepare("SELECT data FROM blob_chunks WHERE name = ?1 AND idx = ?2")?;
    let mut upsert = conn.prepare(
        "INSERT INTO blob_chunks (name, idx, data) VALUES (?1, ?2, ?3)
         ON CONFLICT(name, idx) DO UPDATE SET data = excluded.data",
    )?;

    for idx in first..=last {
        let chunk_start = idx as u64 * info.chunk_size;
        let chunk_end = chunk_start + info.chunk_size;
        let from = offset.max(chunk_start);
        let to = end.min(chunk_end);

        let mut chunk: Vec<u8> = if from == chunk_start && to == chunk_end {
            // fully overwritten, no need to read it back
            Vec::with_capacity(info.chunk_size as usize)
        } else {
            select
                .query_row(params![name, idx], |row| row.get(0))
                .optional()?
                .unwrap_or_default()
        };

        let lo = (from - chunk_start) as usize;
        let hi = (to - chunk_start) as usize;
        if chunk.len() < hi {
            chunk.resize(hi, 0);
        }
        chunk[lo..hi].copy_from_slice(&data[(from - offset) as usize..(to - offset) as usize]);
        upsert.execute(params![name, idx, chunk])?;
    }

    let new_length = info.length.max(end);
    conn.execute(
        "UPDATE blobs SET length = ?2, updated_at = ?3 WHERE name = ?1",
        params![name, new_length as i64, now],
    )?;
    Ok(())
}

/// Remove the blob and its chunks. Missing blobs are ignored.
pub(crate) fn delete(conn: &Connection, name: &str) -> DirResult<()> {
    conn.execute("DELETE FROM blob_chunks WHERE name = ?1", params![name])?;
    conn.execute("DELETE FROM blobs WHERE name = ?1", params![name])?;
    Ok(())
}

/// Move the blob to a new name. The target name must be free.
pub(crate) fn rename(conn: &Connection, from: &str, to: &str) -> DirResult<()> {
    conn.execute(
        "UPDATE blob_chunks SET name = ?2 WHERE name = ?1",
        params![from, to],
    )?;
    conn.execute("UPDATE blobs SET name = ?2 WHERE name = ?1", params![from, to])?;
    Ok(())
}
