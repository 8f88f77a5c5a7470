//! Directory error types.

use std::io;
use thiserror::Error;

/// Directory error type.
#[derive(Debug, Error)]
pub enum DirError {
    /// A required table is missing. Call [`Store::provision`](crate::Store::provision).
    #[error("store not provisioned: missing table {0}")]
    NotProvisioned(String),

    /// No live file with this name.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rename target already exists.
    #[error("already exists: {0}")]
    Conflict(String),

    /// Another holder has an unexpired lease on this lock.
    #[error("lock busy: {0}")]
    LockBusy(String),

    /// File or lock name is not usable as a key.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Read or write on a stream that was already closed.
    #[error("stream closed: {0}")]
    StreamClosed(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    Config(String),

    /// Underlying SQLite failure.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DirError {
    /// Create a NotFound error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a Conflict error.
    pub fn conflict(name: impl Into<String>) -> Self {
        Self::Conflict(name.into())
    }

    /// Create a LockBusy error.
    pub fn lock_busy(name: impl Into<String>) -> Self {
        Self::LockBusy(name.into())
    }

    /// Create an InvalidName error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName(name.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Only lock contention is worth retrying; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DirError::LockBusy(_))
    }
}

/// Convert DirError to std::io::Error for the `Read`/`Write`/`Seek` impls.
impl From<DirError> for io::Error {
    fn from(e: DirError) -> Self {
        match e {
            DirError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            DirError::Conflict(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            DirError::LockBusy(msg) => io::Error::new(io::ErrorKind::WouldBlock, msg),
            DirError::InvalidName(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            DirError::StreamClosed(msg) => io::Error::new(io::ErrorKind::BrokenPipe, msg),
            DirError::Config(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            DirError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Directory result type.
pub type DirResult<T> = Result<T, DirError>;

/// Reject names SQLite would store but the directory cannot round-trip.
pub(crate) fn check_name(name: &str) -> DirResult<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(DirError::invalid_name(name));
    }
    Ok(())
}
