//! Directory configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides:
//!
//! ```ron
//! (
//!     chunk_size: 131072,
//!     lock_lease_ms: 30000,
//! )
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BUSY_TIMEOUT, DEFAULT_CHUNK_SIZE, DEFAULT_LOCK_LEASE, DEFAULT_LOCK_POLL_INTERVAL,
    DEFAULT_READ_BUFFER_SIZE, DEFAULT_WRITE_BUFFER_SIZE, DEFAULT_WRITE_LOCK_NAME,
};
use crate::error::{DirError, DirResult};

/// Tunables for a store and the directory built on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Chunk size for newly written blobs, in bytes.
    pub chunk_size: usize,
    /// Input stream buffer size, in bytes.
    pub read_buffer_size: usize,
    /// Output stream flush threshold, in bytes.
    pub write_buffer_size: usize,
    /// Lease length for acquired locks, in milliseconds.
    pub lock_lease_ms: u64,
    /// Retry interval for `Lock::obtain_timeout`, in milliseconds.
    pub lock_poll_interval_ms: u64,
    /// SQLite busy timeout, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Name of the exclusive-writer lock.
    pub write_lock_name: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            lock_lease_ms: DEFAULT_LOCK_LEASE.as_millis() as u64,
            lock_poll_interval_ms: DEFAULT_LOCK_POLL_INTERVAL.as_millis() as u64,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
            write_lock_name: DEFAULT_WRITE_LOCK_NAME.to_string(),
        }
    }
}

impl DirectoryConfig {
    /// Parse a config from RON text and validate it.
    pub fn from_ron_str(text: &str) -> DirResult<Self> {
        let config: Self =
            ron::from_str(text).map_err(|e| DirError::config(format!("RON parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a `.ron` file.
    pub fn load(path: impl AsRef<Path>) -> DirResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_ron_str(&text)
    }

    /// Reject values that would make streams or locks misbehave.
    pub fn validate(&self) -> DirResult<()> {
        if self.chunk_size == 0 {
            return Err(DirError::config("chunk_size must be non-zero"));
        }
        if self.read_buffer_size == 0 {
            return Err(DirError::config("read_buffer_size must be non-zero"));
        }
        if self.write_buffer_size == 0 {
            return Err(DirError::config("write_buffer_size must be non-zero"));
        }
        if self.write_lock_name.is_empty() {
            return Err(DirError::config("write_lock_name must not be empty"));
        }
        Ok(())
    }

    /// Set the blob chunk size.
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set both stream buffer sizes.
    pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    /// Set the lock lease length.
    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease_ms = lease.as_millis() as u64;
        self
    }

    /// Set the lock poll interval.
    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
