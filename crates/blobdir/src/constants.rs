//! Default tunables.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Size of one stored blob chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Bytes an input stream fetches per refill.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Bytes an output stream accumulates before flushing.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Lease granted to a freshly acquired lock.
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(60);

/// Poll interval for [`Lock::obtain_timeout`](crate::Lock::obtain_timeout).
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long SQLite waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the directory-wide exclusive-writer lock.
pub const DEFAULT_WRITE_LOCK_NAME: &str = "write.lock";
