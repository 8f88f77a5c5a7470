//! Lease-based named locks.
//!
//! A lock is a row in `file_locks` carrying the holder's token and a
//! `release_at` deadline. A row whose deadline has passed counts as no row,
//! so a crashed holder never wedges the directory; the next acquirer simply
//! overwrites it.
//!
//! [`LockManager::acquire`] never blocks: it either writes the lease or fails
//! with [`DirError::LockBusy`]. Waiting is the caller's business, e.g. via
//! [`Lock::obtain_timeout`].

use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{DirError, DirResult, check_name};
use crate::meta::{self, LockRecord};
use crate::store::{Store, unix_millis};

/// Opaque proof of holding a lease, issued by [`LockManager::acquire`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockToken({})", self.0)
    }
}

/// Grants and releases leases stored in a [`Store`].
#[derive(Debug, Clone, Copy)]
pub struct LockManager<'a> {
    store: &'a Store,
    lease: Duration,
}

impl<'a> LockManager<'a> {
    /// Manager using the store's configured lease length.
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            lease: store.config().lock_lease(),
        }
    }

    /// Override the lease length for locks acquired through this manager.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Try once to take the lease on `name`.
    ///
    /// The check and the write run in one IMMEDIATE transaction, so two
    /// acquirers (in any number of processes) cannot both succeed.
    pub fn acquire(&self, name: &str) -> DirResult<LockToken> {
        check_name(name)?;
        let token = LockToken::generate();
        let lease_ms = self.lease.as_millis() as i64;

        self.store.with_tx(|conn| {
            let now = unix_millis();
            if let Some(existing) = meta::get_lock(conn, name)? {
                if !existing.is_expired(now) {
                    return Err(DirError::lock_busy(name));
                }
                tracing::warn!(
                    name = %name,
                    stale_owner = %existing.owner,
                    expired_ms_ago = now - existing.release_at,
                    "reclaiming expired lease"
                );
            }
            meta::put_lock(conn, name, token.as_str(), now.saturating_add(lease_ms))
        })?;

        tracing::debug!(name = %name, token = ?token, "lock acquired");
        Ok(token)
    }

    /// Release the lease if `token` still holds it.
    ///
    /// Returns false, without error, when the lease is no longer ours
    /// (already released, cleared, or reclaimed after expiry).
    pub fn release(&self, name: &str, token: &LockToken) -> DirResult<bool> {
        let released = self
            .store
            .with_conn(|conn| meta::delete_lock_owned(conn, name, token.as_str()))?;
        tracing::debug!(name = %name, released, "lock release");
        Ok(released)
    }

    /// Remove the lock record whoever holds it.
    pub fn force_release(&self, name: &str) -> DirResult<()> {
        let removed = self.store.with_conn(|conn| meta::delete_lock(conn, name))?;
        if let Some(record) = removed {
            if !record.is_expired(unix_millis()) {
                tracing::warn!(name = %name, owner = %record.owner, "cleared a live lease");
            }
        }
        Ok(())
    }

    /// Push the lease deadline out by another lease length.
    ///
    /// Works as long as nobody else has taken the lock, even if our own
    /// lease already ran out. Fails with `LockBusy` once it is lost.
    pub fn renew(&self, name: &str, token: &LockToken) -> DirResult<()> {
        let release_at = unix_millis().saturating_add(self.lease.as_millis() as i64);
        let renewed = self
            .store
            .with_conn(|conn| meta::extend_lock(conn, name, token.as_str(), release_at))?;
        if !renewed {
            return Err(DirError::lock_busy(name));
        }
        tracing::debug!(name = %name, "lock renewed");
        Ok(())
    }

    /// True iff an unexpired lease exists for `name`.
    pub fn is_locked(&self, name: &str) -> DirResult<bool> {
        let now = unix_millis();
        Ok(self
            .record(name)?
            .is_some_and(|record| !record.is_expired(now)))
    }

    /// The stored record for `name`, expired or not.
    pub fn record(&self, name: &str) -> DirResult<Option<LockRecord>> {
        self.store.with_conn(|conn| meta::get_lock(conn, name))
    }
}

/// Handle to one named lock, as handed out by
/// [`Directory::make_lock`](crate::Directory::make_lock).
///
/// Dropping a handle that still holds its lease releases it.
pub struct Lock<'a> {
    manager: LockManager<'a>,
    name: String,
    token: Option<LockToken>,
    poll_interval: Duration,
}

impl<'a> Lock<'a> {
    pub fn new(manager: LockManager<'a>, name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            manager,
            name: name.into(),
            token: None,
            poll_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if this handle currently believes it holds the lease.
    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }

    /// Single attempt. Fails with `LockBusy` if someone else holds it.
    ///
    /// Obtaining a lock this handle already holds renews the lease. If the
    /// lease was lost meanwhile (cleared, or expired and taken over), the
    /// stale token is dropped and this is a fresh attempt.
    pub fn obtain(&mut self) -> DirResult<()> {
        if let Some(token) = &self.token {
            match self.manager.renew(&self.name, token) {
                Err(DirError::LockBusy(_)) => {
                    tracing::debug!(name = %self.name, "lease lost, acquiring again");
                    self.token = None;
                }
                result => return result,
            }
        }
        let token = self.manager.acquire(&self.name)?;
        self.token = Some(token);
        Ok(())
    }

    /// Retry [`obtain`](Self::obtain) every poll interval until it succeeds
    /// or `timeout` elapses. Non-contention errors end the wait at once.
    pub fn obtain_timeout(&mut self, timeout: Duration) -> DirResult<()> {
        let started = Instant::now();
        loop {
            match self.obtain() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    let elapsed = started.elapsed();
                    if elapsed >= timeout {
                        return Err(e);
                    }
                    tracing::debug!(name = %self.name, "lock busy, waiting");
                    std::thread::sleep(self.poll_interval.min(timeout - elapsed));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Extend a held lease. Losing the lease also drops the handle's token.
    pub fn renew(&mut self) -> DirResult<()> {
        let Some(token) = &self.token else {
            return Err(DirError::lock_busy(&self.name));
        };
        let result = self.manager.renew(&self.name, token);
        if matches!(result, Err(DirError::LockBusy(_))) {
            self.token = None;
        }
        result
    }

    /// Give the lease back. Releasing a lock not held is a no-op.
    pub fn release(&mut self) -> DirResult<()> {
        if let Some(token) = self.token.take() {
            self.manager.release(&self.name, &token)?;
        }
        Ok(())
    }

    /// True iff anyone holds an unexpired lease on this name.
    pub fn is_locked(&self) -> DirResult<bool> {
        self.manager.is_locked(&self.name)
    }
}

impl fmt::Debug for Lock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.name)
            .field("held", &self.token.is_some())
            .finish()
    }
}

impl Drop for Lock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(name = %self.name, error = %e, "failed to release lock on drop");
        }
    }
}
