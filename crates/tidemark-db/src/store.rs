use chrono::{DateTime, Duration, Utc};
use tidemark_common::{AppliedRecord, Migration, Result, Version};

/// Whoever currently holds the run lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

/// Outcome of a single, non-blocking lock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    /// The caller now holds the lock. `reclaimed` is the stale holder that
    /// was evicted, if any.
    Acquired { reclaimed: Option<LockHolder> },
    /// A live run holds the lock.
    Held(LockHolder),
}

/// Persistence for the run lock.
pub trait LockStore: Send + Sync {
    /// Take the lock for `owner` unless a holder with a heartbeat newer than
    /// `stale_after` exists. Never blocks waiting for the holder.
    fn try_acquire(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<LockAttempt>;

    /// Bump the heartbeat of a lock held by `owner`.
    fn heartbeat(&self, owner: &str, now: DateTime<Utc>) -> Result<()>;

    /// Drop the lock if `owner` still holds it.
    fn release(&self, owner: &str) -> Result<()>;

    fn holder(&self) -> Result<Option<LockHolder>>;
}

/// What has been applied to the target.
pub trait StateStore: LockStore {
    /// Create the backing tables if absent.
    fn initialize(&self) -> Result<()>;

    /// Applied records in ascending version order. An uninitialized store
    /// reads as empty.
    fn list_applied(&self) -> Result<Vec<AppliedRecord>>;

    /// Durably record `migration` as applied.
    fn record_applied(&self, migration: &Migration) -> Result<AppliedRecord>;

    /// Durably remove the applied record for `version`.
    fn record_reverted(&self, version: Version) -> Result<()>;
}
