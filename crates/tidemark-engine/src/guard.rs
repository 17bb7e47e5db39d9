use chrono::{Duration, Utc};
use tidemark_common::{Error, Result};
use tidemark_db::{LockAttempt, LockStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Scoped hold on the run lock. Dropping it releases the lock.
pub struct RunLock<'a, S: LockStore + ?Sized> {
    store: &'a S,
    owner: String,
}

impl<'a, S: LockStore + ?Sized> RunLock<'a, S> {
    /// Take the lock or fail straight away with `LockContention`.
    pub fn acquire(store: &'a S, stale_after: Duration) -> Result<Self> {
        let owner = format!("pid-{}-{}", std::process::id(), Uuid::new_v4());
        match store.try_acquire(&owner, Utc::now(), stale_after)? {
            LockAttempt::Acquired { reclaimed: None } => {}
            LockAttempt::Acquired {
                reclaimed: Some(stale),
            } => {
                warn!(
                    "reclaimed stale migration lock from {} (last heartbeat {})",
                    stale.owner,
                    stale.heartbeat_at.to_rfc3339()
                );
            }
            LockAttempt::Held(holder) => {
                return Err(Error::LockContention {
                    owner: holder.owner,
                    heartbeat_at: holder.heartbeat_at.to_rfc3339(),
                });
            }
        }
        debug!("migration lock acquired by {owner}");
        Ok(Self { store, owner })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Refresh the heartbeat. Fails if the lock was taken over.
    pub fn heartbeat(&self) -> Result<()> {
        self.store.heartbeat(&self.owner, Utc::now())
    }
}

impl<S: LockStore + ?Sized> Drop for RunLock<'_, S> {
    fn drop(&mut self) {
        match self.store.release(&self.owner) {
            Ok(()) => info!("migration lock released"),
            Err(e) => warn!(
                "failed to release migration lock held by {}: {e}",
                self.owner
            ),
        }
    }
}
