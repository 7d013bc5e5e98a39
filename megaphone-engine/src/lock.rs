//! Processing lock helpers
//!
//! Fail-open wrappers over the store's lock operations. A store failure
//! while checking or acquiring the lock must not silently halt all
//! processing forever, so it is logged and treated as an acquired lock.
//! Stale locks left by crashed runs are reclaimed by the store itself.

use megaphone_core::HolderId;
use megaphone_store::CampaignStore;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquire {
    /// This holder owns the lock and must release it when done.
    Acquired,
    /// Another run legitimately holds the lock.
    Held,
}

/// Try to acquire the singleton processing lock.
///
/// Fail-open: a store error is logged and reported as `Acquired`, because a
/// permanently erroring lock check would otherwise stop every future run.
pub fn try_acquire(
    store: &dyn CampaignStore,
    holder_id: HolderId,
    now: megaphone_core::Timestamp,
    stale_after: Duration,
) -> LockAcquire {
    match store.lock_try_acquire(holder_id, now, stale_after) {
        Ok(true) => {
            debug!(%holder_id, "processing lock acquired");
            LockAcquire::Acquired
        }
        Ok(false) => LockAcquire::Held,
        Err(err) => {
            warn!(%holder_id, error = %err, "lock acquire failed, proceeding unlocked");
            LockAcquire::Acquired
        }
    }
}

/// Release the lock if `holder_id` still holds it. Errors are logged, not
/// propagated; a failed release is recovered by staleness takeover.
pub fn release(store: &dyn CampaignStore, holder_id: HolderId) {
    if let Err(err) = store.lock_release(holder_id) {
        warn!(%holder_id, error = %err, "lock release failed, relying on staleness takeover");
    }
}

/// Refresh the holder's heartbeat. Errors are logged, not propagated.
pub fn heartbeat(store: &dyn CampaignStore, holder_id: HolderId, now: megaphone_core::Timestamp) {
    if let Err(err) = store.lock_heartbeat(holder_id, now) {
        warn!(%holder_id, error = %err, "lock heartbeat failed");
    }
}

// =============================================================================
// TESTS
// =============================================================================
