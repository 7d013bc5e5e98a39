//! Cooldown gate
//!
//! Enforces a minimum idle interval between completed processing runs so
//! bursts of trigger events (cron overlap, manual kicks) do not produce
//! back-to-back batches.

use megaphone_core::{MegaphoneResult, Timestamp};
use megaphone_store::CampaignStore;
use std::time::Duration;

/// Decision of the cooldown gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    /// Enough time has passed since the last completed run (or none exists).
    Proceed,
    /// Still cooling down; `remaining` until the gate opens.
    Wait { remaining: Duration },
}

impl CooldownDecision {
    /// Whether processing may proceed.
    pub fn allowed(&self) -> bool {
        matches!(self, CooldownDecision::Proceed)
    }
}

/// Check the cooldown gate against the most recent completed run.
///
/// Runs that started but never completed do not arm the gate; only a
/// completed run's `completed_at` counts. Store errors propagate, the gate
/// is not fail-open.
pub fn check(
    store: &dyn CampaignStore,
    cooldown: Duration,
    now: Timestamp,
) -> MegaphoneResult<CooldownDecision> {
    let Some(completed_at) = store.run_latest_completed_at()? else {
        return Ok(CooldownDecision::Proceed);
    };

    let elapsed = (now - completed_at).to_std().unwrap_or(Duration::ZERO);
    if elapsed >= cooldown {
        Ok(CooldownDecision::Proceed)
    } else {
        Ok(CooldownDecision::Wait {
            remaining: cooldown - elapsed,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use megaphone_core::{BatchRun, RunStatus};
    use megaphone_store::{MemoryStore, RunUpdate};
    use uuid::Uuid;

    const COOLDOWN: Duration = Duration::from_secs(120);

    fn completed_run(store: &MemoryStore, completed_at: Timestamp) {
        let run = BatchRun::start(Uuid::now_v7(), 5, completed_at - chrono::Duration::seconds(30));
        store.run_insert(&run).unwrap();
        store
            .run_update(
                run.run_id,
                RunUpdate {
                    completed_at: Some(completed_at),
                    status: Some(RunStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_no_prior_run_proceeds() {
        let store = MemoryStore::new();
        let decision = check(&store, COOLDOWN, Utc::now()).unwrap();
        assert_eq!(decision, CooldownDecision::Proceed);
    }

    #[test]
    fn test_recent_run_waits_with_positive_remaining() {
        let store = MemoryStore::new();
        let now = Utc::now();
        completed_run(&store, now - chrono::Duration::seconds(30));

        match check(&store, COOLDOWN, now).unwrap() {
            CooldownDecision::Wait { remaining } => {
                assert!(remaining > Duration::ZERO);
                assert!(remaining <= Duration::from_secs(90));
            }
            CooldownDecision::Proceed => panic!("gate should be closed"),
        }
    }

    #[test]
    fn test_elapsed_cooldown_proceeds() {
        let store = MemoryStore::new();
        let now = Utc::now();
        completed_run(&store, now - chrono::Duration::seconds(121));

        assert!(check(&store, COOLDOWN, now).unwrap().allowed());
    }

    #[test]
    fn test_incomplete_run_does_not_arm_the_gate() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let in_flight = BatchRun::start(Uuid::now_v7(), 5, now - chrono::Duration::seconds(10));
        store.run_insert(&in_flight).unwrap();

        assert!(check(&store, COOLDOWN, now).unwrap().allowed());
    }
}
