//! Core entity structures

use crate::{
    CampaignId, CampaignStatus, CanonicalPhone, DeliveryId, DeliveryStatus, HolderId, RunId,
    RunStatus, TenantId, Timestamp, new_entity_id,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Campaign - one day-bucket of a logical broadcast.
///
/// A multi-day broadcast is stored as several campaigns sharing a
/// `parent_campaign_id`, each annotated with `day_number` of `total_days`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Message template; `{{phone}}` is substituted per recipient at send time.
    pub message_text: String,
    /// Opaque reference to an uploaded media object, if any.
    pub media_ref: Option<String>,
    pub recipient_count: i32,
    pub day_number: i32,
    pub total_days: i32,
    /// Sub-campaigns of one logical broadcast share a parent id.
    pub parent_campaign_id: Option<CampaignId>,
    pub scheduled_at: Timestamp,
    pub status: CampaignStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Campaign {
    /// Create a new scheduled campaign.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        message_text: impl Into<String>,
        media_ref: Option<String>,
        recipient_count: i32,
        scheduled_at: Timestamp,
        now: Timestamp,
    ) -> Self {
        Self {
            campaign_id: new_entity_id(),
            tenant_id,
            name: name.into(),
            message_text: message_text.into(),
            media_ref,
            recipient_count,
            day_number: 1,
            total_days: 1,
            parent_campaign_id: None,
            scheduled_at,
            status: CampaignStatus::Scheduled,
            created_at: now,
            updated_at: now,
        }
    }

    /// Display name, with a "(Day X/N)" suffix for multi-day splits.
    /// Single-day campaigns are unlabeled.
    pub fn display_name(&self) -> String {
        if self.total_days > 1 {
            format!("{} (Day {}/{})", self.name, self.day_number, self.total_days)
        } else {
            self.name.clone()
        }
    }
}

/// Delivery record - one recipient's state within a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub delivery_id: DeliveryId,
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub recipient: CanonicalPhone,
    pub status: DeliveryStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub sent_at: Option<Timestamp>,
    /// When this record becomes due. Retries push it into the future.
    pub scheduled_at: Timestamp,
    /// Position within the campaign, dense from 1..N at creation time.
    /// `(scheduled_at, sequence_number)` ascending defines processing order.
    pub sequence_number: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl DeliveryRecord {
    /// Create a new pending delivery record.
    pub fn new(
        campaign_id: CampaignId,
        tenant_id: TenantId,
        recipient: CanonicalPhone,
        scheduled_at: Timestamp,
        sequence_number: i32,
        now: Timestamp,
    ) -> Self {
        Self {
            delivery_id: new_entity_id(),
            campaign_id,
            tenant_id,
            recipient,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            last_error: None,
            sent_at: None,
            scheduled_at,
            sequence_number,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Processing lock - the singleton mutual-exclusion row.
///
/// At most one holder may have `is_processing = true` with a heartbeat
/// younger than the staleness threshold. A stale lock may be forcibly
/// reclaimed by a new run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProcessingLockState {
    pub is_processing: bool,
    pub holder_id: Option<HolderId>,
    pub acquired_at: Option<Timestamp>,
    pub last_heartbeat: Option<Timestamp>,
}

impl ProcessingLockState {
    /// An idle lock with no holder.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Check if the lock is stale: held, but the heartbeat is older than
    /// `stale_after`. A missing heartbeat on a held lock also counts as stale.
    pub fn is_stale(&self, now: Timestamp, stale_after: Duration) -> bool {
        if !self.is_processing {
            return false;
        }
        match self.last_heartbeat {
            Some(heartbeat) => now - heartbeat > stale_after,
            None => true,
        }
    }

    /// Check if a fresh (non-stale) holder currently has the lock.
    pub fn is_held(&self, now: Timestamp, stale_after: Duration) -> bool {
        self.is_processing && !self.is_stale(now, stale_after)
    }
}

/// Batch run - audit record of one batch processor invocation.
///
/// Read by the cooldown gate (time since the most recent `completed_at`)
/// and for observability; never read by delivery logic otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    pub run_id: RunId,
    pub holder_id: HolderId,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub batch_size: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub status: RunStatus,
}

impl BatchRun {
    /// Start a run log row for a batch of the given size.
    pub fn start(holder_id: HolderId, batch_size: i32, now: Timestamp) -> Self {
        Self {
            run_id: new_entity_id(),
            holder_id,
            started_at: now,
            completed_at: None,
            batch_size,
            sent_count: 0,
            failed_count: 0,
            status: RunStatus::Processing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_display_name_labels_multi_day_only() {
        let now = Utc::now();
        let mut campaign = Campaign::new(Uuid::now_v7(), "Diwali Sale", "Hi!", None, 50, now, now);
        assert_eq!(campaign.display_name(), "Diwali Sale");

        campaign.day_number = 2;
        campaign.total_days = 3;
        assert_eq!(campaign.display_name(), "Diwali Sale (Day 2/3)");
    }

    #[test]
    fn test_lock_staleness() {
        let now = Utc::now();
        let stale_after = Duration::minutes(5);

        let idle = ProcessingLockState::idle();
        assert!(!idle.is_stale(now, stale_after));
        assert!(!idle.is_held(now, stale_after));

        let fresh = ProcessingLockState {
            is_processing: true,
            holder_id: Some(Uuid::now_v7()),
            acquired_at: Some(now),
            last_heartbeat: Some(now - Duration::seconds(30)),
        };
        assert!(!fresh.is_stale(now, stale_after));
        assert!(fresh.is_held(now, stale_after));

        let stale = ProcessingLockState {
            last_heartbeat: Some(now - Duration::minutes(10)),
            ..fresh.clone()
        };
        assert!(stale.is_stale(now, stale_after));
        assert!(!stale.is_held(now, stale_after));
    }

    #[test]
    fn test_held_lock_without_heartbeat_is_stale() {
        let now = Utc::now();
        let lock = ProcessingLockState {
            is_processing: true,
            holder_id: Some(Uuid::now_v7()),
            acquired_at: None,
            last_heartbeat: None,
        };
        assert!(lock.is_stale(now, Duration::minutes(5)));
    }

    #[test]
    fn test_batch_run_start() {
        let now = Utc::now();
        let holder = Uuid::now_v7();
        let run = BatchRun::start(holder, 5, now);
        assert_eq!(run.holder_id, holder);
        assert_eq!(run.batch_size, 5);
        assert_eq!(run.status, RunStatus::Processing);
        assert!(run.completed_at.is_none());
    }
}
