//! MEGAPHONE Test Utils
//!
//! Shared helpers for engine and store tests: a scriptable mock delivery
//! provider, a fault-injecting store decorator, a manually advanced clock,
//! and entity fixtures.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use megaphone_core::{
    BatchRun, Campaign, CampaignId, CanonicalPhone, Clock, DeliveryId, DeliveryProvider,
    DeliveryReceipt, DeliveryRecord, HolderId, MegaphoneResult, OutboundMessage,
    ProcessingLockState, ProviderError, RunId, StoreError, TenantId, Timestamp,
};
use megaphone_store::{CampaignStore, CampaignUpdate, DeliveryCounts, DeliveryUpdate, RunUpdate};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

pub use megaphone_store::MemoryStore;

// ============================================================================
// MOCK PROVIDER
// ============================================================================

/// A scriptable delivery provider.
///
/// Outcomes pushed via [`push_outcome`](Self::push_outcome) are consumed in
/// FIFO order; once the script is exhausted every send succeeds. Every send
/// attempt is recorded.
pub struct MockProvider {
    id: String,
    available: AtomicBool,
    fail_all: AtomicBool,
    script: Mutex<VecDeque<Result<DeliveryReceipt, ProviderError>>>,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MockProvider {
    /// A provider that delivers everything.
    pub fn succeeding(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            available: AtomicBool::new(true),
            fail_all: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose every send fails with a provider-level error.
    pub fn failing(id: impl Into<String>) -> Self {
        let provider = Self::succeeding(id);
        provider.fail_all.store(true, Ordering::SeqCst);
        provider
    }

    /// Queue the outcome of the next unscripted send.
    pub fn push_outcome(&self, outcome: Result<DeliveryReceipt, ProviderError>) {
        self.script.lock().expect("script lock").push_back(outcome);
    }

    /// Toggle `can_deliver`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every message this provider was asked to send, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl DeliveryProvider for MockProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn can_deliver(&self, _tenant_id: TenantId) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        _tenant_id: TenantId,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, ProviderError> {
        self.sent.lock().expect("sent lock").push(message.clone());
        if let Some(outcome) = self.script.lock().expect("script lock").pop_front() {
            return outcome;
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable {
                provider: self.id.clone(),
            });
        }
        Ok(DeliveryReceipt {
            provider_id: self.id.clone(),
            message_ref: Some(format!("{}-{}", self.id, Uuid::now_v7())),
        })
    }
}

// ============================================================================
// FLAKY STORE
// ============================================================================

/// A store decorator that fails scripted operations.
///
/// Wraps a [`MemoryStore`] and returns `StoreError::Unavailable` for any
/// operation name registered via [`fail_on`](Self::fail_on); everything else
/// forwards to the inner store. Used to exercise abort paths.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: Mutex<HashSet<&'static str>>,
}

impl FlakyStore {
    /// A decorator around an empty store with nothing failing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named operation fail from now on.
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().expect("failing lock").insert(op);
    }

    /// Stop failing any operation.
    pub fn heal(&self) {
        self.failing.lock().expect("failing lock").clear();
    }

    /// The wrapped store, for direct inspection.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn gate(&self, op: &'static str) -> MegaphoneResult<()> {
        if self.failing.lock().expect("failing lock").contains(op) {
            return Err(StoreError::Unavailable {
                reason: format!("{op} failing"),
            }
            .into());
        }
        Ok(())
    }
}

impl CampaignStore for FlakyStore {
    fn campaign_insert(&self, campaign: &Campaign) -> MegaphoneResult<()> {
        self.gate("campaign_insert")?;
        self.inner.campaign_insert(campaign)
    }

    fn campaign_get(&self, id: CampaignId) -> MegaphoneResult<Option<Campaign>> {
        self.gate("campaign_get")?;
        self.inner.campaign_get(id)
    }

    fn campaign_update(&self, id: CampaignId, update: CampaignUpdate) -> MegaphoneResult<()> {
        self.gate("campaign_update")?;
        self.inner.campaign_update(id, update)
    }

    fn campaign_list_by_parent(&self, parent_id: CampaignId) -> MegaphoneResult<Vec<Campaign>> {
        self.gate("campaign_list_by_parent")?;
        self.inner.campaign_list_by_parent(parent_id)
    }

    fn delivery_insert_batch(&self, records: &[DeliveryRecord]) -> MegaphoneResult<()> {
        self.gate("delivery_insert_batch")?;
        self.inner.delivery_insert_batch(records)
    }

    fn delivery_get(&self, id: DeliveryId) -> MegaphoneResult<Option<DeliveryRecord>> {
        self.gate("delivery_get")?;
        self.inner.delivery_get(id)
    }

    fn delivery_update(&self, id: DeliveryId, update: DeliveryUpdate) -> MegaphoneResult<()> {
        self.gate("delivery_update")?;
        self.inner.delivery_update(id, update)
    }

    fn delivery_pull_due(
        &self,
        now: Timestamp,
        limit: usize,
        max_retries: u32,
    ) -> MegaphoneResult<Vec<DeliveryRecord>> {
        self.gate("delivery_pull_due")?;
        self.inner.delivery_pull_due(now, limit, max_retries)
    }

    fn delivery_counts(&self, campaign_id: CampaignId) -> MegaphoneResult<DeliveryCounts> {
        self.gate("delivery_counts")?;
        self.inner.delivery_counts(campaign_id)
    }

    fn delivery_reclaim_stuck(
        &self,
        now: Timestamp,
        stuck_after: Duration,
    ) -> MegaphoneResult<usize> {
        self.gate("delivery_reclaim_stuck")?;
        self.inner.delivery_reclaim_stuck(now, stuck_after)
    }

    fn delivery_skip_remaining(
        &self,
        campaign_id: CampaignId,
        now: Timestamp,
    ) -> MegaphoneResult<usize> {
        self.gate("delivery_skip_remaining")?;
        self.inner.delivery_skip_remaining(campaign_id, now)
    }

    fn lock_try_acquire(
        &self,
        holder_id: HolderId,
        now: Timestamp,
        stale_after: Duration,
    ) -> MegaphoneResult<bool> {
        self.gate("lock_try_acquire")?;
        self.inner.lock_try_acquire(holder_id, now, stale_after)
    }

    fn lock_release(&self, holder_id: HolderId) -> MegaphoneResult<()> {
        self.gate("lock_release")?;
        self.inner.lock_release(holder_id)
    }

    fn lock_heartbeat(&self, holder_id: HolderId, now: Timestamp) -> MegaphoneResult<()> {
        self.gate("lock_heartbeat")?;
        self.inner.lock_heartbeat(holder_id, now)
    }

    fn lock_state(&self) -> MegaphoneResult<ProcessingLockState> {
        self.gate("lock_state")?;
        self.inner.lock_state()
    }

    fn run_insert(&self, run: &BatchRun) -> MegaphoneResult<()> {
        self.gate("run_insert")?;
        self.inner.run_insert(run)
    }

    fn run_update(&self, id: RunId, update: RunUpdate) -> MegaphoneResult<()> {
        self.gate("run_update")?;
        self.inner.run_update(id, update)
    }

    fn run_latest_completed_at(&self) -> MegaphoneResult<Option<Timestamp>> {
        self.gate("run_latest_completed_at")?;
        self.inner.run_latest_completed_at()
    }

    fn optout_add(&self, phone: &CanonicalPhone) -> MegaphoneResult<()> {
        self.gate("optout_add")?;
        self.inner.optout_add(phone)
    }

    fn optout_remove(&self, phone: &CanonicalPhone) -> MegaphoneResult<bool> {
        self.gate("optout_remove")?;
        self.inner.optout_remove(phone)
    }

    fn optout_contains(&self, phone: &CanonicalPhone) -> MegaphoneResult<bool> {
        self.gate("optout_contains")?;
        self.inner.optout_contains(phone)
    }

    fn daily_sent(&self, tenant_id: TenantId, day: NaiveDate) -> MegaphoneResult<u32> {
        self.gate("daily_sent")?;
        self.inner.daily_sent(tenant_id, day)
    }

    fn daily_sent_increment(&self, tenant_id: TenantId, day: NaiveDate) -> MegaphoneResult<u32> {
        self.gate("daily_sent_increment")?;
        self.inner.daily_sent_increment(tenant_id, day)
    }
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Start at the given instant.
    pub fn starting_at(now: Timestamp) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Advance by a chrono duration.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: Timestamp) {
        *self.now.lock().expect("clock lock") = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().expect("clock lock")
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A canonical Indian mobile number, unique per `seq` for 0..=9999.
pub fn phone(seq: usize) -> CanonicalPhone {
    CanonicalPhone::new(format!("91987654{seq:04}"))
}

/// A single-day campaign scheduled at `scheduled_at`.
pub fn campaign(tenant_id: TenantId, scheduled_at: Timestamp) -> Campaign {
    Campaign::new(
        tenant_id,
        "Test Broadcast",
        "Hello from {{phone}}!",
        None,
        0,
        scheduled_at,
        scheduled_at,
    )
}

/// Pending delivery records for a campaign, sequence numbers dense from 1.
pub fn delivery_records(campaign: &Campaign, count: usize) -> Vec<DeliveryRecord> {
    (0..count)
        .map(|i| {
            DeliveryRecord::new(
                campaign.campaign_id,
                campaign.tenant_id,
                phone(i),
                campaign.scheduled_at,
                i as i32 + 1,
                campaign.created_at,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_script_then_success() {
        let provider = MockProvider::succeeding("session");
        provider.push_outcome(Err(ProviderError::Timeout {
            provider: "session".to_string(),
        }));

        let message = OutboundMessage::text(phone(0), "hi");
        let tenant = Uuid::now_v7();

        assert!(provider.send(tenant, &message).await.is_err());
        assert!(provider.send(tenant, &message).await.is_ok());
        assert_eq!(provider.sent().len(), 2);
    }

    #[test]
    fn test_flaky_store_fails_only_scripted_operations() {
        let store = FlakyStore::new();
        let tenant = Uuid::now_v7();
        let day = Utc::now().date_naive();

        store.fail_on("daily_sent_increment");
        assert!(store.daily_sent(tenant, day).is_ok());
        assert!(store.daily_sent_increment(tenant, day).is_err());

        store.heal();
        assert_eq!(store.daily_sent_increment(tenant, day).unwrap(), 1);
        assert_eq!(store.inner().run_count(), 0);
    }

    #[test]
    fn test_manual_clock_advances_only_when_told() {
        let clock = ManualClock::default();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }
}
