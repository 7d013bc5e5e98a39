//! MEGAPHONE Store - Campaign Store Trait and In-Memory Implementation
//!
//! Defines the persistence abstraction for campaigns, delivery records, the
//! singleton processing lock, the batch run log, the opt-out set, and the
//! per-tenant daily-sent counters. `MemoryStore` is the reference
//! implementation; a SQL-backed implementation can supply the same trait.

use chrono::NaiveDate;
use megaphone_core::{
    BatchRun, Campaign, CampaignId, CampaignStatus, CanonicalPhone, DeliveryId, DeliveryRecord,
    DeliveryStatus, EntityType, HolderId, MegaphoneError, MegaphoneResult, ProcessingLockState,
    RunId, RunStatus, StoreError, TenantId, Timestamp,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Update payload for campaigns.
#[derive(Debug, Clone, Default)]
pub struct CampaignUpdate {
    /// New status
    pub status: Option<CampaignStatus>,
}

/// Update payload for delivery records.
#[derive(Debug, Clone, Default)]
pub struct DeliveryUpdate {
    /// New status
    pub status: Option<DeliveryStatus>,
    /// New retry count
    pub retry_count: Option<i32>,
    /// Last error message
    pub last_error: Option<String>,
    /// Timestamp of the successful send
    pub sent_at: Option<Timestamp>,
    /// Rescheduled due time (retry backoff)
    pub scheduled_at: Option<Timestamp>,
}

/// Update payload for batch run log rows.
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    /// Completion timestamp
    pub completed_at: Option<Timestamp>,
    /// Count of successful sends
    pub sent_count: Option<i32>,
    /// Count of failed sends
    pub failed_count: Option<i32>,
    /// New run status
    pub status: Option<RunStatus>,
}

/// Per-status delivery counts for one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCounts {
    pub pending: usize,
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DeliveryCounts {
    /// Total records across all statuses.
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.sent + self.failed + self.skipped
    }

    /// Whether every record has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }
}

// ============================================================================
// CAMPAIGN STORE TRAIT
// ============================================================================

/// Persistence trait for the broadcast engine.
///
/// All mutations are scoped to a single delivery record or the singleton
/// lock/log rows; no cross-record transaction is required.
pub trait CampaignStore: Send + Sync {
    // === Campaign Operations ===

    /// Insert a new campaign.
    fn campaign_insert(&self, campaign: &Campaign) -> MegaphoneResult<()>;

    /// Get a campaign by ID.
    fn campaign_get(&self, id: CampaignId) -> MegaphoneResult<Option<Campaign>>;

    /// Update a campaign.
    fn campaign_update(&self, id: CampaignId, update: CampaignUpdate) -> MegaphoneResult<()>;

    /// List the sub-campaigns of one logical broadcast, ordered by day number.
    fn campaign_list_by_parent(&self, parent_id: CampaignId) -> MegaphoneResult<Vec<Campaign>>;

    // === Delivery Record Operations ===

    /// Insert a batch of delivery records (one per recipient).
    fn delivery_insert_batch(&self, records: &[DeliveryRecord]) -> MegaphoneResult<()>;

    /// Get a delivery record by ID.
    fn delivery_get(&self, id: DeliveryId) -> MegaphoneResult<Option<DeliveryRecord>>;

    /// Update a delivery record.
    fn delivery_update(&self, id: DeliveryId, update: DeliveryUpdate) -> MegaphoneResult<()>;

    /// Pull up to `limit` due pending records, ordered by
    /// `(scheduled_at, sequence_number)` ascending. Records of cancelled
    /// campaigns and records at the retry ceiling are excluded.
    fn delivery_pull_due(
        &self,
        now: Timestamp,
        limit: usize,
        max_retries: u32,
    ) -> MegaphoneResult<Vec<DeliveryRecord>>;

    /// Per-status counts for one campaign.
    fn delivery_counts(&self, campaign_id: CampaignId) -> MegaphoneResult<DeliveryCounts>;

    /// Reset records stuck in `processing` longer than `stuck_after` back to
    /// `pending`, without consuming a retry. Returns the number reclaimed.
    fn delivery_reclaim_stuck(
        &self,
        now: Timestamp,
        stuck_after: Duration,
    ) -> MegaphoneResult<usize>;

    /// Mark all non-terminal records of a campaign `skipped` (cancellation).
    /// Returns the number of records skipped.
    fn delivery_skip_remaining(
        &self,
        campaign_id: CampaignId,
        now: Timestamp,
    ) -> MegaphoneResult<usize>;

    // === Processing Lock Operations ===

    /// Atomically acquire the singleton processing lock.
    ///
    /// Grants when the lock is free, or held but stale (heartbeat older than
    /// `stale_after`). Returns false without modifying state when another
    /// run legitimately holds it.
    fn lock_try_acquire(
        &self,
        holder_id: HolderId,
        now: Timestamp,
        stale_after: Duration,
    ) -> MegaphoneResult<bool>;

    /// Release the lock, only if `holder_id` is the current holder. A stale
    /// release from a superseded run must not clobber a newer holder.
    fn lock_release(&self, holder_id: HolderId) -> MegaphoneResult<()>;

    /// Refresh the holder's heartbeat so long batches are not reclaimed.
    fn lock_heartbeat(&self, holder_id: HolderId, now: Timestamp) -> MegaphoneResult<()>;

    /// Read the current lock state.
    fn lock_state(&self) -> MegaphoneResult<ProcessingLockState>;

    // === Batch Run Log Operations ===

    /// Insert a run log row.
    fn run_insert(&self, run: &BatchRun) -> MegaphoneResult<()>;

    /// Update a run log row.
    fn run_update(&self, id: RunId, update: RunUpdate) -> MegaphoneResult<()>;

    /// `completed_at` of the most recently completed run, if any.
    /// This is the only input the cooldown gate needs.
    fn run_latest_completed_at(&self) -> MegaphoneResult<Option<Timestamp>>;

    // === Opt-Out Set Operations ===

    /// Add a canonical phone to the opt-out set.
    fn optout_add(&self, phone: &CanonicalPhone) -> MegaphoneResult<()>;

    /// Remove a phone from the opt-out set. Returns whether it was present.
    fn optout_remove(&self, phone: &CanonicalPhone) -> MegaphoneResult<bool>;

    /// Check opt-out membership for an exact canonical key.
    /// Dual-form matching (with/without country code) is the normalizer's
    /// concern; the store only answers exact lookups.
    fn optout_contains(&self, phone: &CanonicalPhone) -> MegaphoneResult<bool>;

    // === Daily Quota Accounting ===

    /// Messages sent by a tenant on a UTC day.
    fn daily_sent(&self, tenant_id: TenantId, day: NaiveDate) -> MegaphoneResult<u32>;

    /// Increment the tenant's daily-sent counter. Returns the new count.
    fn daily_sent_increment(&self, tenant_id: TenantId, day: NaiveDate) -> MegaphoneResult<u32>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory campaign store backed by `RwLock`ed maps.
///
/// Poisoned interior locks surface as `StoreError::LockPoisoned` rather than
/// panicking; callers decide whether a store failure aborts the run.
#[derive(Debug, Default)]
pub struct MemoryStore {
    campaigns: Arc<RwLock<HashMap<CampaignId, Campaign>>>,
    deliveries: Arc<RwLock<HashMap<DeliveryId, DeliveryRecord>>>,
    lock: Arc<RwLock<ProcessingLockState>>,
    runs: Arc<RwLock<HashMap<RunId, BatchRun>>>,
    optouts: Arc<RwLock<HashSet<String>>>,
    daily_sent: Arc<RwLock<HashMap<(TenantId, NaiveDate), u32>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        if let Ok(mut campaigns) = self.campaigns.write() {
            campaigns.clear();
        }
        if let Ok(mut deliveries) = self.deliveries.write() {
            deliveries.clear();
        }
        if let Ok(mut lock) = self.lock.write() {
            *lock = ProcessingLockState::idle();
        }
        if let Ok(mut runs) = self.runs.write() {
            runs.clear();
        }
        if let Ok(mut optouts) = self.optouts.write() {
            optouts.clear();
        }
        if let Ok(mut daily) = self.daily_sent.write() {
            daily.clear();
        }
    }

    /// Count of stored campaigns.
    pub fn campaign_count(&self) -> usize {
        self.campaigns.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Count of stored delivery records.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Count of run log rows.
    pub fn run_count(&self) -> usize {
        self.runs.read().map(|r| r.len()).unwrap_or(0)
    }

    /// All run log rows, ordered by start time.
    pub fn runs(&self) -> Vec<BatchRun> {
        let mut runs: Vec<BatchRun> = self
            .runs
            .read()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    fn stale_after_chrono(stale_after: Duration) -> chrono::Duration {
        chrono::Duration::from_std(stale_after)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX))
    }
}

impl CampaignStore for MemoryStore {
    // === Campaign Operations ===

    fn campaign_insert(&self, campaign: &Campaign) -> MegaphoneResult<()> {
        let mut campaigns = self
            .campaigns
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        if campaigns.contains_key(&campaign.campaign_id) {
            return Err(MegaphoneError::Store(StoreError::InsertFailed {
                entity_type: EntityType::Campaign,
                reason: "already exists".to_string(),
            }));
        }
        campaigns.insert(campaign.campaign_id, campaign.clone());
        Ok(())
    }

    fn campaign_get(&self, id: CampaignId) -> MegaphoneResult<Option<Campaign>> {
        let campaigns = self.campaigns.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(campaigns.get(&id).cloned())
    }

    fn campaign_update(&self, id: CampaignId, update: CampaignUpdate) -> MegaphoneResult<()> {
        let mut campaigns = self
            .campaigns
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let campaign = campaigns
            .get_mut(&id)
            .ok_or(MegaphoneError::Store(StoreError::NotFound {
                entity_type: EntityType::Campaign,
                id,
            }))?;

        if let Some(status) = update.status {
            campaign.status = status;
        }
        campaign.updated_at = chrono::Utc::now();

        Ok(())
    }

    fn campaign_list_by_parent(&self, parent_id: CampaignId) -> MegaphoneResult<Vec<Campaign>> {
        let campaigns = self.campaigns.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut result: Vec<Campaign> = campaigns
            .values()
            .filter(|c| c.parent_campaign_id == Some(parent_id) || c.campaign_id == parent_id)
            .cloned()
            .collect();
        result.sort_by_key(|c| c.day_number);
        Ok(result)
    }

    // === Delivery Record Operations ===

    fn delivery_insert_batch(&self, records: &[DeliveryRecord]) -> MegaphoneResult<()> {
        let mut deliveries = self
            .deliveries
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        for record in records {
            if deliveries.contains_key(&record.delivery_id) {
                return Err(MegaphoneError::Store(StoreError::InsertFailed {
                    entity_type: EntityType::Delivery,
                    reason: "already exists".to_string(),
                }));
            }
        }
        for record in records {
            deliveries.insert(record.delivery_id, record.clone());
        }
        Ok(())
    }

    fn delivery_get(&self, id: DeliveryId) -> MegaphoneResult<Option<DeliveryRecord>> {
        let deliveries = self.deliveries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(deliveries.get(&id).cloned())
    }

    fn delivery_update(&self, id: DeliveryId, update: DeliveryUpdate) -> MegaphoneResult<()> {
        let mut deliveries = self
            .deliveries
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let record = deliveries
            .get_mut(&id)
            .ok_or(MegaphoneError::Store(StoreError::NotFound {
                entity_type: EntityType::Delivery,
                id,
            }))?;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(retry_count) = update.retry_count {
            record.retry_count = retry_count;
        }
        if let Some(last_error) = update.last_error {
            record.last_error = Some(last_error);
        }
        if let Some(sent_at) = update.sent_at {
            record.sent_at = Some(sent_at);
        }
        if let Some(scheduled_at) = update.scheduled_at {
            record.scheduled_at = scheduled_at;
        }
        record.updated_at = chrono::Utc::now();

        Ok(())
    }

    fn delivery_pull_due(
        &self,
        now: Timestamp,
        limit: usize,
        max_retries: u32,
    ) -> MegaphoneResult<Vec<DeliveryRecord>> {
        let deliveries = self.deliveries.read().map_err(|_| StoreError::LockPoisoned)?;
        let campaigns = self.campaigns.read().map_err(|_| StoreError::LockPoisoned)?;

        let mut due: Vec<DeliveryRecord> = deliveries
            .values()
            .filter(|d| {
                d.status == DeliveryStatus::Pending
                    && d.scheduled_at <= now
                    && d.retry_count < max_retries as i32
                    && campaigns
                        .get(&d.campaign_id)
                        .map(|c| c.status != CampaignStatus::Cancelled)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        // Load-bearing ordering: FIFO by campaign intent, retried records
        // interleave by their rescheduled due time.
        due.sort_by_key(|d| (d.scheduled_at, d.sequence_number));
        due.truncate(limit);
        Ok(due)
    }

    fn delivery_counts(&self, campaign_id: CampaignId) -> MegaphoneResult<DeliveryCounts> {
        let deliveries = self.deliveries.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut counts = DeliveryCounts::default();
        for record in deliveries.values().filter(|d| d.campaign_id == campaign_id) {
            match record.status {
                DeliveryStatus::Pending => counts.pending += 1,
                DeliveryStatus::Processing => counts.processing += 1,
                DeliveryStatus::Sent => counts.sent += 1,
                DeliveryStatus::Failed => counts.failed += 1,
                DeliveryStatus::Skipped => counts.skipped += 1,
            }
        }
        Ok(counts)
    }

    fn delivery_reclaim_stuck(
        &self,
        now: Timestamp,
        stuck_after: Duration,
    ) -> MegaphoneResult<usize> {
        let threshold = Self::stale_after_chrono(stuck_after);
        let mut deliveries = self
            .deliveries
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let mut reclaimed = 0;
        for record in deliveries.values_mut() {
            if record.status == DeliveryStatus::Processing && now - record.updated_at > threshold {
                record.status = DeliveryStatus::Pending;
                record.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    fn delivery_skip_remaining(
        &self,
        campaign_id: CampaignId,
        now: Timestamp,
    ) -> MegaphoneResult<usize> {
        let mut deliveries = self
            .deliveries
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let mut skipped = 0;
        for record in deliveries.values_mut() {
            if record.campaign_id == campaign_id && !record.status.is_terminal() {
                record.status = DeliveryStatus::Skipped;
                record.last_error = Some("campaign cancelled".to_string());
                record.updated_at = now;
                skipped += 1;
            }
        }
        Ok(skipped)
    }

    // === Processing Lock Operations ===

    fn lock_try_acquire(
        &self,
        holder_id: HolderId,
        now: Timestamp,
        stale_after: Duration,
    ) -> MegaphoneResult<bool> {
        let mut lock = self.lock.write().map_err(|_| StoreError::LockPoisoned)?;
        if lock.is_held(now, Self::stale_after_chrono(stale_after)) {
            return Ok(false);
        }
        *lock = ProcessingLockState {
            is_processing: true,
            holder_id: Some(holder_id),
            acquired_at: Some(now),
            last_heartbeat: Some(now),
        };
        Ok(true)
    }

    fn lock_release(&self, holder_id: HolderId) -> MegaphoneResult<()> {
        let mut lock = self.lock.write().map_err(|_| StoreError::LockPoisoned)?;
        if lock.holder_id == Some(holder_id) {
            *lock = ProcessingLockState::idle();
        }
        Ok(())
    }

    fn lock_heartbeat(&self, holder_id: HolderId, now: Timestamp) -> MegaphoneResult<()> {
        let mut lock = self.lock.write().map_err(|_| StoreError::LockPoisoned)?;
        if lock.holder_id == Some(holder_id) {
            lock.last_heartbeat = Some(now);
        }
        Ok(())
    }

    fn lock_state(&self) -> MegaphoneResult<ProcessingLockState> {
        let lock = self.lock.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(lock.clone())
    }

    // === Batch Run Log Operations ===

    fn run_insert(&self, run: &BatchRun) -> MegaphoneResult<()> {
        let mut runs = self.runs.write().map_err(|_| StoreError::LockPoisoned)?;
        if runs.contains_key(&run.run_id) {
            return Err(MegaphoneError::Store(StoreError::InsertFailed {
                entity_type: EntityType::BatchRun,
                reason: "already exists".to_string(),
            }));
        }
        runs.insert(run.run_id, run.clone());
        Ok(())
    }

    fn run_update(&self, id: RunId, update: RunUpdate) -> MegaphoneResult<()> {
        let mut runs = self.runs.write().map_err(|_| StoreError::LockPoisoned)?;
        let run = runs
            .get_mut(&id)
            .ok_or(MegaphoneError::Store(StoreError::NotFound {
                entity_type: EntityType::BatchRun,
                id,
            }))?;

        if let Some(completed_at) = update.completed_at {
            run.completed_at = Some(completed_at);
        }
        if let Some(sent_count) = update.sent_count {
            run.sent_count = sent_count;
        }
        if let Some(failed_count) = update.failed_count {
            run.failed_count = failed_count;
        }
        if let Some(status) = update.status {
            run.status = status;
        }

        Ok(())
    }

    fn run_latest_completed_at(&self) -> MegaphoneResult<Option<Timestamp>> {
        let runs = self.runs.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(runs.values().filter_map(|r| r.completed_at).max())
    }

    // === Opt-Out Set Operations ===

    fn optout_add(&self, phone: &CanonicalPhone) -> MegaphoneResult<()> {
        let mut optouts = self.optouts.write().map_err(|_| StoreError::LockPoisoned)?;
        optouts.insert(phone.as_str().to_string());
        Ok(())
    }

    fn optout_remove(&self, phone: &CanonicalPhone) -> MegaphoneResult<bool> {
        let mut optouts = self.optouts.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(optouts.remove(phone.as_str()))
    }

    fn optout_contains(&self, phone: &CanonicalPhone) -> MegaphoneResult<bool> {
        let optouts = self.optouts.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(optouts.contains(phone.as_str()))
    }

    // === Daily Quota Accounting ===

    fn daily_sent(&self, tenant_id: TenantId, day: NaiveDate) -> MegaphoneResult<u32> {
        let daily = self.daily_sent.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(daily.get(&(tenant_id, day)).copied().unwrap_or(0))
    }

    fn daily_sent_increment(&self, tenant_id: TenantId, day: NaiveDate) -> MegaphoneResult<u32> {
        let mut daily = self
            .daily_sent
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let counter = daily.entry((tenant_id, day)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

// =============================================================================
// TESTS
// =============================================================================
