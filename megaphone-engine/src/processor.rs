//! Batch processor
//!
//! One `process_tick` call is one processing run: acquire the singleton
//! lock, pass the cooldown gate, sweep stuck records, pull one due batch,
//! and deliver it sequentially with humanized delays. Messages are never
//! sent in parallel.

use crate::{cooldown, lock, normalizer, providers::ProviderChain, wait::TokioWaiter};
use megaphone_core::{
    BatchRun, BroadcastConfig, Campaign, CampaignId, CampaignStatus, Clock, DeliveryRecord,
    DeliveryStatus, EngineError, HolderId, MegaphoneResult, OutboundMessage, RunStatus,
    SystemClock, TenantOverridesMap, Timestamp, Waiter, new_entity_id,
};
use megaphone_store::{CampaignStore, CampaignUpdate, DeliveryUpdate, RunUpdate};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a tick did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another run holds the processing lock.
    Locked,
    /// The cooldown gate is still closed.
    Cooldown { remaining: Duration },
}

/// Result of one processing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Records pulled and worked this run.
    pub processed: usize,
    /// Records delivered.
    pub sent: usize,
    /// Records terminally failed.
    pub failed: usize,
    /// Records skipped (opt-out recheck).
    pub skipped: usize,
    /// Records rescheduled for retry.
    pub retried: usize,
    /// Set when the whole run was skipped before pulling a batch.
    pub skip: Option<SkipReason>,
    /// Whether more due records remain after this run.
    pub more_due: bool,
    /// Earliest time the next batch can go out, when more work remains.
    pub next_batch_at: Option<Timestamp>,
}

impl TickOutcome {
    fn skipped_run(reason: SkipReason) -> Self {
        Self {
            skip: Some(reason),
            ..Default::default()
        }
    }
}

/// The broadcast batch processor.
///
/// Clock and waiter are injected; production code uses the wall clock and
/// the tokio timer.
pub struct BatchProcessor {
    store: Arc<dyn CampaignStore>,
    providers: ProviderChain,
    clock: Arc<dyn Clock>,
    waiter: Arc<dyn Waiter>,
    config: BroadcastConfig,
    overrides: TenantOverridesMap,
}

impl BatchProcessor {
    /// Create a processor with the wall clock and tokio timer.
    pub fn new(
        store: Arc<dyn CampaignStore>,
        providers: ProviderChain,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            store,
            providers,
            clock: Arc::new(SystemClock),
            waiter: Arc::new(TokioWaiter),
            config,
            overrides: TenantOverridesMap::new(),
        }
    }

    /// Replace the clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the waiter (tests, dry runs).
    pub fn with_waiter(mut self, waiter: Arc<dyn Waiter>) -> Self {
        self.waiter = waiter;
        self
    }

    /// Install per-tenant configuration overrides.
    pub fn with_overrides(mut self, overrides: TenantOverridesMap) -> Self {
        self.overrides = overrides;
        self
    }

    /// Run one processing tick.
    ///
    /// Lock acquisition is fail-open; the cooldown gate and the batch loop
    /// propagate store errors. The lock is released on every exit path.
    pub async fn process_tick(&self) -> MegaphoneResult<TickOutcome> {
        if self.providers.is_empty() {
            return Err(EngineError::NoProviderConfigured.into());
        }

        let holder: HolderId = new_entity_id();
        let now = self.clock.now();

        if lock::try_acquire(&*self.store, holder, now, self.config.lock_stale_after)
            == lock::LockAcquire::Held
        {
            debug!("processing lock held by another run, skipping tick");
            return Ok(TickOutcome::skipped_run(SkipReason::Locked));
        }

        let outcome = self.run_locked(holder).await;
        lock::release(&*self.store, holder);
        outcome
    }

    async fn run_locked(&self, holder: HolderId) -> MegaphoneResult<TickOutcome> {
        let now = self.clock.now();

        match cooldown::check(&*self.store, self.config.cooldown, now)? {
            cooldown::CooldownDecision::Proceed => {}
            cooldown::CooldownDecision::Wait { remaining } => {
                debug!(?remaining, "cooldown gate closed, skipping tick");
                return Ok(TickOutcome::skipped_run(SkipReason::Cooldown { remaining }));
            }
        }

        let reclaimed = self
            .store
            .delivery_reclaim_stuck(now, self.config.stuck_after)?;
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed records stuck in processing");
        }

        let batch = self
            .store
            .delivery_pull_due(now, self.config.batch_size, self.pull_retry_ceiling())?;
        if batch.is_empty() {
            // An empty batch leaves no run log row, so it never arms the
            // cooldown gate.
            return Ok(TickOutcome::default());
        }

        let run = BatchRun::start(holder, batch.len() as i32, now);
        self.store.run_insert(&run)?;

        let result = self.process_batch(holder, &batch).await;
        let completed_at = self.clock.now();

        match result {
            Ok(mut outcome) => {
                self.store.run_update(
                    run.run_id,
                    RunUpdate {
                        completed_at: Some(completed_at),
                        sent_count: Some(outcome.sent as i32),
                        failed_count: Some(outcome.failed as i32),
                        status: Some(RunStatus::Completed),
                    },
                )?;
                outcome.more_due = !self
                    .store
                    .delivery_pull_due(completed_at, 1, self.pull_retry_ceiling())?
                    .is_empty();
                if outcome.more_due {
                    outcome.next_batch_at = Some(completed_at + to_chrono(self.config.cooldown));
                }
                info!(
                    processed = outcome.processed,
                    sent = outcome.sent,
                    failed = outcome.failed,
                    skipped = outcome.skipped,
                    retried = outcome.retried,
                    more_due = outcome.more_due,
                    "processing run completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                // The stuck-record sweep of a later run recovers anything
                // left in processing by the aborted batch.
                let _ = self.store.run_update(
                    run.run_id,
                    RunUpdate {
                        completed_at: Some(completed_at),
                        status: Some(RunStatus::Failed),
                        ..Default::default()
                    },
                );
                warn!(error = %err, "processing run aborted");
                Err(err)
            }
        }
    }

    async fn process_batch(
        &self,
        holder: HolderId,
        batch: &[DeliveryRecord],
    ) -> MegaphoneResult<TickOutcome> {
        let mut outcome = TickOutcome {
            processed: batch.len(),
            ..Default::default()
        };
        let mut campaigns: HashMap<CampaignId, Campaign> = HashMap::new();

        for (index, record) in batch.iter().enumerate() {
            let campaign = match self.campaign_for(&mut campaigns, record.campaign_id)? {
                Some(campaign) => campaign,
                None => {
                    warn!(delivery_id = %record.delivery_id, "orphan delivery record, skipping");
                    self.mark_skipped(record, "campaign missing")?;
                    outcome.skipped += 1;
                    continue;
                }
            };
            let tenant_config = self
                .config
                .for_tenant(self.overrides.get(&record.tenant_id));

            // The pull ceiling is the maximum across all tenants; a tenant
            // whose override lowers it can still have over-budget records
            // pulled. They are terminal, not sendable.
            if record.retry_count >= tenant_config.max_retries as i32 {
                self.store.delivery_update(
                    record.delivery_id,
                    DeliveryUpdate {
                        status: Some(DeliveryStatus::Failed),
                        last_error: Some("retry budget exhausted".to_string()),
                        ..Default::default()
                    },
                )?;
                outcome.failed += 1;
                self.settle_campaign(record.campaign_id)?;
                continue;
            }

            self.mark_processing(record, &campaign)?;

            // Opt-outs recorded after intake still win: recheck both stored
            // forms right before the send.
            if self.is_opted_out(record, &tenant_config)? {
                self.mark_skipped(record, "recipient opted out")?;
                outcome.skipped += 1;
                self.settle_campaign(record.campaign_id)?;
                continue;
            }

            let message = build_message(&campaign, record);
            let now = self.clock.now();

            match self.providers.send(record.tenant_id, &message).await {
                Ok(receipt) => {
                    self.store.delivery_update(
                        record.delivery_id,
                        DeliveryUpdate {
                            status: Some(DeliveryStatus::Sent),
                            sent_at: Some(now),
                            ..Default::default()
                        },
                    )?;
                    self.store
                        .daily_sent_increment(record.tenant_id, now.date_naive())?;
                    debug!(
                        delivery_id = %record.delivery_id,
                        provider = %receipt.provider_id,
                        "delivery sent"
                    );
                    outcome.sent += 1;
                }
                Err(err) if err.is_provider_failure() => {
                    let retries = record.retry_count + 1;
                    if retries >= tenant_config.max_retries as i32 {
                        self.store.delivery_update(
                            record.delivery_id,
                            DeliveryUpdate {
                                status: Some(DeliveryStatus::Failed),
                                retry_count: Some(retries),
                                last_error: Some(err.to_string()),
                                ..Default::default()
                            },
                        )?;
                        outcome.failed += 1;
                    } else {
                        let delay = retry_backoff(&tenant_config, retries);
                        self.store.delivery_update(
                            record.delivery_id,
                            DeliveryUpdate {
                                status: Some(DeliveryStatus::Pending),
                                retry_count: Some(retries),
                                last_error: Some(err.to_string()),
                                scheduled_at: Some(now + to_chrono(delay)),
                                ..Default::default()
                            },
                        )?;
                        debug!(
                            delivery_id = %record.delivery_id,
                            retries,
                            ?delay,
                            "delivery rescheduled for retry"
                        );
                        outcome.retried += 1;
                    }
                }
                Err(err) => {
                    // Recipient-level failure. Retrying the same number is
                    // pointless, fail it now regardless of the retry budget.
                    self.store.delivery_update(
                        record.delivery_id,
                        DeliveryUpdate {
                            status: Some(DeliveryStatus::Failed),
                            retry_count: Some(record.retry_count),
                            last_error: Some(err.to_string()),
                            ..Default::default()
                        },
                    )?;
                    outcome.failed += 1;
                }
            }

            lock::heartbeat(&*self.store, holder, self.clock.now());
            self.settle_campaign(record.campaign_id)?;

            if index + 1 < batch.len() {
                self.waiter.wait(message_delay(&tenant_config)).await;
            }
        }

        Ok(outcome)
    }

    /// Retry ceiling used for pulling. A tenant override may raise the
    /// ceiling above the global one; pulling with the global value would
    /// strand such a record as non-terminal once its retry count passes the
    /// global ceiling. Per-tenant enforcement happens per record in the
    /// batch loop.
    fn pull_retry_ceiling(&self) -> u32 {
        self.overrides
            .values()
            .filter_map(|o| o.max_retries)
            .fold(self.config.max_retries, u32::max)
    }

    fn campaign_for(
        &self,
        cache: &mut HashMap<CampaignId, Campaign>,
        campaign_id: CampaignId,
    ) -> MegaphoneResult<Option<Campaign>> {
        if let Some(campaign) = cache.get(&campaign_id) {
            return Ok(Some(campaign.clone()));
        }
        let campaign = self.store.campaign_get(campaign_id)?;
        if let Some(campaign) = &campaign {
            cache.insert(campaign_id, campaign.clone());
        }
        Ok(campaign)
    }

    fn mark_processing(&self, record: &DeliveryRecord, campaign: &Campaign) -> MegaphoneResult<()> {
        self.store.delivery_update(
            record.delivery_id,
            DeliveryUpdate {
                status: Some(DeliveryStatus::Processing),
                ..Default::default()
            },
        )?;
        if campaign.status == CampaignStatus::Scheduled {
            self.store.campaign_update(
                campaign.campaign_id,
                CampaignUpdate {
                    status: Some(CampaignStatus::Processing),
                },
            )?;
        }
        Ok(())
    }

    fn mark_skipped(&self, record: &DeliveryRecord, reason: &str) -> MegaphoneResult<()> {
        self.store.delivery_update(
            record.delivery_id,
            DeliveryUpdate {
                status: Some(DeliveryStatus::Skipped),
                last_error: Some(reason.to_string()),
                ..Default::default()
            },
        )
    }

    fn is_opted_out(
        &self,
        record: &DeliveryRecord,
        tenant_config: &BroadcastConfig,
    ) -> MegaphoneResult<bool> {
        for key in
            normalizer::opt_out_keys(&record.recipient, &tenant_config.default_country_code)
        {
            if self
                .store
                .optout_contains(&megaphone_core::CanonicalPhone::new(key))?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Roll the campaign status forward once every record is terminal.
    fn settle_campaign(&self, campaign_id: CampaignId) -> MegaphoneResult<()> {
        let counts = self.store.delivery_counts(campaign_id)?;
        if !counts.is_settled() {
            return Ok(());
        }
        let status = if counts.sent == 0 && counts.failed > 0 {
            CampaignStatus::Failed
        } else {
            CampaignStatus::Completed
        };
        // Cancelled campaigns stay cancelled.
        if let Some(campaign) = self.store.campaign_get(campaign_id)? {
            if campaign.status == CampaignStatus::Cancelled || campaign.status == status {
                return Ok(());
            }
        }
        self.store.campaign_update(
            campaign_id,
            CampaignUpdate {
                status: Some(status),
            },
        )?;
        info!(%campaign_id, %status, "campaign settled");
        Ok(())
    }
}

/// Personalize the template and attach campaign media.
fn build_message(campaign: &Campaign, record: &DeliveryRecord) -> OutboundMessage {
    let text = campaign
        .message_text
        .replace("{{phone}}", record.recipient.as_str());
    let mut message = OutboundMessage::text(record.recipient.clone(), text);
    if let Some(media_ref) = &campaign.media_ref {
        message = message.with_media(media_ref.clone());
    }
    message
}

/// Backoff before retry `retries` (1-based): `base + step * 2^(retries-1)`.
/// The exponent is capped so pathological retry counts cannot overflow.
fn retry_backoff(config: &BroadcastConfig, retries: i32) -> Duration {
    let exponent = (retries - 1).clamp(0, 16) as u32;
    config.backoff_base() + config.retry_backoff_step * 2u32.pow(exponent)
}

/// A humanized delay between consecutive sends.
fn message_delay(config: &BroadcastConfig) -> Duration {
    let min = config.min_message_delay.as_millis() as u64;
    let max = config.max_message_delay.as_millis() as u64;
    if max <= min {
        return config.min_message_delay;
    }
    Duration::from_millis(rand::rng().random_range(min..=max))
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX))
}

// =============================================================================
// TESTS
// =============================================================================
