//! Campaign service
//!
//! Intake of new broadcasts: normalize recipients, drop opted-out numbers,
//! split across days against the tenant's quota, and persist campaigns plus
//! one delivery record per recipient. Also cancellation and progress.

use crate::{normalizer, splitter};
use megaphone_core::{
    BroadcastConfig, Campaign, CampaignId, CampaignStatus, CanonicalPhone, Clock, DeliveryRecord,
    EngineError, MegaphoneResult, SystemClock, TenantId, TenantOverridesMap, Timestamp,
};
use megaphone_store::{CampaignStore, CampaignUpdate, DeliveryCounts};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// A broadcast request as submitted by the intake surface.
///
/// Recipients arrive as raw JSON values: either plain strings or objects
/// with a `phone` (or `number`) field, in whatever formatting the tenant's
/// upload used.
#[derive(Debug, Clone)]
pub struct CampaignRequest {
    pub tenant_id: TenantId,
    pub campaign_name: String,
    pub message_text: String,
    pub recipients: Vec<serde_json::Value>,
    /// When the first day-bucket should go out. `None` means immediately.
    pub schedule_time: Option<Timestamp>,
    pub media_ref: Option<String>,
}

/// One scheduled day of an accepted broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySchedule {
    pub campaign_id: CampaignId,
    pub name: String,
    pub day_number: i32,
    pub recipient_count: usize,
    pub send_at: Timestamp,
}

/// What intake accepted and rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSummary {
    /// Id of the day-1 campaign; multi-day siblings reference it as parent.
    pub parent_campaign_id: CampaignId,
    pub days: Vec<DaySchedule>,
    pub accepted: usize,
    pub rejected_invalid: usize,
    pub rejected_opted_out: usize,
}

/// Per-campaign progress snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignProgress {
    pub campaign_id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    pub counts: DeliveryCounts,
}

/// Campaign intake, cancellation and progress queries.
pub struct CampaignService {
    store: Arc<dyn CampaignStore>,
    clock: Arc<dyn Clock>,
    config: BroadcastConfig,
    overrides: TenantOverridesMap,
    /// Numbers exempt from opt-out filtering (e.g. the tenant's own).
    bypass: Vec<CanonicalPhone>,
}

impl CampaignService {
    /// Create a service with the wall clock and no bypass numbers.
    pub fn new(store: Arc<dyn CampaignStore>, config: BroadcastConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
            overrides: TenantOverridesMap::new(),
            bypass: Vec::new(),
        }
    }

    /// Replace the clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Install per-tenant configuration overrides.
    pub fn with_overrides(mut self, overrides: TenantOverridesMap) -> Self {
        self.overrides = overrides;
        self
    }

    /// Numbers never filtered by the opt-out gate.
    pub fn with_bypass(mut self, bypass: Vec<CanonicalPhone>) -> Self {
        self.bypass = bypass;
        self
    }

    /// Accept a broadcast: normalize, filter, split and persist.
    ///
    /// Duplicate numbers are kept; the platform treats a repeated upload row
    /// as intent to message twice. Rejections are counted, not fatal, unless
    /// nothing valid remains.
    pub fn create_campaign(&self, request: &CampaignRequest) -> MegaphoneResult<ScheduleSummary> {
        let now = self.clock.now();
        let tenant_config = self.config.for_tenant(self.overrides.get(&request.tenant_id));
        let country_code = &tenant_config.default_country_code;

        let mut normalized = Vec::with_capacity(request.recipients.len());
        let mut rejected_invalid = 0;
        for raw in &request.recipients {
            match normalizer::normalize_value(raw, country_code) {
                Ok(phone) => normalized.push(phone),
                Err(err) => {
                    warn!(error = %err, "recipient rejected at intake");
                    rejected_invalid += 1;
                }
            }
        }

        let opted_out_keys = self.opted_out_keys(&normalized, country_code)?;
        let filtered =
            normalizer::filter_opted_out(normalized, &self.bypass, country_code, &opted_out_keys);
        let rejected_opted_out = filtered.skipped.len();

        if filtered.allowed.is_empty() {
            return Err(EngineError::NoValidRecipients {
                invalid: rejected_invalid,
                opted_out: rejected_opted_out,
            }
            .into());
        }

        let start_at = request.schedule_time.unwrap_or(now).max(now);
        let already_sent_today = self
            .store
            .daily_sent(request.tenant_id, start_at.date_naive())?;
        let buckets = splitter::split(
            filtered.allowed,
            tenant_config.daily_quota,
            already_sent_today,
            start_at,
            tenant_config.next_day_send_hour,
        );

        let summary = self.persist_buckets(request, buckets, now)?;
        info!(
            tenant_id = %request.tenant_id,
            parent_campaign_id = %summary.parent_campaign_id,
            accepted = summary.accepted,
            days = summary.days.len(),
            rejected_invalid,
            rejected_opted_out,
            "campaign scheduled"
        );
        Ok(ScheduleSummary {
            rejected_invalid,
            rejected_opted_out,
            ..summary
        })
    }

    /// Cancel a campaign and skip its remaining deliveries.
    ///
    /// Only `scheduled` and `processing` campaigns can be cancelled; records
    /// already sent stay sent. Returns the number of deliveries skipped.
    pub fn cancel_campaign(&self, campaign_id: CampaignId) -> MegaphoneResult<usize> {
        let now = self.clock.now();
        let campaign = self
            .store
            .campaign_get(campaign_id)?
            .ok_or(megaphone_core::StoreError::NotFound {
                entity_type: megaphone_core::EntityType::Campaign,
                id: campaign_id,
            })?;

        match campaign.status {
            CampaignStatus::Scheduled | CampaignStatus::Processing => {}
            status => {
                return Err(EngineError::NotCancellable {
                    campaign_id,
                    status: status.to_string(),
                }
                .into());
            }
        }

        self.store.campaign_update(
            campaign_id,
            CampaignUpdate {
                status: Some(CampaignStatus::Cancelled),
            },
        )?;
        let skipped = self.store.delivery_skip_remaining(campaign_id, now)?;
        info!(%campaign_id, skipped, "campaign cancelled");
        Ok(skipped)
    }

    /// Progress of one campaign.
    pub fn campaign_progress(&self, campaign_id: CampaignId) -> MegaphoneResult<CampaignProgress> {
        let campaign = self
            .store
            .campaign_get(campaign_id)?
            .ok_or(megaphone_core::StoreError::NotFound {
                entity_type: megaphone_core::EntityType::Campaign,
                id: campaign_id,
            })?;
        let counts = self.store.delivery_counts(campaign_id)?;
        Ok(CampaignProgress {
            campaign_id,
            name: campaign.display_name(),
            status: campaign.status,
            counts,
        })
    }

    /// Progress of every day-bucket of a logical broadcast.
    pub fn broadcast_progress(
        &self,
        parent_campaign_id: CampaignId,
    ) -> MegaphoneResult<Vec<CampaignProgress>> {
        self.store
            .campaign_list_by_parent(parent_campaign_id)?
            .into_iter()
            .map(|campaign| {
                let counts = self.store.delivery_counts(campaign.campaign_id)?;
                Ok(CampaignProgress {
                    campaign_id: campaign.campaign_id,
                    name: campaign.display_name(),
                    status: campaign.status,
                    counts,
                })
            })
            .collect()
    }

    /// Look up the opt-out entries matching this batch, in both stored
    /// forms. Store errors propagate; an unreadable opt-out set must never
    /// be treated as empty.
    fn opted_out_keys(
        &self,
        recipients: &[CanonicalPhone],
        country_code: &str,
    ) -> MegaphoneResult<HashSet<String>> {
        let mut keys = HashSet::new();
        for recipient in recipients {
            for key in normalizer::opt_out_keys(recipient, country_code) {
                if keys.contains(&key) {
                    continue;
                }
                if self.store.optout_contains(&CanonicalPhone::new(key.clone()))? {
                    keys.insert(key);
                }
            }
        }
        Ok(keys)
    }

    fn persist_buckets(
        &self,
        request: &CampaignRequest,
        buckets: Vec<splitter::DayBucket>,
        now: Timestamp,
    ) -> MegaphoneResult<ScheduleSummary> {
        let mut parent_campaign_id: Option<CampaignId> = None;
        let mut days = Vec::with_capacity(buckets.len());
        let mut accepted = 0;

        for bucket in buckets {
            let mut campaign = Campaign::new(
                request.tenant_id,
                request.campaign_name.clone(),
                request.message_text.clone(),
                request.media_ref.clone(),
                bucket.recipients.len() as i32,
                bucket.send_at,
                now,
            );
            campaign.day_number = bucket.day_number;
            campaign.total_days = bucket.total_days;
            campaign.parent_campaign_id = parent_campaign_id;
            self.store.campaign_insert(&campaign)?;

            // Sequence numbers are dense from 1 within each day-bucket; the
            // processor orders by (scheduled_at, sequence_number).
            let records: Vec<DeliveryRecord> = bucket
                .recipients
                .iter()
                .enumerate()
                .map(|(index, recipient)| {
                    DeliveryRecord::new(
                        campaign.campaign_id,
                        request.tenant_id,
                        recipient.clone(),
                        bucket.send_at,
                        index as i32 + 1,
                        now,
                    )
                })
                .collect();
            self.store.delivery_insert_batch(&records)?;

            accepted += records.len();
            parent_campaign_id.get_or_insert(campaign.campaign_id);
            days.push(DaySchedule {
                campaign_id: campaign.campaign_id,
                name: campaign.display_name(),
                day_number: campaign.day_number,
                recipient_count: records.len(),
                send_at: bucket.send_at,
            });
        }

        Ok(ScheduleSummary {
            parent_campaign_id: parent_campaign_id
                .unwrap_or_else(megaphone_core::new_entity_id),
            days,
            accepted,
            rejected_invalid: 0,
            rejected_opted_out: 0,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
