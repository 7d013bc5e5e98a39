//! End-to-end processing runs against the in-memory store.

use megaphone_core::{
    BroadcastConfig, CampaignStatus, CanonicalPhone, Clock, DeliveryStatus, NoWait, ProviderError,
    RunStatus, TenantOverrides, TenantOverridesMap,
};
use megaphone_engine::{
    BatchProcessor, CampaignRequest, CampaignService, ProviderChain, SkipReason,
};
use megaphone_store::{CampaignStore, MemoryStore};
use megaphone_test_utils::{FlakyStore, ManualClock, MockProvider};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    service: CampaignService,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let service = CampaignService::new(store.clone(), BroadcastConfig::default())
            .with_clock(clock.clone());
        Self { store, clock, service }
    }

    fn processor(&self, chain: ProviderChain) -> BatchProcessor {
        BatchProcessor::new(self.store.clone(), chain, BroadcastConfig::default())
            .with_clock(self.clock.clone())
            .with_waiter(Arc::new(NoWait))
    }

    fn schedule(&self, recipients: Vec<serde_json::Value>) -> megaphone_engine::ScheduleSummary {
        self.schedule_for(Uuid::now_v7(), recipients)
    }

    fn schedule_for(
        &self,
        tenant_id: uuid::Uuid,
        recipients: Vec<serde_json::Value>,
    ) -> megaphone_engine::ScheduleSummary {
        self.service
            .create_campaign(&CampaignRequest {
                tenant_id,
                campaign_name: "Weekend Offer".to_string(),
                message_text: "The offer is live!".to_string(),
                recipients,
                schedule_time: None,
                media_ref: None,
            })
            .expect("campaign accepted")
    }
}

#[tokio::test]
async fn test_empty_queue_leaves_no_run_row() {
    let harness = Harness::new();
    let processor = harness.processor(ProviderChain::new().with(Arc::new(
        MockProvider::succeeding("session"),
    )));

    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.processed, 0);
    assert!(outcome.skip.is_none());
    // No run row means the cooldown gate stays unarmed.
    assert_eq!(harness.store.run_count(), 0);
    assert!(!harness.store.lock_state().unwrap().is_processing);

    let again = processor.process_tick().await.unwrap();
    assert!(again.skip.is_none());
}

#[tokio::test]
async fn test_successful_batch_settles_campaign() {
    let harness = Harness::new();
    let summary = harness.schedule(vec![json!("9876543210"), json!("9876543211")]);

    let provider = Arc::new(MockProvider::succeeding("session"));
    let processor = harness.processor(ProviderChain::new().with(provider.clone()));

    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.sent, 2);
    assert_eq!(outcome.failed, 0);
    assert!(!outcome.more_due);

    let campaign = harness
        .store
        .campaign_get(summary.parent_campaign_id)
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);

    let counts = harness
        .store
        .delivery_counts(summary.parent_campaign_id)
        .unwrap();
    assert_eq!(counts.sent, 2);
    assert!(counts.is_settled());

    assert_eq!(provider.sent().len(), 2);
    assert_eq!(harness.store.run_count(), 1);
    assert!(!harness.store.lock_state().unwrap().is_processing);

    let day = harness.clock.now().date_naive();
    assert_eq!(harness.store.daily_sent(campaign.tenant_id, day).unwrap(), 2);
}

#[tokio::test]
async fn test_provider_failure_mid_batch_falls_back() {
    let harness = Harness::new();
    harness.schedule(vec![
        json!("9876543210"),
        json!("9876543211"),
        json!("9876543212"),
    ]);

    let primary = Arc::new(MockProvider::succeeding("session"));
    // The session channel drops right before the third send.
    primary.push_outcome(Ok(megaphone_core::DeliveryReceipt {
        provider_id: "session".to_string(),
        message_ref: None,
    }));
    primary.push_outcome(Ok(megaphone_core::DeliveryReceipt {
        provider_id: "session".to_string(),
        message_ref: None,
    }));
    primary.push_outcome(Err(ProviderError::Timeout {
        provider: "session".to_string(),
    }));
    let fallback = Arc::new(MockProvider::succeeding("paid-api"));

    let processor = harness.processor(
        ProviderChain::new()
            .with(primary.clone())
            .with(fallback.clone()),
    );

    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.sent, 3);
    assert_eq!(outcome.failed, 0);
    assert_eq!(primary.sent().len(), 3);
    assert_eq!(fallback.sent().len(), 1);
    assert_eq!(fallback.sent()[0].to, CanonicalPhone::new("919876543212"));
}

#[tokio::test]
async fn test_recipient_failure_is_terminal_without_fallback() {
    let harness = Harness::new();
    let summary = harness.schedule(vec![json!("9876543210")]);

    let primary = Arc::new(MockProvider::succeeding("session"));
    primary.push_outcome(Err(ProviderError::NotOnChannel {
        recipient: CanonicalPhone::new("919876543210"),
    }));
    let fallback = Arc::new(MockProvider::succeeding("paid-api"));

    let processor = harness.processor(
        ProviderChain::new().with(primary).with(fallback.clone()),
    );

    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.retried, 0);
    assert!(fallback.sent().is_empty());

    let counts = harness
        .store
        .delivery_counts(summary.parent_campaign_id)
        .unwrap();
    assert_eq!(counts.failed, 1);

    let campaign = harness
        .store
        .campaign_get(summary.parent_campaign_id)
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);
}

#[tokio::test]
async fn test_mixed_outcome_campaign_settles_completed() {
    let harness = Harness::new();
    let summary = harness.schedule(vec![json!("9876543210"), json!("9876543211")]);

    let provider = Arc::new(MockProvider::succeeding("session"));
    provider.push_outcome(Ok(megaphone_core::DeliveryReceipt {
        provider_id: "session".to_string(),
        message_ref: None,
    }));
    provider.push_outcome(Err(ProviderError::NotOnChannel {
        recipient: CanonicalPhone::new("919876543211"),
    }));
    let processor = harness.processor(ProviderChain::new().with(provider));

    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.sent, 1);
    assert_eq!(outcome.failed, 1);

    // One delivery made it out, so the campaign is completed, not failed.
    let campaign = harness
        .store
        .campaign_get(summary.parent_campaign_id)
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn test_provider_failures_retry_until_ceiling() {
    let harness = Harness::new();
    let summary = harness.schedule(vec![json!("9876543210")]);

    let processor = harness.processor(
        ProviderChain::new().with(Arc::new(MockProvider::failing("session"))),
    );

    // First two runs reschedule with a growing backoff.
    let first = processor.process_tick().await.unwrap();
    assert_eq!(first.retried, 1);
    harness.clock.advance(chrono::Duration::seconds(151));

    let second = processor.process_tick().await.unwrap();
    assert_eq!(second.retried, 1);
    harness.clock.advance(chrono::Duration::seconds(181));

    // Third attempt reaches the retry ceiling.
    let third = processor.process_tick().await.unwrap();
    assert_eq!(third.failed, 1);

    let counts = harness
        .store
        .delivery_counts(summary.parent_campaign_id)
        .unwrap();
    assert_eq!(counts.failed, 1);
    assert!(counts.is_settled());

    // Nothing due remains; a further run pulls an empty batch.
    harness.clock.advance(chrono::Duration::seconds(300));
    let done = processor.process_tick().await.unwrap();
    assert_eq!(done.processed, 0);
}

#[tokio::test]
async fn test_raised_tenant_retry_ceiling_keeps_record_flowing() {
    let harness = Harness::new();
    let tenant = Uuid::now_v7();
    let summary = harness.schedule_for(tenant, vec![json!("9876543210")]);

    // Global ceiling is 3; this tenant gets 5. The record must stay
    // pullable past the global ceiling and only fail at the fifth attempt.
    let mut overrides = TenantOverridesMap::new();
    overrides.insert(
        tenant,
        TenantOverrides {
            max_retries: Some(5),
            ..Default::default()
        },
    );
    let processor = harness
        .processor(ProviderChain::new().with(Arc::new(MockProvider::failing("session"))))
        .with_overrides(overrides);

    for attempt in 1..=4 {
        let outcome = processor.process_tick().await.unwrap();
        assert_eq!(outcome.retried, 1, "attempt {attempt} should reschedule");
        harness.clock.advance(chrono::Duration::seconds(800));
    }

    let last = processor.process_tick().await.unwrap();
    assert_eq!(last.failed, 1);

    let counts = harness
        .store
        .delivery_counts(summary.parent_campaign_id)
        .unwrap();
    assert_eq!(counts.failed, 1);
    assert!(counts.is_settled());
}

#[tokio::test]
async fn test_lowered_tenant_retry_ceiling_fails_over_budget_record() {
    let harness = Harness::new();
    let tenant = Uuid::now_v7();
    let summary = harness.schedule_for(tenant, vec![json!("9876543210")]);

    let provider = Arc::new(MockProvider::failing("session"));
    let processor = harness.processor(ProviderChain::new().with(provider.clone()));

    // Two failed attempts under the global ceiling of 3.
    processor.process_tick().await.unwrap();
    harness.clock.advance(chrono::Duration::seconds(800));
    processor.process_tick().await.unwrap();
    harness.clock.advance(chrono::Duration::seconds(800));
    assert_eq!(provider.sent().len(), 2);

    // The tenant's ceiling is then lowered below the accrued retry count;
    // the record is failed without another send attempt.
    let mut overrides = TenantOverridesMap::new();
    overrides.insert(
        tenant,
        TenantOverrides {
            max_retries: Some(1),
            ..Default::default()
        },
    );
    let processor = harness
        .processor(ProviderChain::new().with(provider.clone()))
        .with_overrides(overrides);

    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.failed, 1);
    assert_eq!(provider.sent().len(), 2);

    let counts = harness
        .store
        .delivery_counts(summary.parent_campaign_id)
        .unwrap();
    assert_eq!(counts.failed, 1);
    assert!(counts.is_settled());
}

#[tokio::test]
async fn test_cooldown_skips_back_to_back_runs() {
    let harness = Harness::new();
    harness.schedule(vec![json!("9876543210"), json!("9876543211")]);

    let processor = harness.processor(ProviderChain::new().with(Arc::new(
        MockProvider::succeeding("session"),
    )));

    let first = processor.process_tick().await.unwrap();
    assert_eq!(first.sent, 2);

    let second = processor.process_tick().await.unwrap();
    match second.skip {
        Some(SkipReason::Cooldown { remaining }) => {
            assert!(remaining > std::time::Duration::ZERO)
        }
        other => panic!("expected cooldown skip, got {other:?}"),
    }
    // The skipped run must still release the lock.
    assert!(!harness.store.lock_state().unwrap().is_processing);

    harness.clock.advance(chrono::Duration::seconds(121));
    let third = processor.process_tick().await.unwrap();
    assert!(third.skip.is_none());
}

#[tokio::test]
async fn test_held_lock_skips_the_tick() {
    let harness = Harness::new();
    harness.schedule(vec![json!("9876543210")]);

    let other_holder = Uuid::now_v7();
    assert!(harness
        .store
        .lock_try_acquire(
            other_holder,
            harness.clock.now(),
            std::time::Duration::from_secs(600)
        )
        .unwrap());

    let processor = harness.processor(ProviderChain::new().with(Arc::new(
        MockProvider::succeeding("session"),
    )));

    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.skip, Some(SkipReason::Locked));
    assert_eq!(outcome.processed, 0);

    // The other holder keeps the lock.
    assert_eq!(
        harness.store.lock_state().unwrap().holder_id,
        Some(other_holder)
    );
}

#[tokio::test]
async fn test_stale_lock_is_taken_over() {
    let harness = Harness::new();
    harness.schedule(vec![json!("9876543210")]);

    assert!(harness
        .store
        .lock_try_acquire(
            Uuid::now_v7(),
            harness.clock.now(),
            std::time::Duration::from_secs(600)
        )
        .unwrap());

    // The holder crashed; its heartbeat ages past the threshold.
    harness.clock.advance(chrono::Duration::seconds(601));

    let processor = harness.processor(ProviderChain::new().with(Arc::new(
        MockProvider::succeeding("session"),
    )));
    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.sent, 1);
    assert!(!harness.store.lock_state().unwrap().is_processing);
}

#[tokio::test]
async fn test_late_optout_is_rechecked_before_send() {
    let harness = Harness::new();
    let summary = harness.schedule(vec![json!("9876543210")]);

    // The recipient opts out after intake, stored without the country code.
    harness
        .store
        .optout_add(&CanonicalPhone::new("9876543210"))
        .unwrap();

    let provider = Arc::new(MockProvider::succeeding("session"));
    let processor = harness.processor(ProviderChain::new().with(provider.clone()));

    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.sent, 0);
    assert!(provider.sent().is_empty());

    let counts = harness
        .store
        .delivery_counts(summary.parent_campaign_id)
        .unwrap();
    assert_eq!(counts.skipped, 1);
}

#[tokio::test]
async fn test_cancelled_campaign_is_not_pulled() {
    let harness = Harness::new();
    let summary = harness.schedule(vec![json!("9876543210"), json!("9876543211")]);
    harness
        .service
        .cancel_campaign(summary.parent_campaign_id)
        .unwrap();

    let processor = harness.processor(ProviderChain::new().with(Arc::new(
        MockProvider::succeeding("session"),
    )));

    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.processed, 0);
    assert_eq!(harness.store.run_count(), 0);

    let campaign = harness
        .store
        .campaign_get(summary.parent_campaign_id)
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Cancelled);
}

#[tokio::test]
async fn test_batch_size_bounds_a_run() {
    let harness = Harness::new();
    let recipients = (0..8).map(|i| json!(format!("987654321{i}"))).collect();
    harness.schedule(recipients);

    let processor = harness.processor(ProviderChain::new().with(Arc::new(
        MockProvider::succeeding("session"),
    )));

    // Default batch size is 5.
    let first = processor.process_tick().await.unwrap();
    assert_eq!(first.processed, 5);
    assert!(first.more_due);
    assert_eq!(
        first.next_batch_at,
        Some(harness.clock.now() + chrono::Duration::seconds(120))
    );

    harness.clock.advance(chrono::Duration::seconds(121));
    let second = processor.process_tick().await.unwrap();
    assert_eq!(second.processed, 3);
    assert!(!second.more_due);
}

#[tokio::test]
async fn test_stuck_processing_records_are_reclaimed() {
    let harness = Harness::new();
    let summary = harness.schedule(vec![json!("9876543210")]);

    // Simulate a crashed run that left the record in processing.
    let pulled = harness
        .store
        .delivery_pull_due(harness.clock.now(), 5, 3)
        .unwrap();
    harness
        .store
        .delivery_update(
            pulled[0].delivery_id,
            megaphone_store::DeliveryUpdate {
                status: Some(DeliveryStatus::Processing),
                ..Default::default()
            },
        )
        .unwrap();

    harness.clock.advance(chrono::Duration::seconds(1801));

    let processor = harness.processor(ProviderChain::new().with(Arc::new(
        MockProvider::succeeding("session"),
    )));
    let outcome = processor.process_tick().await.unwrap();
    assert_eq!(outcome.sent, 1);

    let record = harness
        .store
        .delivery_get(pulled[0].delivery_id)
        .unwrap()
        .unwrap();
    assert_eq!(record.status, DeliveryStatus::Sent);
    // The sweep did not consume a retry.
    assert_eq!(record.retry_count, 0);

    let counts = harness
        .store
        .delivery_counts(summary.parent_campaign_id)
        .unwrap();
    assert!(counts.is_settled());
}

#[tokio::test]
async fn test_aborted_run_marks_run_failed_and_releases_lock() {
    let store = Arc::new(FlakyStore::new());
    let clock = Arc::new(ManualClock::default());
    let service = CampaignService::new(store.clone(), BroadcastConfig::default())
        .with_clock(clock.clone());
    service
        .create_campaign(&CampaignRequest {
            tenant_id: Uuid::now_v7(),
            campaign_name: "Weekend Offer".to_string(),
            message_text: "The offer is live!".to_string(),
            recipients: vec![json!("9876543210")],
            schedule_time: None,
            media_ref: None,
        })
        .unwrap();

    // The store starts erroring on record updates mid-run.
    store.fail_on("delivery_update");

    let processor = BatchProcessor::new(
        store.clone(),
        ProviderChain::new().with(Arc::new(MockProvider::succeeding("session"))),
        BroadcastConfig::default(),
    )
    .with_clock(clock)
    .with_waiter(Arc::new(NoWait));

    assert!(processor.process_tick().await.is_err());

    // The abort path still releases the lock and closes the run row.
    assert!(!store.lock_state().unwrap().is_processing);
    let runs = store.inner().runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].completed_at.is_some());
}

#[tokio::test]
async fn test_no_provider_configured_is_an_error() {
    let harness = Harness::new();
    let processor = harness.processor(ProviderChain::new());
    assert!(processor.process_tick().await.is_err());
}
