//! MEGAPHONE Engine - Broadcast Queue Processing
//!
//! The processing half of the platform: recipient intake (normalize, opt-out
//! filter, day split), and the batch processor that drains the delivery
//! queue under the singleton lock, the cooldown gate and per-tenant quotas.
//!
//! Entities and the provider trait live in `megaphone-core`; persistence is
//! behind `megaphone_store::CampaignStore`.

pub mod campaigns;
pub mod cooldown;
pub mod lock;
pub mod normalizer;
pub mod processor;
pub mod providers;
pub mod splitter;
pub mod wait;

pub use campaigns::{
    CampaignProgress, CampaignRequest, CampaignService, DaySchedule, ScheduleSummary,
};
pub use cooldown::CooldownDecision;
pub use processor::{BatchProcessor, SkipReason, TickOutcome};
pub use providers::ProviderChain;
pub use splitter::DayBucket;
pub use wait::TokioWaiter;
