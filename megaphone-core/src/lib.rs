//! MEGAPHONE Core - Entity Types
//!
//! Pure data structures for the broadcast queue processing engine.
//! All other crates depend on this. This crate contains ONLY data types,
//! the provider trait, and validation-free helpers - no business logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

mod clock;
mod config;
mod entities;
mod enums;
mod error;
mod provider;

pub use clock::{Clock, NoWait, SystemClock, Waiter};
pub use config::{BroadcastConfig, TenantOverrides, TenantOverridesMap};
pub use entities::{BatchRun, Campaign, DeliveryRecord, ProcessingLockState};
pub use enums::{
    CampaignStatus, CampaignStatusParseError, DeliveryStatus, DeliveryStatusParseError,
    EntityType, RunStatus, RunStatusParseError,
};
pub use error::{
    ConfigError, EngineError, MegaphoneError, MegaphoneResult, ProviderError, RecipientError,
    StoreError,
};
pub use provider::{DeliveryProvider, DeliveryReceipt, OutboundMessage};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Identifier of a campaign (one day-bucket of a logical broadcast).
pub type CampaignId = Uuid;

/// Identifier of a tenant (one business account on the platform).
pub type TenantId = Uuid;

/// Identifier of a single recipient's delivery record within a campaign.
pub type DeliveryId = Uuid;

/// Identifier of one batch processor invocation (a run).
pub type RunId = Uuid;

/// Opaque token identifying the run that holds the processing lock.
pub type HolderId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

// ============================================================================
// CANONICAL PHONE
// ============================================================================

/// A canonical phone number: digits only, country-code prefixed.
///
/// Produced by the recipient normalizer; everything downstream of intake
/// (delivery records, opt-out keys, provider sends) uses this form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalPhone(String);

impl CanonicalPhone {
    /// Wrap an already-canonical digit string.
    ///
    /// Callers outside the normalizer should only pass values that came out
    /// of it (e.g. when rehydrating from storage).
    pub fn new(digits: impl Into<String>) -> Self {
        CanonicalPhone(digits.into())
    }

    /// The digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of digits.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the phone is empty (only possible for sentinel values).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CanonicalPhone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CanonicalPhone {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
