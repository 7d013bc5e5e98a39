//! Error types for MEGAPHONE operations

use crate::{CampaignId, CanonicalPhone, EntityType};
use thiserror::Error;
use uuid::Uuid;

/// Campaign store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Store unreachable: {reason}")]
    Unavailable { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Recipient intake errors. Terminal for that recipient, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecipientError {
    #[error("Empty phone input")]
    Empty,

    #[error("Too few digits: got {digits}, need at least 10")]
    TooFewDigits { digits: usize },

    #[error("Too many digits: got {digits}, maximum is 15")]
    TooManyDigits { digits: usize },

    #[error("Recipient {recipient} has opted out")]
    OptedOut { recipient: CanonicalPhone },
}

/// Delivery provider errors.
///
/// The provider-failure vs. recipient-failure split drives the fallback
/// decision: provider failures try the next provider in the chain, recipient
/// failures are recorded against that recipient and never trigger fallback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider {provider} is unavailable")]
    Unavailable { provider: String },

    #[error("Request to {provider} timed out")]
    Timeout { provider: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Authentication with {provider} failed")]
    AuthFailed { provider: String },

    #[error("Recipient {recipient} is not a valid number: {reason}")]
    InvalidRecipient {
        recipient: CanonicalPhone,
        reason: String,
    },

    #[error("Recipient {recipient} is not registered on the channel")]
    NotOnChannel { recipient: CanonicalPhone },
}

impl ProviderError {
    /// Whether this is a provider-level failure (try the next provider)
    /// rather than a recipient-level one (mark this recipient failed).
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::RequestFailed { .. }
                | ProviderError::AuthFailed { .. }
        )
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Engine-level errors for campaign intake and processing runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("No valid recipients: {invalid} invalid, {opted_out} opted out")]
    NoValidRecipients { invalid: usize, opted_out: usize },

    #[error("Campaign {campaign_id} cannot be cancelled from status {status}")]
    NotCancellable {
        campaign_id: CampaignId,
        status: String,
    },

    #[error("No delivery provider is configured")]
    NoProviderConfigured,

    #[error("Processing run aborted: {reason}")]
    RunAborted { reason: String },
}

/// Master error type for all MEGAPHONE errors.
#[derive(Debug, Clone, Error)]
pub enum MegaphoneError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Recipient error: {0}")]
    Recipient(#[from] RecipientError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Result type alias for MEGAPHONE operations.
pub type MegaphoneResult<T> = Result<T, MegaphoneError>;

// =============================================================================
// TESTS
// =============================================================================
