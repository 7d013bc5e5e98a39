//! Delivery provider trait
//!
//! Provider-agnostic interface for message delivery. Concrete providers
//! (a session-based channel, a paid API fallback) are supplied by the
//! surrounding system; the engine only sees this trait.

use crate::{CanonicalPhone, ProviderError, TenantId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A fully-resolved message ready for delivery: personalization has already
/// been applied, the recipient is canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: CanonicalPhone,
    pub text: String,
    /// Opaque reference to an uploaded media object, if any.
    pub media_ref: Option<String>,
}

impl OutboundMessage {
    /// Create a text-only message.
    pub fn text(to: CanonicalPhone, text: impl Into<String>) -> Self {
        Self {
            to,
            text: text.into(),
            media_ref: None,
        }
    }

    /// Attach a media reference.
    pub fn with_media(mut self, media_ref: impl Into<String>) -> Self {
        self.media_ref = Some(media_ref.into());
        self
    }
}

/// Outcome of a successful provider send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Which provider delivered the message.
    pub provider_id: String,
    /// Provider-assigned message reference, if the provider returns one.
    pub message_ref: Option<String>,
}

/// Trait for delivery providers.
/// Implementations must be thread-safe (Send + Sync).
///
/// The engine tries providers in a fixed priority order and falls back to
/// the next provider only on provider-level failures
/// ([`ProviderError::is_provider_failure`]); recipient-level failures
/// propagate as a delivery failure for that recipient.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Stable identifier of this provider (e.g. "session", "paid-api").
    fn provider_id(&self) -> &str;

    /// Whether this provider can currently deliver for the tenant
    /// (e.g. the tenant's session channel is connected).
    async fn can_deliver(&self, tenant_id: TenantId) -> bool;

    /// Deliver a message to a recipient on behalf of a tenant.
    async fn send(
        &self,
        tenant_id: TenantId,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, ProviderError>;
}
