//! Provider fallback chain
//!
//! Tries registered providers in priority order. Provider-level failures
//! (unavailable, timeout, upstream error, auth) fall through to the next
//! provider; recipient-level failures (invalid number, not on channel) are
//! final for that recipient and never trigger fallback.

use megaphone_core::{DeliveryProvider, DeliveryReceipt, OutboundMessage, ProviderError, TenantId};
use std::sync::Arc;
use tracing::{debug, warn};

/// An ordered chain of delivery providers.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn DeliveryProvider>>,
}

impl ProviderChain {
    /// An empty chain. Sending through it always fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider at the lowest priority.
    pub fn register(&mut self, provider: Arc<dyn DeliveryProvider>) {
        self.providers.push(provider);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, provider: Arc<dyn DeliveryProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Send through the chain.
    ///
    /// Providers reporting `can_deliver == false` are skipped without
    /// counting as an attempt. On a provider-level failure the next provider
    /// is tried; the last provider-level error is returned when the chain is
    /// exhausted. A recipient-level error returns immediately.
    pub async fn send(
        &self,
        tenant_id: TenantId,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for provider in &self.providers {
            if !provider.can_deliver(tenant_id).await {
                debug!(
                    provider = provider.provider_id(),
                    %tenant_id,
                    "provider cannot deliver for tenant, skipping"
                );
                continue;
            }

            match provider.send(tenant_id, message).await {
                Ok(receipt) => {
                    debug!(
                        provider = provider.provider_id(),
                        to = %message.to,
                        "message delivered"
                    );
                    return Ok(receipt);
                }
                Err(err) if err.is_provider_failure() => {
                    warn!(
                        provider = provider.provider_id(),
                        error = %err,
                        "provider failure, trying next provider"
                    );
                    last_error = Some(err);
                }
                Err(err) => {
                    // Recipient-level failure: no other provider will fare
                    // better with the same number.
                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::Unavailable {
            provider: "none".to_string(),
        }))
    }
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.providers.iter().map(|p| p.provider_id()).collect();
        f.debug_struct("ProviderChain").field("providers", &ids).finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
