//! Configuration types

use crate::{ConfigError, MegaphoneResult, MegaphoneError, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Master configuration for the broadcast engine.
///
/// Read once per processing run. Global values can be overridden per tenant
/// via [`TenantOverrides`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Maximum messages a tenant may send per UTC day.
    pub daily_quota: u32,
    /// Maximum delivery records pulled per processing run.
    pub batch_size: usize,
    /// Minimum idle interval between completed processing runs (nanoseconds on the wire).
    pub cooldown: Duration,
    /// Retry ceiling per delivery record.
    pub max_retries: u32,
    /// Anchor of the retry backoff. `None` anchors to `cooldown`, which is
    /// the historical behavior; set explicitly to decouple the two.
    pub retry_backoff_base: Option<Duration>,
    /// Step of the exponential retry backoff: `base + step * 2^(retries-1)`.
    pub retry_backoff_step: Duration,
    /// Lower bound of the humanized inter-message delay.
    pub min_message_delay: Duration,
    /// Upper bound of the humanized inter-message delay.
    pub max_message_delay: Duration,
    /// Heartbeat age after which a held processing lock may be reclaimed.
    pub lock_stale_after: Duration,
    /// Age after which a record left in `processing` is swept back to `pending`.
    pub stuck_after: Duration,
    /// Country code prepended to bare 10-digit numbers.
    pub default_country_code: String,
    /// Hour of day (UTC) at which next-day buckets are scheduled.
    pub next_day_send_hour: u32,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            daily_quota: 100,
            batch_size: 5,
            cooldown: Duration::from_secs(120),
            max_retries: 3,
            retry_backoff_base: None,
            retry_backoff_step: Duration::from_secs(30),
            min_message_delay: Duration::from_secs(2),
            max_message_delay: Duration::from_secs(6),
            lock_stale_after: Duration::from_secs(600),
            stuck_after: Duration::from_secs(1800),
            default_country_code: "91".to_string(),
            next_day_send_hour: 9,
        }
    }
}

impl BroadcastConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `MEGAPHONE_DAILY_QUOTA`: messages per tenant per day (default: 100)
    /// - `MEGAPHONE_BATCH_SIZE`: records per run (default: 5)
    /// - `MEGAPHONE_COOLDOWN_SECS`: idle interval between runs (default: 120)
    /// - `MEGAPHONE_MAX_RETRIES`: retry ceiling (default: 3)
    /// - `MEGAPHONE_LOCK_STALE_SECS`: lock staleness threshold (default: 600)
    /// - `MEGAPHONE_COUNTRY_CODE`: default country code (default: "91")
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            daily_quota: std::env::var("MEGAPHONE_DAILY_QUOTA")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.daily_quota),
            batch_size: std::env::var("MEGAPHONE_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_size),
            cooldown: std::env::var("MEGAPHONE_COOLDOWN_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cooldown),
            max_retries: std::env::var("MEGAPHONE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            lock_stale_after: std::env::var("MEGAPHONE_LOCK_STALE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_stale_after),
            default_country_code: std::env::var("MEGAPHONE_COUNTRY_CODE")
                .ok()
                .unwrap_or(defaults.default_country_code),
            ..defaults
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(MegaphoneError::Config) if invalid.
    pub fn validate(&self) -> MegaphoneResult<()> {
        if self.daily_quota == 0 {
            return Err(MegaphoneError::Config(ConfigError::InvalidValue {
                field: "daily_quota".to_string(),
                value: self.daily_quota.to_string(),
                reason: "daily_quota must be greater than 0".to_string(),
            }));
        }

        if self.batch_size == 0 {
            return Err(MegaphoneError::Config(ConfigError::InvalidValue {
                field: "batch_size".to_string(),
                value: self.batch_size.to_string(),
                reason: "batch_size must be greater than 0".to_string(),
            }));
        }

        if self.lock_stale_after.is_zero() {
            return Err(MegaphoneError::Config(ConfigError::InvalidValue {
                field: "lock_stale_after".to_string(),
                value: format!("{:?}", self.lock_stale_after),
                reason: "lock_stale_after must be positive".to_string(),
            }));
        }

        if self.min_message_delay > self.max_message_delay {
            return Err(MegaphoneError::Config(ConfigError::InvalidValue {
                field: "min_message_delay".to_string(),
                value: format!("{:?}", self.min_message_delay),
                reason: "min_message_delay must not exceed max_message_delay".to_string(),
            }));
        }

        if self.next_day_send_hour > 23 {
            return Err(MegaphoneError::Config(ConfigError::InvalidValue {
                field: "next_day_send_hour".to_string(),
                value: self.next_day_send_hour.to_string(),
                reason: "next_day_send_hour must be 0-23".to_string(),
            }));
        }

        if self.default_country_code.is_empty()
            || !self.default_country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(MegaphoneError::Config(ConfigError::InvalidValue {
                field: "default_country_code".to_string(),
                value: self.default_country_code.clone(),
                reason: "default_country_code must be 1-3 digits".to_string(),
            }));
        }

        Ok(())
    }

    /// Apply tenant-level overrides on top of this configuration.
    pub fn for_tenant(&self, overrides: Option<&TenantOverrides>) -> BroadcastConfig {
        let Some(overrides) = overrides else {
            return self.clone();
        };

        BroadcastConfig {
            daily_quota: overrides.daily_quota.unwrap_or(self.daily_quota),
            batch_size: self.batch_size,
            cooldown: overrides.cooldown.unwrap_or(self.cooldown),
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            default_country_code: overrides
                .default_country_code
                .clone()
                .unwrap_or_else(|| self.default_country_code.clone()),
            ..self.clone()
        }
    }

    /// The effective backoff anchor: explicit base, or the cooldown.
    pub fn backoff_base(&self) -> Duration {
        self.retry_backoff_base.unwrap_or(self.cooldown)
    }
}

/// Per-tenant overrides of the global configuration.
///
/// Unset fields fall through to the global value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TenantOverrides {
    pub daily_quota: Option<u32>,
    pub max_retries: Option<u32>,
    pub cooldown: Option<Duration>,
    pub default_country_code: Option<String>,
}

/// Convenience map of per-tenant overrides.
pub type TenantOverridesMap = HashMap<TenantId, TenantOverrides>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BroadcastConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_quota() {
        let config = BroadcastConfig {
            daily_quota: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let config = BroadcastConfig {
            min_message_delay: Duration::from_secs(10),
            max_message_delay: Duration::from_secs(2),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_digit_country_code() {
        let config = BroadcastConfig {
            default_country_code: "+91".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_base_anchors_to_cooldown_by_default() {
        let config = BroadcastConfig::default();
        assert_eq!(config.backoff_base(), config.cooldown);

        let decoupled = BroadcastConfig {
            retry_backoff_base: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        assert_eq!(decoupled.backoff_base(), Duration::from_secs(10));
    }

    #[test]
    fn test_tenant_overrides_fall_through() {
        let config = BroadcastConfig::default();

        let unchanged = config.for_tenant(None);
        assert_eq!(unchanged, config);

        let overrides = TenantOverrides {
            daily_quota: Some(500),
            default_country_code: Some("1".to_string()),
            ..Default::default()
        };
        let resolved = config.for_tenant(Some(&overrides));
        assert_eq!(resolved.daily_quota, 500);
        assert_eq!(resolved.default_country_code, "1");
        assert_eq!(resolved.max_retries, config.max_retries);
        assert_eq!(resolved.cooldown, config.cooldown);
    }
}
