//! Recipient normalizer
//!
//! Canonicalizes free-form phone input into digits-only, country-code
//! prefixed numbers, and filters opted-out recipients. Pure functions;
//! malformed input is reported per recipient, never thrown.

use megaphone_core::{CanonicalPhone, RecipientError};
use std::collections::HashSet;

const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 15;

/// Canonicalize a free-form phone string.
///
/// Strips non-digits, rejects fewer than 10 digits, prepends the tenant's
/// default country code to bare 10-digit numbers, and accepts 10-15 digit
/// results.
pub fn normalize(raw: &str, default_country_code: &str) -> Result<CanonicalPhone, RecipientError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return Err(RecipientError::Empty);
    }
    if digits.len() < MIN_DIGITS {
        return Err(RecipientError::TooFewDigits { digits: digits.len() });
    }

    let canonical = if digits.len() == MIN_DIGITS {
        format!("{default_country_code}{digits}")
    } else {
        digits
    };

    if canonical.len() > MAX_DIGITS {
        return Err(RecipientError::TooManyDigits {
            digits: canonical.len(),
        });
    }

    Ok(CanonicalPhone::new(canonical))
}

/// Canonicalize a recipient that is either a plain string or a structured
/// object carrying a `phone` (or `number`) field.
pub fn normalize_value(
    raw: &serde_json::Value,
    default_country_code: &str,
) -> Result<CanonicalPhone, RecipientError> {
    let phone = match raw {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(map) => map
            .get("phone")
            .or_else(|| map.get("number"))
            .and_then(|v| v.as_str())
            .ok_or(RecipientError::Empty)?,
        _ => return Err(RecipientError::Empty),
    };
    normalize(phone, default_country_code)
}

/// The alternate historical form of a canonical phone: with the country
/// code stripped if present, or prefixed if absent. Opt-out entries written
/// before normalization was enforced may be stored in either form, so both
/// must be checked.
pub fn alternate_form(phone: &CanonicalPhone, default_country_code: &str) -> String {
    let digits = phone.as_str();
    if let Some(stripped) = digits.strip_prefix(default_country_code) {
        if stripped.len() >= MIN_DIGITS {
            return stripped.to_string();
        }
    }
    format!("{default_country_code}{digits}")
}

/// Both opt-out lookup keys for a canonical phone.
pub fn opt_out_keys(phone: &CanonicalPhone, default_country_code: &str) -> [String; 2] {
    [
        phone.as_str().to_string(),
        alternate_form(phone, default_country_code),
    ]
}

/// Result of opt-out filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Recipients cleared to receive the campaign, input order preserved.
    pub allowed: Vec<CanonicalPhone>,
    /// Recipients removed because of an opt-out entry.
    pub skipped: Vec<CanonicalPhone>,
}

/// Remove opted-out recipients.
///
/// `opted_out_keys` holds every opt-out entry matching this batch, in
/// whichever historical form it was stored. Bypass numbers (e.g. the
/// tenant's own) are never filtered, even when present in the set.
/// Duplicates are preserved: dedup is not this layer's concern.
pub fn filter_opted_out(
    recipients: Vec<CanonicalPhone>,
    bypass: &[CanonicalPhone],
    default_country_code: &str,
    opted_out_keys: &HashSet<String>,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for recipient in recipients {
        let bypassed = bypass.contains(&recipient);
        let opted_out = opt_out_keys(&recipient, default_country_code)
            .iter()
            .any(|key| opted_out_keys.contains(key));
        if opted_out && !bypassed {
            outcome.skipped.push(recipient);
        } else {
            outcome.allowed.push(recipient);
        }
    }
    outcome
}

// =============================================================================
// TESTS
// =============================================================================
