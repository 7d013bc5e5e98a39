//! Campaign splitter
//!
//! Partitions a recipient list into day-bucketed sub-campaigns so no day
//! exceeds the tenant's daily sending quota. Today's bucket only gets what
//! is left of today's quota; every later bucket is scheduled at the
//! configured send hour on consecutive days.

use chrono::{Duration, TimeZone, Utc};
use megaphone_core::{CanonicalPhone, Timestamp};

/// One day-bucket of a split campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct DayBucket {
    pub recipients: Vec<CanonicalPhone>,
    pub send_at: Timestamp,
    pub day_number: i32,
    pub total_days: i32,
}

/// Split recipients into day buckets.
///
/// Bucket 1 takes `max(0, daily_quota - already_sent_today)` recipients at
/// `start_at`; when today's quota is exhausted the first bucket moves to the
/// next day. Subsequent buckets take up to `daily_quota` recipients each at
/// `send_hour` (UTC) on consecutive days. `total_days` is annotated on every
/// bucket. An empty recipient list yields no buckets; rejecting it is the
/// caller's responsibility.
pub fn split(
    recipients: Vec<CanonicalPhone>,
    daily_quota: u32,
    already_sent_today: u32,
    start_at: Timestamp,
    send_hour: u32,
) -> Vec<DayBucket> {
    if recipients.is_empty() || daily_quota == 0 {
        return Vec::new();
    }

    let remaining_today = daily_quota.saturating_sub(already_sent_today) as usize;
    let quota = daily_quota as usize;

    let mut buckets = Vec::new();
    let mut rest = recipients;
    let mut day_offset: i64 = 1;

    if remaining_today > 0 {
        let take = remaining_today.min(rest.len());
        let tail = rest.split_off(take);
        buckets.push(DayBucket {
            recipients: rest,
            send_at: start_at,
            day_number: 1,
            total_days: 0, // annotated below
        });
        rest = tail;
    }

    while !rest.is_empty() {
        let take = quota.min(rest.len());
        let tail = rest.split_off(take);
        buckets.push(DayBucket {
            recipients: rest,
            send_at: at_send_hour(start_at, day_offset, send_hour),
            day_number: buckets.len() as i32 + 1,
            total_days: 0,
        });
        rest = tail;
        day_offset += 1;
    }

    let total_days = buckets.len() as i32;
    for bucket in &mut buckets {
        bucket.total_days = total_days;
    }
    buckets
}

/// `days` days after `start_at`, at `send_hour`:00 UTC.
fn at_send_hour(start_at: Timestamp, days: i64, send_hour: u32) -> Timestamp {
    let date = (start_at + Duration::days(days)).date_naive();
    let naive = date
        .and_hms_opt(send_hour, 0, 0)
        .unwrap_or_else(|| date.and_hms_opt(9, 0, 0).expect("09:00 is a valid time"));
    Utc.from_utc_datetime(&naive)
}

// =============================================================================
// TESTS
// =============================================================================
