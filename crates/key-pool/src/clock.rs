//! Wall-clock helpers
//!
//! Status timestamps are unix milliseconds so the persisted JSON stays
//! readable by any consumer.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;

const DAY_MILLIS: u64 = 24 * 60 * 60 * 1000;

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Next local midnight in `tz` strictly after `now_ms`, plus `margin`.
///
/// Daily quotas roll over at midnight in the provider's reference timezone;
/// the margin keeps a retry from landing on the rollover instant itself.
/// If the local midnight does not exist (a DST gap at 00:00), falls back to
/// 24 hours from now.
pub fn next_daily_reset(now_ms: u64, tz: Tz, margin: Duration) -> u64 {
    let margin_ms = margin.as_millis() as u64;
    let fallback = now_ms + DAY_MILLIS + margin_ms;

    let Some(now) = Utc.timestamp_millis_opt(now_ms as i64).single() else {
        return fallback;
    };
    let Some(next_midnight) = now
        .with_timezone(&tz)
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
    else {
        return fallback;
    };
    match tz.from_local_datetime(&next_midnight).earliest() {
        Some(reset) => reset.timestamp_millis() as u64 + margin_ms,
        None => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> u64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .unwrap()
            .timestamp_millis() as u64
    }

    const FIVE_MIN: Duration = Duration::from_secs(300);

    #[test]
    fn resets_at_next_pacific_midnight_plus_margin() {
        // 12:00 UTC is 05:00 PDT on the same day
        let now = millis(2026, 10, 15, 12, 0);
        let reset = next_daily_reset(now, chrono_tz::America::Los_Angeles, FIVE_MIN);
        assert_eq!(reset, millis(2026, 10, 16, 7, 5));
    }

    #[test]
    fn late_evening_local_resets_same_utc_day() {
        // 06:30 UTC is 23:30 PDT on the previous local day
        let now = millis(2026, 10, 15, 6, 30);
        let reset = next_daily_reset(now, chrono_tz::America::Los_Angeles, FIVE_MIN);
        assert_eq!(reset, millis(2026, 10, 15, 7, 5));
    }

    #[test]
    fn follows_dst_change() {
        // US DST ends 2026-11-01; the following midnight is PST (UTC-8)
        let now = millis(2026, 11, 1, 12, 0);
        let reset = next_daily_reset(now, chrono_tz::America::Los_Angeles, FIVE_MIN);
        assert_eq!(reset, millis(2026, 11, 2, 8, 5));
    }

    #[test]
    fn utc_reference_zone() {
        let now = millis(2026, 10, 15, 23, 59);
        let reset = next_daily_reset(now, chrono_tz::UTC, Duration::ZERO);
        assert_eq!(reset, millis(2026, 10, 16, 0, 0));
    }

    #[test]
    fn reset_is_always_in_future() {
        let now = now_millis();
        assert!(next_daily_reset(now, chrono_tz::America::Los_Angeles, Duration::ZERO) > now);
    }
}
