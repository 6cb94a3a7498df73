//! Backoff math for storefront rate limiting.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rand::Rng;

/// Sleep before the n-th rate-limit retry:
/// `clamp(min(20 * 2^(n-1), 120) * (1 ± 0.25), 10, max_sleep)` seconds.
#[must_use]
pub fn compute_retry_sleep_seconds(retry_count: u32, max_sleep_secs: u64) -> u64 {
    let retry_count = retry_count.max(1);
    let base = 20u64
        .saturating_mul(1u64 << (retry_count - 1).min(62))
        .min(120);
    let jitter: f64 = rand::rng().random_range(-0.25..=0.25);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let slept = ((base as f64) * (1.0 + jitter)).round() as u64;
    slept.clamp(10, max_sleep_secs.max(10))
}

/// Truncates a timestamp to its UTC hour — the showcase snapshot bucket key.
#[must_use]
pub fn hour_bucket_utc(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::hours(1)).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn retry_sleep_stays_within_bounds() {
        for retry in 1..=12 {
            for _ in 0..50 {
                let sleep = compute_retry_sleep_seconds(retry, 120);
                assert!((10..=120).contains(&sleep), "retry {retry}: {sleep}s");
            }
        }
    }

    #[test]
    fn retry_sleep_grows_toward_the_cap() {
        // With +25% jitter the base sequence is 20, 40, 80, 120, 120, ...
        let max_first: u64 = (0..100)
            .map(|_| compute_retry_sleep_seconds(1, 120))
            .max()
            .unwrap_or(0);
        assert!(max_first <= 25);

        let min_fourth: u64 = (0..100)
            .map(|_| compute_retry_sleep_seconds(4, 120))
            .min()
            .unwrap_or(0);
        assert!(min_fourth >= 90);
    }

    #[test]
    fn zero_retry_count_is_treated_as_first() {
        let sleep = compute_retry_sleep_seconds(0, 120);
        assert!((10..=25).contains(&sleep));
    }

    #[test]
    fn hour_bucket_truncates_minutes_and_seconds() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 13, 47, 31).unwrap();
        let bucket = hour_bucket_utc(at);
        assert_eq!(bucket, Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap());
    }
}
