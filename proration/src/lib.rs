// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Proration math: converting paid amounts into subscription days and the
//! clamp correction applied when a refund removes time from the middle of a
//! transaction timeline.

use chrono::{DateTime, Duration, Utc};

/// Days of subscription time `transaction_amount` is worth, relative to the
/// plan's list price and period. Truncates toward zero.
///
/// Panics if `subscription_amount <= 0`: plans are validated at creation, a
/// zero-amount plan reaching proration is a programming error.
pub fn delta_days(
    transaction_amount: f64,
    subscription_amount: f64,
    subscription_period: i64,
) -> i64 {
    assert!(
        subscription_amount > 0.0,
        "subscription amount must be positive, got {subscription_amount}"
    );
    (subscription_period as f64 * transaction_amount / subscription_amount) as i64
}

/// Correct a refunded payment's new `ends` against `now`.
///
/// The refunded payment's window shrinks by `delta` days. If the shrunken
/// `ends` would land in the past, it is clamped to `now` and `delta` is
/// reduced by the clamped whole-day count, so the downstream timeline shift
/// moves future transactions only by the days actually removed.
pub fn clamp_refund_ends(
    new_ends: DateTime<Utc>,
    now: DateTime<Utc>,
    delta: i64,
) -> (DateTime<Utc>, i64) {
    if new_ends >= now {
        return (new_ends, delta);
    }
    // Whole-day truncation, matching the ledger's day-granular windows.
    let correction = (now - new_ends).num_days();
    (now, delta - correction)
}

/// Shift both bounds of a validity window by a signed number of days.
pub fn shift_window(
    starts: DateTime<Utc>,
    ends: DateTime<Utc>,
    days: i64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    (starts + Duration::days(days), ends + Duration::days(days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_price_buys_full_period() {
        assert_eq!(delta_days(100.0, 100.0, 30), 30);
        assert_eq!(delta_days(9.99, 9.99, 365), 365);
    }

    #[test]
    fn partial_amount_truncates_toward_zero() {
        assert_eq!(delta_days(50.0, 100.0, 30), 15);
        assert_eq!(delta_days(33.0, 100.0, 30), 9); // 9.9 truncated
        assert_eq!(delta_days(1.0, 100.0, 30), 0);
    }

    #[test]
    fn monotonic_in_transaction_amount() {
        let mut last = 0;
        for cents in (0..=10_000).step_by(50) {
            let days = delta_days(cents as f64 / 100.0, 100.0, 30);
            assert!(days >= last);
            last = days;
        }
    }

    #[test]
    #[should_panic(expected = "subscription amount must be positive")]
    fn zero_amount_plan_fails_fast() {
        delta_days(10.0, 0.0, 30);
    }

    #[test]
    fn clamp_leaves_future_ends_untouched() {
        let now = Utc::now();
        let ends = now + Duration::days(3);
        assert_eq!(clamp_refund_ends(ends, now, 15), (ends, 15));
    }

    #[test]
    fn clamp_pins_past_ends_to_now_and_shrinks_delta() {
        let now = Utc::now();
        let ends = now - Duration::days(4);
        let (clamped, delta) = clamp_refund_ends(ends, now, 15);
        assert_eq!(clamped, now);
        assert_eq!(delta, 11);
        assert!(clamped >= now);
    }

    #[test]
    fn clamp_truncates_subday_remainders_down() {
        let now = Utc::now();
        let ends = now - Duration::days(2) - Duration::hours(5);
        let (clamped, delta) = clamp_refund_ends(ends, now, 10);
        assert_eq!(clamped, now);
        assert_eq!(delta, 8);
    }

    #[test]
    fn shift_moves_both_bounds() {
        let starts = Utc::now();
        let ends = starts + Duration::days(30);
        let (s, e) = shift_window(starts, ends, -15);
        assert_eq!(s, starts - Duration::days(15));
        assert_eq!(e, ends - Duration::days(15));
    }
}
