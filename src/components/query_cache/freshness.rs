use chrono::{DateTime, Duration, Utc};

/// Whether a query last refreshed at `updated_at` has outlived the timeout.
///
/// Elapsed time exactly equal to the timeout is still fresh. A timestamp in
/// the future counts as fresh. A timeout too large to represent never expires.
pub fn is_stale(updated_at: DateTime<Utc>, now: DateTime<Utc>, timeout_minutes: i64) -> bool {
    match Duration::try_minutes(timeout_minutes) {
        Some(timeout) => now - updated_at > timeout,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_exact_timeout_is_fresh() {
        assert!(!is_stale(now() - Duration::minutes(15), now(), 15));
    }

    #[test]
    fn test_past_timeout_is_stale() {
        assert!(is_stale(now() - Duration::minutes(16), now(), 15));
        assert!(is_stale(
            now() - Duration::minutes(15) - Duration::seconds(1),
            now(),
            15
        ));
    }

    #[test]
    fn test_recent_and_future_are_fresh() {
        assert!(!is_stale(now() - Duration::minutes(14), now(), 15));
        assert!(!is_stale(now() + Duration::minutes(5), now(), 15));
    }

    #[test]
    fn test_zero_timeout() {
        assert!(!is_stale(now(), now(), 0));
        assert!(is_stale(now() - Duration::milliseconds(1), now(), 0));
    }

    #[test]
    fn test_unrepresentable_timeout_never_expires() {
        let long_ago = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert!(!is_stale(long_ago, now(), i64::MAX));
        assert!(!is_stale(long_ago, now(), 200_000_000_000_000));
    }
}
