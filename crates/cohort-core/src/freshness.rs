//! Snapshot cache gate.

use std::time::Duration;

/// Whether a snapshot committed at `last_updated` (unix seconds) may still be
/// served at `now` without a new aggregation run.
///
/// A snapshot that was never committed (`last_updated == 0`) is never fresh.
/// A commit timestamp ahead of `now` (clock skew) counts as age zero.
pub fn is_fresh(last_updated: u64, now: u64, max_age: Duration) -> bool {
    if last_updated == 0 {
        return false;
    }
    let age = Duration::from_secs(now.saturating_sub(last_updated));
    age <= max_age
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_committed_is_stale() {
        assert!(!is_fresh(0, 1_000, Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn within_max_age_is_fresh() {
        assert!(is_fresh(1_000, 1_000, Duration::from_secs(60)));
        assert!(is_fresh(1_000, 1_060, Duration::from_secs(60)));
    }

    #[test]
    fn past_max_age_is_stale() {
        assert!(!is_fresh(1_000, 1_061, Duration::from_secs(60)));
        assert!(!is_fresh(1_000, 2_000, Duration::ZERO));
    }

    #[test]
    fn future_commit_is_fresh() {
        assert!(is_fresh(5_000, 1_000, Duration::ZERO));
    }

    #[test]
    fn sub_second_max_age() {
        assert!(is_fresh(1_000, 1_000, Duration::from_millis(500)));
        assert!(!is_fresh(1_000, 1_001, Duration::from_millis(500)));
    }
}
