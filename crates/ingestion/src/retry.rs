//! Retry budget and backoff schedule.

use std::time::Duration;

/// Retries allowed after the first failed attempt.
pub const MAX_RETRIES: u32 = 3;

/// Retry policy for failed ingestion attempts.
///
/// `retry_count` is the value *after* the failure was counted, so a job with
/// `max_retries = 3` is attempted four times before it is dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Multiplied by `2^retry_count`.
    pub backoff_unit: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            backoff_unit: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that dead-letters on the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, unit: Duration, max: Duration) -> Self {
        self.backoff_unit = unit;
        self.max_backoff = max;
        self
    }

    /// `min(unit * 2^retry_count, max_backoff)`.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.backoff_unit
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count <= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_schedule_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(16));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(30));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(30));
    }

    #[test]
    fn three_retries_then_dead_letter() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn no_retry_policy_gives_up_immediately() {
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    proptest! {
        #[test]
        fn backoff_never_exceeds_cap(rc in 0u32..200, unit_ms in 1u64..5_000, cap_ms in 1u64..120_000) {
            let policy = RetryPolicy::default()
                .with_backoff(Duration::from_millis(unit_ms), Duration::from_millis(cap_ms));
            prop_assert!(policy.backoff_for(rc) <= Duration::from_millis(cap_ms));
        }

        #[test]
        fn backoff_is_monotonic(rc in 0u32..100) {
            let policy = RetryPolicy::default();
            prop_assert!(policy.backoff_for(rc) <= policy.backoff_for(rc + 1));
        }
    }
}
