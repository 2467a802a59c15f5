//! Exponential backoff policy for suspended sagas.

use chrono::Duration;

/// Computes the delay before the next retry of a suspended saga.
///
/// The delay doubles with each retry (`base * 2^n`) and is capped at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::seconds(5),
            max_delay: Duration::minutes(5),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit base and cap.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Returns the delay before retry number `retry_count + 1`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base_ms = self.base_delay.num_milliseconds().max(0);
        let max_ms = self.max_delay.num_milliseconds().max(0);
        // Shifts past ~20 would overflow long before any practical cap.
        let factor = 1i64 << retry_count.min(20);
        let delay_ms = base_ms.saturating_mul(factor).min(max_ms);
        Duration::milliseconds(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_cap() {
        let policy = RetryPolicy::new(Duration::seconds(1), Duration::seconds(30));
        assert_eq!(policy.delay_for(0), Duration::seconds(1));
        assert_eq!(policy.delay_for(1), Duration::seconds(2));
        assert_eq!(policy.delay_for(2), Duration::seconds(4));
        assert_eq!(policy.delay_for(4), Duration::seconds(16));
        assert_eq!(policy.delay_for(5), Duration::seconds(30));
        assert_eq!(policy.delay_for(6), Duration::seconds(30));
    }

    #[test]
    fn test_monotonically_non_decreasing_and_capped() {
        let policy = RetryPolicy::default();
        let max = Duration::minutes(5);
        let mut previous = policy.delay_for(0);
        for n in 1..64 {
            let current = policy.delay_for(n);
            assert!(current >= previous, "delay decreased at retry {n}");
            assert!(current <= max, "delay exceeded cap at retry {n}");
            previous = current;
        }
    }

    #[test]
    fn test_large_retry_counts_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), Duration::minutes(5));
    }
}
