//! Exponential backoff delay computation
//!
//! Shared by camera recovery and dashboard request retries.

use std::time::Duration;

/// `delay(n) = min(base * factor^(n-1), max)` for 1-based attempt `n`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, factor: f64, max: Duration) -> Self {
        Self { base, factor, max }
    }

    /// Doubling policy used by camera recovery
    pub fn doubling(base: Duration, max: Duration) -> Self {
        Self::new(base, 2.0, max)
    }

    /// Delay to wait before the given attempt. Attempt 0 waits nothing.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.factor.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let secs = self.base.as_secs_f64() * exp;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// The first `n` delays, attempts 1..=n
    pub fn delays(&self, n: u32) -> Vec<Duration> {
        (1..=n).map(|a| self.delay_for_attempt(a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_sequence_is_capped() {
        let policy = BackoffPolicy::doubling(Duration::from_secs(1), Duration::from_secs(5));
        let secs: Vec<u64> = policy.delays(5).iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_attempt_zero_waits_nothing() {
        let policy = BackoffPolicy::doubling(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn test_fractional_factor() {
        let policy = BackoffPolicy::new(
            Duration::from_millis(500),
            1.5,
            Duration::from_secs(60),
        );
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(750));
    }

    #[test]
    fn test_huge_attempt_saturates_at_max() {
        let policy = BackoffPolicy::doubling(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(10_000), Duration::from_secs(60));
    }
}
