//! Bounded exponential backoff

use orchestra_core::{OrchestraError, RetryConfig};
use rand::Rng;
use std::time::Duration;

/// Upper bound of the random jitter, as a fraction of the delay
const JITTER_FRACTION: f64 = 0.1;

/// Retry schedule for attempts against one provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter,
        }
    }

    /// Policy making a single attempt
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// `min(base * 2^(attempt-1), max)` for the attempt that just failed
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Backoff plus up to 10% random jitter when enabled
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = delay.mul_f64(JITTER_FRACTION);
        delay + spread.mul_f64(rand::rng().random_range(0.0..=1.0))
    }

    /// Whether another attempt should follow `attempt` failing with `error`
    #[must_use]
    pub fn should_retry(&self, error: &OrchestraError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default().with_jitter(false)
    }

    #[test]
    fn exponential_then_capped() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
        assert_eq!(p.backoff(4), Duration::from_secs(8));
        assert_eq!(p.backoff(5), Duration::from_secs(10));
        assert_eq!(p.backoff(60), Duration::from_secs(10));
        assert_eq!(p.delay_for(3), p.backoff(3));
    }

    #[test]
    fn only_transient_errors_retry() {
        let p = policy();
        let transient = OrchestraError::Inference("x".into());
        assert!(p.should_retry(&transient, 1));
        assert!(p.should_retry(&transient, 2));
        assert!(!p.should_retry(&transient, 3));
        assert!(!p.should_retry(&OrchestraError::Configuration("x".into()), 1));
        assert!(!RetryPolicy::no_retry().should_retry(&transient, 1));
    }

    proptest! {
        #[test]
        fn jitter_stays_within_ten_percent(attempt in 1u32..8) {
            let p = RetryPolicy::default().with_jitter(true);
            let base = p.backoff(attempt);
            let delay = p.delay_for(attempt);
            prop_assert!(delay >= base);
            prop_assert!(delay <= base + base.mul_f64(JITTER_FRACTION));
        }
    }
}
