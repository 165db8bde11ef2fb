//! Retry policy with capped exponential backoff and full jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::job::saturating_millis;
use super::JobError;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};

/// Configuration for job retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first one (>= 1)
    max_attempts: u32,
    /// Backoff base in milliseconds
    base_delay_ms: u64,
    /// Ceiling for any single delay in milliseconds (>= base)
    max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 700,
        }
    }
}

impl RetryPolicy {
    /// Create a validated policy.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Result<Self> {
        let base_delay_ms = u64::try_from(base_delay.as_millis()).map_err(|_| {
            SchedulerError::invalid_configuration("base_delay does not fit in u64 milliseconds")
        })?;
        let max_delay_ms = u64::try_from(max_delay.as_millis()).map_err(|_| {
            SchedulerError::invalid_configuration("max_delay does not fit in u64 milliseconds")
        })?;

        if max_attempts == 0 {
            return Err(SchedulerError::invalid_configuration(
                "max_attempts must be at least 1",
            ));
        }
        if max_delay_ms < base_delay_ms {
            return Err(SchedulerError::invalid_configuration(
                "max_delay must not be smaller than base_delay",
            )
            .with_context("base_delay_ms", base_delay_ms)
            .with_context("max_delay_ms", max_delay_ms));
        }

        Ok(Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        })
    }

    /// Build the policy described by a scheduler configuration.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check if another attempt should follow the failed `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, error: &JobError) -> bool {
        attempt < self.max_attempts && error.retryable
    }

    /// Upper bound of the jitter window after `attempt`:
    /// `min(max_delay, base_delay * 2^(attempt - 1))`.
    pub fn backoff_cap(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let cap = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(cap)
    }

    /// Delay before the attempt that follows `attempt`, drawn from the thread RNG.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_for_attempt_with(attempt, &mut rand::rng())
    }

    /// Delay drawn uniformly from `[0, backoff_cap(attempt)]` using `rng`.
    pub fn delay_for_attempt_with<R>(&self, attempt: u32, rng: &mut R) -> Duration
    where
        R: Rng,
    {
        let cap = saturating_millis(self.backoff_cap(attempt));
        Duration::from_millis(rng.random_range(0..=cap))
    }
}

impl TryFrom<&SchedulerConfig> for RetryPolicy {
    type Error = SchedulerError;

    fn try_from(config: &SchedulerConfig) -> Result<Self> {
        Self::from_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy(base: u64, max: u64) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(base), Duration::from_millis(max)).unwrap()
    }

    #[test]
    fn test_backoff_cap_doubles_until_ceiling() {
        let policy = policy(100, 700);
        assert_eq!(policy.backoff_cap(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_cap(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_cap(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_cap(4), Duration::from_millis(700));
        assert_eq!(policy.backoff_cap(80), Duration::from_millis(700));
    }

    #[test]
    fn test_backoff_cap_does_not_overflow() {
        let policy = policy(u64::MAX / 2, u64::MAX);
        assert_eq!(policy.backoff_cap(64), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_delay_within_jitter_window() {
        let policy = policy(100, 700);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..=5 {
            let cap = policy.backoff_cap(attempt);
            for _ in 0..200 {
                assert!(policy.delay_for_attempt_with(attempt, &mut rng) <= cap);
            }
        }
    }

    #[test]
    fn test_seeded_delays_are_reproducible() {
        let policy = policy(100, 700);
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for attempt in 1..=4 {
            assert_eq!(
                policy.delay_for_attempt_with(attempt, &mut a),
                policy.delay_for_attempt_with(attempt, &mut b)
            );
        }
    }

    #[test]
    fn test_zero_base_delay_yields_zero() {
        let policy = policy(0, 0);
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        let transient = JobError::retryable("flaky");
        let fatal = JobError::fatal("broken");

        assert!(policy.should_retry(1, &transient));
        assert!(policy.should_retry(2, &transient));
        assert!(!policy.should_retry(3, &transient));
        assert!(!policy.should_retry(1, &fatal));
        assert!(!RetryPolicy::no_retry().should_retry(1, &transient));
    }

    #[test]
    fn test_invalid_policies() {
        assert!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).is_err());
        assert!(RetryPolicy::new(
            3,
            Duration::from_millis(500),
            Duration::from_millis(100)
        )
        .is_err());
    }

    #[test]
    fn test_oversized_delays_are_rejected() {
        let error = RetryPolicy::new(3, Duration::ZERO, Duration::MAX).unwrap_err();
        assert!(matches!(error.code(), ErrorCode::InvalidConfiguration));

        // Rejected for overflow before the ordering check runs.
        assert!(RetryPolicy::new(3, Duration::MAX, Duration::from_millis(700)).is_err());
    }

    #[test]
    fn test_from_config() {
        let config = SchedulerConfig::new(2)
            .with_max_attempts(5)
            .with_base_delay_ms(10)
            .with_max_delay_ms(50);
        let policy = RetryPolicy::try_from(&config).unwrap();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.base_delay(), Duration::from_millis(10));
        assert_eq!(policy.max_delay(), Duration::from_millis(50));
    }
}
