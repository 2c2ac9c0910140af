//! Retry policies: attempt limits, backoff shape and retry eligibility.

pub mod backoff;
pub mod registry;

pub use backoff::{BackoffCalculator, FixedJitter, JitterSource, ThreadRngJitter};
pub use registry::PolicyRegistry;

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{ErrorKind, ResilienceError, Result};

/// Shape of the delay curve between attempts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackoffStrategy {
    FixedDelay,
    #[default]
    ExponentialBackoff,
    LinearBackoff,
    /// Exponential curve with jitter always applied.
    JitteredBackoff,
    FibonacciBackoff,
}

/// Immutable retry parameters.
///
/// Build one with [`RetryPolicy::builder`]; construction validates that
/// `max_attempts >= 1`, `backoff_multiplier >= 1` and
/// `base_delay <= max_delay`.
///
/// ```
/// use std::time::Duration;
/// use resilience_engine::policy::{BackoffStrategy, RetryPolicy};
///
/// let policy = RetryPolicy::builder()
///     .max_attempts(5)
///     .strategy(BackoffStrategy::FixedDelay)
///     .base_delay(Duration::from_millis(10))
///     .jitter(false)
///     .build()?;
/// assert_eq!(policy.max_attempts(), 5);
/// # Ok::<(), resilience_engine::error::ResilienceError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    strategy: BackoffStrategy,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
    retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    /// Three exponential attempts from 1s, capped at 60s, with jitter.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::ExponentialBackoff,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_kinds: ErrorKind::default_retryable(),
        }
    }
}

#[bon::bon]
impl RetryPolicy {
    #[builder]
    pub fn new(
        #[builder(default = 3)] max_attempts: u32,
        #[builder(default)] strategy: BackoffStrategy,
        #[builder(default = Duration::from_secs(1))] base_delay: Duration,
        #[builder(default = Duration::from_secs(60))] max_delay: Duration,
        #[builder(default = 2.0)] backoff_multiplier: f64,
        #[builder(default = true)] jitter: bool,
        #[builder(default = ErrorKind::default_retryable())] retryable_kinds: HashSet<ErrorKind>,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(ResilienceError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(ResilienceError::Configuration(format!(
                "backoff_multiplier must be a finite value >= 1, got {backoff_multiplier}"
            )));
        }
        if base_delay > max_delay {
            return Err(ResilienceError::Configuration(format!(
                "base_delay ({base_delay:?}) exceeds max_delay ({max_delay:?})"
            )));
        }

        Ok(Self {
            max_attempts,
            strategy,
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter,
            retryable_kinds,
        })
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Whether jitter was requested explicitly.
    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Whether computed delays get randomized. Always true for
    /// [`BackoffStrategy::JitteredBackoff`].
    pub fn applies_jitter(&self) -> bool {
        self.jitter || self.strategy == BackoffStrategy::JitteredBackoff
    }

    pub fn retryable_kinds(&self) -> &HashSet<ErrorKind> {
        &self.retryable_kinds
    }

    /// Decide whether a failure on the given 1-based `attempt` gets another try.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        self.retryable_kinds.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_default_policy() {
        let built = RetryPolicy::builder().build().unwrap();
        assert_eq!(built, RetryPolicy::default());
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let err = RetryPolicy::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(err, ResilienceError::Configuration(_)));
    }

    #[test]
    fn builder_rejects_base_delay_above_max() {
        let err = RetryPolicy::builder()
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(5))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds max_delay"));
    }

    #[test]
    fn builder_rejects_shrinking_multiplier() {
        assert!(RetryPolicy::builder().backoff_multiplier(0.5).build().is_err());
        assert!(RetryPolicy::builder().backoff_multiplier(f64::NAN).build().is_err());
    }

    #[test]
    fn should_retry_stops_at_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(ErrorKind::Network, 1));
        assert!(policy.should_retry(ErrorKind::Network, 2));
        assert!(!policy.should_retry(ErrorKind::Network, 3));
    }

    #[test]
    fn should_retry_respects_retryable_kinds() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(ErrorKind::Validation, 1));
        assert!(!policy.should_retry(ErrorKind::Authentication, 1));

        let with_auth = RetryPolicy::builder()
            .retryable_kinds(HashSet::from([ErrorKind::Authentication]))
            .build()
            .unwrap();
        assert!(with_auth.should_retry(ErrorKind::Authentication, 1));
        assert!(!with_auth.should_retry(ErrorKind::Network, 1));
    }

    #[test]
    fn jittered_strategy_always_applies_jitter() {
        let policy = RetryPolicy::builder()
            .strategy(BackoffStrategy::JitteredBackoff)
            .jitter(false)
            .build()
            .unwrap();
        assert!(!policy.jitter());
        assert!(policy.applies_jitter());
    }
}
