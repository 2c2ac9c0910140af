//! Delay computation between attempts.
//!
//! The pre-jitter delay for a 1-based `attempt` is:
//!
//! | strategy              | delay                                   |
//! |-----------------------|-----------------------------------------|
//! | `FixedDelay`          | `base`                                  |
//! | `ExponentialBackoff`  | `base × multiplier^(attempt − 1)`       |
//! | `JitteredBackoff`     | same as exponential, always jittered    |
//! | `LinearBackoff`       | `base × attempt`                        |
//! | `FibonacciBackoff`    | `base` for attempts 1–2, then `base × fib` |
//!
//! Jitter multiplies the delay by a factor in `[0.5, 1.5)` drawn from a
//! [`JitterSource`]. The result is clamped to `[0, max_delay]`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::{BackoffStrategy, RetryPolicy};

/// Lower bound (inclusive) of the jitter factor.
pub const JITTER_MIN: f64 = 0.5;
/// Upper bound (exclusive) of the jitter factor.
pub const JITTER_MAX: f64 = 1.5;

/// Source of jitter factors in `[JITTER_MIN, JITTER_MAX)`.
pub trait JitterSource: Send + Sync {
    fn factor(&self) -> f64;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn factor(&self) -> f64 {
        rand::rng().random_range(JITTER_MIN..JITTER_MAX)
    }
}

/// Constant jitter factor, for deterministic delays.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn factor(&self) -> f64 {
        self.0
    }
}

/// Computes retry delays for a [`RetryPolicy`].
#[derive(Clone)]
pub struct BackoffCalculator {
    jitter: Arc<dyn JitterSource>,
}

impl fmt::Debug for BackoffCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffCalculator").finish_non_exhaustive()
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(Arc::new(ThreadRngJitter))
    }
}

impl BackoffCalculator {
    pub fn new(jitter: Arc<dyn JitterSource>) -> Self {
        Self { jitter }
    }

    /// Delay to wait before retrying after the given 1-based `attempt`.
    pub fn delay(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        let mut secs = Self::base_secs(policy, attempt);
        if policy.applies_jitter() {
            secs *= self.jitter.factor();
        }
        clamp(secs, policy.max_delay())
    }

    /// Delay before jitter, clamped to `max_delay`.
    pub fn undisturbed_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        clamp(Self::base_secs(policy, attempt), policy.max_delay())
    }

    fn base_secs(policy: &RetryPolicy, attempt: u32) -> f64 {
        let attempt = attempt.max(1);
        let base = policy.base_delay().as_secs_f64();
        match policy.strategy() {
            BackoffStrategy::FixedDelay => base,
            BackoffStrategy::ExponentialBackoff | BackoffStrategy::JitteredBackoff => {
                let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
                base * policy.backoff_multiplier().powi(exponent)
            }
            BackoffStrategy::LinearBackoff => base * f64::from(attempt),
            BackoffStrategy::FibonacciBackoff => base * fibonacci_factor(attempt),
        }
    }
}

/// Fibonacci multiplier: 1 for attempts 1–2, then `b` after `attempt − 2`
/// steps of `(a, b) = (b, a + b)` from `(1, 1)`.
fn fibonacci_factor(attempt: u32) -> f64 {
    if attempt <= 2 {
        return 1.0;
    }
    let (mut a, mut b) = (1.0_f64, 1.0_f64);
    for _ in 0..(attempt - 2) {
        (a, b) = (b, a + b);
        if !b.is_finite() {
            break;
        }
    }
    b
}

fn clamp(secs: f64, max: Duration) -> Duration {
    let max_secs = max.as_secs_f64();
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    if !secs.is_finite() || secs >= max_secs {
        return max;
    }
    Duration::from_nanos((secs * 1e9).round() as u64)
}
