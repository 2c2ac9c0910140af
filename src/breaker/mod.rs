//! Circuit breaker guarding a single named dependency.
//!
//! # States
//! - `CLOSED`: calls pass through; consecutive failures are counted.
//! - `OPEN`: calls are rejected without invoking the operation.
//! - `HALF_OPEN`: exactly one probe call is let through.
//!
//! # Transitions
//! ```text
//! CLOSED    -> OPEN       failure_count >= failure_threshold
//! OPEN      -> HALF_OPEN  on the first call after recovery_timeout has elapsed
//! HALF_OPEN -> CLOSED     probe succeeded (failure_count = 0)
//! HALF_OPEN -> OPEN       probe failed (last_failure_time = now)
//! ```
//!
//! Admission and transitions happen under one per-breaker mutex, so the
//! "recovery timeout elapsed" check and the probe hand-out are a single
//! atomic step: two racing callers can never both become the probe.
//! Breakers for different dependencies share no lock.

pub mod clock;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::BreakerRegistry;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::error::{ResilienceError, Result};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Result<Self> {
        if failure_threshold == 0 {
            return Err(ResilienceError::Configuration(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            failure_threshold,
            recovery_timeout,
        })
    }
}

/// Rejection raised while a breaker is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker for {service} is OPEN - service unavailable")]
pub struct CircuitOpenError {
    pub service: String,
    /// Time until a probe will be admitted; `None` while a probe is in flight.
    pub retry_after: Option<Duration>,
}

/// Failure of a call made through [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum CircuitError<E> {
    /// Rejected without invoking the operation.
    Open(CircuitOpenError),
    /// The operation ran and failed.
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(open) => open.fmt(f),
            Self::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(_) => None,
            Self::Inner(e) => e.source(),
        }
    }
}

/// Point-in-time view of a breaker, for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            probe_in_flight: false,
        }
    }
}

/// Three-state guard for one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let now = self.clock.now();
        BreakerSnapshot {
            service: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout: self.config.recovery_timeout,
            since_last_failure: inner.last_failure_at.map(|t| now.saturating_duration_since(t)),
        }
    }

    /// Force the breaker back to `CLOSED`.
    pub fn reset(&self) {
        *self.lock() = BreakerInner::closed();
        tracing::info!(service = %self.name, "circuit breaker reset");
    }

    /// Ask for permission to make one call.
    ///
    /// The returned permit must be settled with [`CallPermit::succeed`] or
    /// [`CallPermit::fail`]. Dropping an unsettled probe permit hands the
    /// probe slot to the next caller without changing state.
    pub fn try_acquire(&self) -> std::result::Result<CallPermit<'_>, CircuitOpenError> {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let now = self.clock.now();
                let elapsed = inner
                    .last_failure_at
                    .map(|t| now.saturating_duration_since(t));
                match elapsed {
                    Some(elapsed) if elapsed < self.config.recovery_timeout => {
                        Err(self.open_error(Some(self.config.recovery_timeout - elapsed)))
                    }
                    _ => {
                        inner.state = CircuitState::HalfOpen;
                        inner.probe_in_flight = true;
                        tracing::info!(service = %self.name, "circuit breaker half-open, admitting probe");
                        Ok(self.permit(true))
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.open_error(None));
                }
                inner.probe_in_flight = true;
                Ok(self.permit(true))
            }
        }
    }

    /// Run `operation` through the breaker.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> std::result::Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let permit = self.try_acquire().map_err(CircuitError::Open)?;
        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Blocking counterpart of [`CircuitBreaker::call`].
    pub fn call_blocking<F, T, E>(&self, operation: F) -> std::result::Result<T, CircuitError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let permit = self.try_acquire().map_err(CircuitError::Open)?;
        match operation() {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail();
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn permit(&self, probe: bool) -> CallPermit<'_> {
        CallPermit {
            breaker: self,
            probe,
            settled: false,
        }
    }

    fn open_error(&self, retry_after: Option<Duration>) -> CircuitOpenError {
        CircuitOpenError {
            service: self.name.clone(),
            retry_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen if probe => {
                *inner = BreakerInner::closed();
                tracing::info!(service = %self.name, "circuit breaker closed after successful probe");
            }
            // Outcome of a call admitted before the breaker opened.
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock();
        let now = self.clock.now();
        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_at = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        service = %self.name,
                        failures = inner.failure_count,
                        recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if probe => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_at = Some(now);
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
                tracing::warn!(service = %self.name, "circuit breaker probe failed, reopening");
            }
            _ => {}
        }
    }

    fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
#[must_use = "settle the permit with succeed() or fail()"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}
