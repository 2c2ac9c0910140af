//! Retry orchestration.
//!
//! [`ResilienceCoordinator`] runs an operation, classifies each failure,
//! records it in the [`ErrorLedger`], consults the named [`RetryPolicy`] and
//! sleeps per the backoff curve before trying again. An [`Execution`] may
//! name a circuit breaker, in which case every attempt goes through that
//! breaker first and an open circuit counts as a failed attempt without
//! invoking the operation.
//!
//! Only the terminal failure reaches the caller, as
//! [`ResilienceError::Failed`].
//!
//! ```
//! use std::time::Duration;
//! use resilience_engine::coordinator::{Execution, ResilienceCoordinator};
//! use resilience_engine::classify::OperationError;
//!
//! # async fn example() -> resilience_engine::error::Result<()> {
//! let coordinator = ResilienceCoordinator::new();
//! let execution = Execution::builder("fetch_findings")
//!     .policy("cloud_api")
//!     .circuit("aws")
//!     .deadline(Duration::from_secs(90))
//!     .build();
//! let count = coordinator
//!     .run(&execution, || async { Ok::<_, OperationError>(42) })
//!     .await?;
//! assert_eq!(count, 42);
//! # Ok(())
//! # }
//! ```

mod attempt;
mod capture;

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use uuid::Uuid;

use crate::breaker::{BreakerRegistry, CircuitBreaker};
use crate::classify::classify_error;
use crate::config::EngineConfig;
use crate::error::{BoxError, ErrorKind, Result};
use crate::ledger::{ErrorContext, ErrorLedger, ErrorRecord, StatisticsReport};
use crate::policy::registry::DEFAULT_POLICY;
use crate::policy::{BackoffCalculator, JitterSource, PolicyRegistry};

use attempt::{AttemptTimeline, Next};

/// Tracing target of the security audit channel.
pub const SECURITY_AUDIT_TARGET: &str = "security_audit";

/// Default look-back of [`ResilienceCoordinator::error_statistics`].
pub const DEFAULT_STATISTICS_HOURS: u32 = 24;

/// One guarded call: what it is called, how it is retried and who made it.
#[derive(Debug, Clone, Builder)]
pub struct Execution {
    #[builder(start_fn, into)]
    pub operation: String,
    #[builder(into, default = DEFAULT_POLICY.to_string())]
    pub policy: String,
    #[builder(default)]
    pub context: ErrorContext,
    /// Circuit breaker every attempt must pass through.
    #[builder(into)]
    pub circuit: Option<String>,
    /// Overall budget; no retry is scheduled past it.
    pub deadline: Option<Duration>,
}

/// Orchestrates retries, circuit breaking and error recording.
///
/// Cloning is cheap and clones share registries and ledger.
#[derive(Debug, Clone)]
pub struct ResilienceCoordinator {
    policies: PolicyRegistry,
    breakers: BreakerRegistry,
    ledger: ErrorLedger,
    backoff: BackoffCalculator,
}

impl Default for ResilienceCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceCoordinator {
    /// Coordinator with the preset policies and breakers and an unbounded ledger.
    pub fn new() -> Self {
        Self::from_parts(
            PolicyRegistry::with_presets(),
            BreakerRegistry::with_presets(),
            ErrorLedger::new(),
        )
    }

    /// Coordinator built from presets overlaid with `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::from_parts(
            config.policy_registry()?,
            config.breaker_registry()?,
            config.ledger()?,
        ))
    }

    pub fn from_parts(policies: PolicyRegistry, breakers: BreakerRegistry, ledger: ErrorLedger) -> Self {
        Self {
            policies,
            breakers,
            ledger,
            backoff: BackoffCalculator::default(),
        }
    }

    /// Replace the jitter source used for backoff delays.
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.backoff = BackoffCalculator::new(jitter);
        self
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    pub fn backoff(&self) -> &BackoffCalculator {
        &self.backoff
    }

    /// Breaker for `service`, created on first use.
    pub fn circuit_breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers.get(service)
    }

    /// Run `operation` under the named policy.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        operation: F,
        operation_name: &str,
        policy_name: &str,
        context: ErrorContext,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let execution = Execution::builder(operation_name)
            .policy(policy_name)
            .context(context)
            .build();
        self.run(&execution, operation).await
    }

    /// Blocking counterpart of [`execute_with_retry`](Self::execute_with_retry).
    pub fn execute_with_retry_blocking<F, T, E>(
        &self,
        operation: F,
        operation_name: &str,
        policy_name: &str,
        context: ErrorContext,
    ) -> Result<T>
    where
        F: FnMut() -> std::result::Result<T, E>,
        E: StdError + Send + Sync + 'static,
    {
        let execution = Execution::builder(operation_name)
            .policy(policy_name)
            .context(context)
            .build();
        self.run_blocking(&execution, operation)
    }

    /// Run `operation` as described by `execution`.
    ///
    /// The sleep between attempts is the only suspension point added on top
    /// of the operation itself.
    pub async fn run<F, Fut, T, E>(&self, execution: &Execution, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let breaker = self.breaker_for(execution);
        let mut timeline = AttemptTimeline::new(self, execution);

        loop {
            timeline.begin();
            let outcome = match breaker.as_deref() {
                Some(breaker) => match breaker.try_acquire() {
                    Ok(permit) => match operation().await {
                        Ok(value) => {
                            permit.succeed();
                            Ok(value)
                        }
                        Err(e) => {
                            permit.fail();
                            Err(boxed(e))
                        }
                    },
                    Err(open) => Err(boxed(open)),
                },
                None => operation().await.map_err(boxed),
            };

            match outcome {
                Ok(value) => {
                    timeline.succeeded();
                    return Ok(value);
                }
                Err(error) => match timeline.failed(error.as_ref()) {
                    Next::Retry(delay) => tokio::time::sleep(delay).await,
                    Next::Stop(reason) => return Err(timeline.terminal(reason, error)),
                },
            }
        }
    }

    /// Blocking counterpart of [`run`](Self::run); sleeps the current thread.
    pub fn run_blocking<F, T, E>(&self, execution: &Execution, mut operation: F) -> Result<T>
    where
        F: FnMut() -> std::result::Result<T, E>,
        E: StdError + Send + Sync + 'static,
    {
        let breaker = self.breaker_for(execution);
        let mut timeline = AttemptTimeline::new(self, execution);

        loop {
            timeline.begin();
            let outcome = match breaker.as_deref() {
                Some(breaker) => breaker.call_blocking(&mut operation).map_err(|e| match e {
                    crate::breaker::CircuitError::Open(open) => boxed(open),
                    crate::breaker::CircuitError::Inner(inner) => boxed(inner),
                }),
                None => operation().map_err(boxed),
            };

            match outcome {
                Ok(value) => {
                    timeline.succeeded();
                    return Ok(value);
                }
                Err(error) => match timeline.failed(error.as_ref()) {
                    Next::Retry(delay) => std::thread::sleep(delay),
                    Next::Stop(reason) => return Err(timeline.terminal(reason, error)),
                },
            }
        }
    }

    /// Record a failure without retrying it. Returns the record id.
    pub fn log_error(
        &self,
        error: &(dyn StdError + 'static),
        operation: &str,
        context: &ErrorContext,
    ) -> Uuid {
        let kind = classify_error(error);
        self.log_classified(error, kind, operation, context)
    }

    pub(crate) fn log_classified(
        &self,
        error: &(dyn StdError + 'static),
        kind: ErrorKind,
        operation: &str,
        context: &ErrorContext,
    ) -> Uuid {
        let record = ErrorRecord::from_error(
            error,
            kind,
            operation,
            context,
            0,
            kind.is_retryable_by_default(),
        );
        let error_id = self.ledger.record(record);

        if matches!(kind, ErrorKind::Permanent | ErrorKind::Authentication) {
            tracing::error!(operation, %kind, %error_id, error = %error, "critical error");
        } else {
            tracing::warn!(operation, %kind, %error_id, error = %error, "error logged");
        }
        if kind.is_security_relevant() {
            tracing::warn!(
                target: SECURITY_AUDIT_TARGET,
                operation,
                %error_id,
                user_id = context.user_id.as_deref(),
                organization_id = context.organization_id.as_deref(),
                request_id = context.request_id.as_deref(),
                "authentication failure"
            );
        }
        error_id
    }

    /// Error statistics over the last `hours_back` hours.
    pub fn error_statistics(&self, hours_back: u32) -> StatisticsReport {
        self.ledger
            .statistics(Duration::from_secs(u64::from(hours_back) * 3600))
    }

    fn breaker_for(&self, execution: &Execution) -> Option<Arc<CircuitBreaker>> {
        execution
            .circuit
            .as_deref()
            .map(|service| self.breakers.get(service))
    }
}

fn boxed<E: StdError + Send + Sync + 'static>(error: E) -> BoxError {
    Box::new(error)
}
