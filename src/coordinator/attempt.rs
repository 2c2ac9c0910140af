//! Per-call attempt bookkeeping shared by the async and blocking loops.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::classify::classify_error;
use crate::error::{BoxError, ErrorKind, ResilienceError, StopReason};
use crate::ledger::ErrorRecord;
use crate::policy::RetryPolicy;

use super::{Execution, ResilienceCoordinator, SECURITY_AUDIT_TARGET};

/// What the loop does after a failed attempt.
pub(crate) enum Next {
    Retry(Duration),
    Stop(StopReason),
}

/// Attempt counter and timeline owned by one call.
pub(crate) struct AttemptTimeline<'a> {
    coordinator: &'a ResilienceCoordinator,
    execution: &'a Execution,
    policy: Arc<RetryPolicy>,
    started: Instant,
    attempt: u32,
    last: Option<(ErrorKind, Uuid)>,
}

impl<'a> AttemptTimeline<'a> {
    pub(crate) fn new(coordinator: &'a ResilienceCoordinator, execution: &'a Execution) -> Self {
        Self {
            coordinator,
            execution,
            policy: coordinator.policies().resolve(&execution.policy),
            started: Instant::now(),
            attempt: 0,
            last: None,
        }
    }

    /// Start the next attempt and return its 1-based number.
    pub(crate) fn begin(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub(crate) fn succeeded(&self) {
        if self.attempt > 1 {
            tracing::info!(
                operation = %self.execution.operation,
                attempt = self.attempt,
                "operation succeeded after retry"
            );
        }
    }

    /// Classify and record a failed attempt, then decide what happens next.
    pub(crate) fn failed(&mut self, error: &(dyn StdError + 'static)) -> Next {
        let operation = self.execution.operation.as_str();
        let context = &self.execution.context;
        let attempt = self.attempt;
        let max_attempts = self.policy.max_attempts();

        let kind = classify_error(error);
        let retryable = self.policy.should_retry(kind, attempt);
        let record = ErrorRecord::from_error(error, kind, operation, context, attempt, retryable);
        let error_id = self.coordinator.ledger().record(record);
        self.last = Some((kind, error_id));

        tracing::warn!(
            operation,
            %kind,
            attempt,
            max_attempts,
            %error_id,
            error = %error,
            "operation attempt failed"
        );
        if kind.is_security_relevant() {
            tracing::warn!(
                target: SECURITY_AUDIT_TARGET,
                operation,
                attempt,
                %error_id,
                user_id = context.user_id.as_deref(),
                organization_id = context.organization_id.as_deref(),
                request_id = context.request_id.as_deref(),
                "authentication failure"
            );
        }

        if !retryable {
            let reason = if attempt >= max_attempts {
                StopReason::RetriesExhausted
            } else {
                StopReason::NotRetryable
            };
            return self.stop(reason);
        }

        let delay = self.coordinator.backoff().delay(&self.policy, attempt);
        if let Some(deadline) = self.execution.deadline {
            if self.started.elapsed() + delay >= deadline {
                return self.stop(StopReason::DeadlineExceeded);
            }
        }

        tracing::info!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying operation"
        );
        Next::Retry(delay)
    }

    fn stop(&self, reason: StopReason) -> Next {
        let kind = self.last.map(|(kind, _)| kind);
        tracing::error!(
            operation = %self.execution.operation,
            attempts = self.attempt,
            kind = ?kind,
            %reason,
            "operation failed"
        );
        Next::Stop(reason)
    }

    /// Terminal failure wrapping the last observed error.
    pub(crate) fn terminal(self, reason: StopReason, source: BoxError) -> ResilienceError {
        let (kind, error_id) = self
            .last
            .unwrap_or((ErrorKind::Unknown, Uuid::nil()));
        ResilienceError::Failed {
            operation: self.execution.operation.clone(),
            attempts: self.attempt,
            kind,
            reason,
            error_id,
            source,
        }
    }
}
