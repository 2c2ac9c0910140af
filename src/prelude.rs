//! Convenience re-exports for common use.

pub use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitOpenError, CircuitState};
pub use crate::classify::{classify, classify_error, FailureTag, OperationError};
pub use crate::config::EngineConfig;
pub use crate::coordinator::{Execution, ResilienceCoordinator};
pub use crate::error::{ErrorKind, ResilienceError, Result, StopReason};
pub use crate::ledger::{ErrorContext, ErrorRecord, StatisticsReport};
pub use crate::policy::{BackoffStrategy, RetryPolicy};
