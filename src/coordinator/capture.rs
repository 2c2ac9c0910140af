//! One-shot error capture for calls that are not retried.

use std::error::Error as StdError;
use std::future::Future;

use crate::classify::classify_error;
use crate::error::{ResilienceError, Result};
use crate::ledger::ErrorContext;

use super::ResilienceCoordinator;

impl ResilienceCoordinator {
    /// Run `future` once. A failure is logged to the ledger and returned as
    /// [`ResilienceError::Captured`] naming the record id.
    pub async fn capture<Fut, T, E>(
        &self,
        operation: &str,
        context: &ErrorContext,
        future: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        future.await.map_err(|e| self.captured(e, operation, context))
    }

    /// Blocking counterpart of [`capture`](Self::capture).
    pub fn capture_blocking<F, T, E>(
        &self,
        operation: &str,
        context: &ErrorContext,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: StdError + Send + Sync + 'static,
    {
        f().map_err(|e| self.captured(e, operation, context))
    }

    fn captured<E>(&self, error: E, operation: &str, context: &ErrorContext) -> ResilienceError
    where
        E: StdError + Send + Sync + 'static,
    {
        let kind = classify_error(&error);
        let error_id = self.log_classified(&error, kind, operation, context);
        ResilienceError::Captured {
            operation: operation.to_string(),
            error_id,
            kind,
            source: Box::new(error),
        }
    }
}
