//! Error types for the resilience engine.

pub mod kind;

pub use kind::ErrorKind;

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use uuid::Uuid;

use crate::breaker::CircuitOpenError;

/// Boxed error produced by a wrapped operation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a retry loop gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[strum(serialize = "retries exhausted")]
    RetriesExhausted,
    #[strum(serialize = "not retryable")]
    NotRetryable,
    #[strum(serialize = "deadline exceeded")]
    DeadlineExceeded,
}

/// Primary error type for all engine operations.
///
/// The terminal variants never render the wrapped error or its trace, so
/// their text is safe for user-facing surfaces. The wrapped error remains
/// reachable through [`std::error::Error::source`].
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(
        "Operation {operation} failed after {attempts} {noun}: {reason} ({kind})",
        noun = attempt_noun(.attempts)
    )]
    Failed {
        operation: String,
        attempts: u32,
        kind: ErrorKind,
        reason: StopReason,
        error_id: Uuid,
        #[source]
        source: BoxError,
    },

    #[error("Operation {operation} failed (ID: {error_id})")]
    Captured {
        operation: String,
        error_id: Uuid,
        kind: ErrorKind,
        #[source]
        source: BoxError,
    },
}

fn attempt_noun(attempts: &u32) -> &'static str {
    if *attempts == 1 {
        "attempt"
    } else {
        "attempts"
    }
}

impl ResilienceError {
    /// Classified kind of the underlying failure, when there is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed { kind, .. } | Self::Captured { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Number of attempts made before a terminal failure.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Failed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Ledger id of the last recorded failure.
    pub fn error_id(&self) -> Option<Uuid> {
        match self {
            Self::Failed { error_id, .. } | Self::Captured { error_id, .. } => Some(*error_id),
            _ => None,
        }
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Self::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Whether the last attempt was rejected by an open circuit breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Failed { source, .. } if source.is::<CircuitOpenError>())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ResilienceError>;
