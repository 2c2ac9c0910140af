use std::fmt;

use crate::error::{BoxError, ErrorKind};

use super::FailureTag;

/// A failure raised by caller code, optionally pre-classified.
///
/// Use this when the message text alone would be misleading, or to produce
/// kinds the pattern table never yields (`Permanent`, `QuotaExceeded`,
/// `Unknown`).
///
/// ```
/// use resilience_engine::classify::{classify_error, OperationError};
/// use resilience_engine::error::ErrorKind;
///
/// let err = OperationError::permanent("tenant was deleted");
/// assert_eq!(classify_error(&err), ErrorKind::Permanent);
/// ```
#[derive(Debug)]
pub struct OperationError {
    message: String,
    kind: Option<ErrorKind>,
    tag: Option<FailureTag>,
    source: Option<BoxError>,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            tag: None,
            source: None,
        }
    }

    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(message)
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Permanent, message)
    }

    pub fn tagged(tag: FailureTag, message: impl Into<String>) -> Self {
        Self {
            tag: Some(tag),
            ..Self::new(message)
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn explicit_kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    pub fn tag(&self) -> Option<FailureTag> {
        self.tag
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for OperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
