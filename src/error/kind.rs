//! Failure classification taxonomy.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Closed classification of a failure's underlying cause.
///
/// Every observed failure maps to exactly one kind. The kind drives retry
/// eligibility through [`RetryPolicy`](crate::policy::RetryPolicy) and is the
/// primary dimension of the error statistics.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Temporary failure; also the fallback when nothing else matches.
    Transient,
    /// Will fail again no matter how often it is retried.
    Permanent,
    RateLimited,
    /// Credential or permission failure.
    Authentication,
    /// The caller sent something the dependency rejected.
    Validation,
    Network,
    ServiceUnavailable,
    QuotaExceeded,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// Kinds retried by a policy that does not name its own set.
    pub const DEFAULT_RETRYABLE: [ErrorKind; 5] = [
        ErrorKind::Transient,
        ErrorKind::RateLimited,
        ErrorKind::Network,
        ErrorKind::ServiceUnavailable,
        ErrorKind::Timeout,
    ];

    /// The default retryable set as an owned set.
    pub fn default_retryable() -> HashSet<ErrorKind> {
        Self::DEFAULT_RETRYABLE.into_iter().collect()
    }

    /// Implicit retryability, used only when no policy overrides it.
    /// `Authentication` is never retryable by default.
    pub fn is_retryable_by_default(self) -> bool {
        Self::DEFAULT_RETRYABLE.contains(&self)
    }

    /// Whether failures of this kind go to the security audit channel.
    pub fn is_security_relevant(self) -> bool {
        matches!(self, Self::Authentication)
    }

    /// All kinds in declaration order.
    pub fn all() -> impl Iterator<Item = ErrorKind> {
        Self::iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn display_and_parse_use_snake_case() {
        assert_eq!(ErrorKind::ServiceUnavailable.to_string(), "service_unavailable");
        assert_eq!(
            ErrorKind::from_str("rate_limited").unwrap(),
            ErrorKind::RateLimited
        );
        assert!(ErrorKind::from_str("nope").is_err());
    }

    #[test]
    fn default_retryable_excludes_authentication_and_caller_errors() {
        let set = ErrorKind::default_retryable();
        assert_eq!(set.len(), 5);
        assert!(!set.contains(&ErrorKind::Authentication));
        assert!(!set.contains(&ErrorKind::Validation));
        assert!(!set.contains(&ErrorKind::Permanent));
        assert!(ErrorKind::Timeout.is_retryable_by_default());
    }

    #[test]
    fn only_authentication_is_security_relevant() {
        let relevant: Vec<_> = ErrorKind::all().filter(|k| k.is_security_relevant()).collect();
        assert_eq!(relevant, vec![ErrorKind::Authentication]);
        assert_eq!(ErrorKind::all().count(), 10);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ErrorKind::QuotaExceeded).unwrap();
        assert_eq!(json, "\"quota_exceeded\"");
    }
}
