//! Failure classification.
//!
//! Classification is a pure function of a normalized `(message, tag)` pair.
//! The message is matched against an ordered pattern table; the first group
//! with a matching substring wins. Only when no pattern matches is the
//! structural [`FailureTag`] consulted, and only when neither yields a kind
//! does the result fall back to [`ErrorKind::Transient`].
//!
//! Group order is significant because messages routinely contain substrings
//! of several groups: `"504 gateway timeout"` must land in
//! [`ErrorKind::ServiceUnavailable`], not [`ErrorKind::Timeout`].

mod failure;

pub use failure::OperationError;

use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ErrorKind;

/// Structural category of a failure, independent of its message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureTag {
    /// Connectivity or OS-level I/O failure.
    Connectivity,
    /// Deadline or timeout elapsed.
    Deadline,
    PermissionDenied,
    InvalidArgument,
}

impl FailureTag {
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::Connectivity => ErrorKind::Network,
            Self::Deadline => ErrorKind::Timeout,
            Self::PermissionDenied => ErrorKind::Authentication,
            Self::InvalidArgument => ErrorKind::Validation,
        }
    }
}

/// Ordered message patterns. Matching is done on lower-cased text.
pub const MESSAGE_PATTERNS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Network,
        &[
            "connection refused",
            "connection timeout",
            "network unreachable",
            "dns resolution failed",
            "socket timeout",
            "connection reset",
        ],
    ),
    (
        ErrorKind::ServiceUnavailable,
        &[
            "service unavailable",
            "502 bad gateway",
            "503 service unavailable",
            "504 gateway timeout",
            "internal server error",
            "bad gateway",
            "gateway timeout",
            "502",
            "503",
            "504",
        ],
    ),
    (
        ErrorKind::RateLimited,
        &[
            "rate limit",
            "too many requests",
            "429",
            "quota exceeded",
            "throttled",
            "rate exceeded",
        ],
    ),
    (
        ErrorKind::Authentication,
        &[
            "unauthorized",
            "authentication failed",
            "invalid credentials",
            "access denied",
            "forbidden",
            "401",
            "403",
        ],
    ),
    (
        ErrorKind::Timeout,
        &["timeout", "timed out", "deadline exceeded", "request timeout"],
    ),
    (
        ErrorKind::Validation,
        &[
            "validation error",
            "invalid input",
            "bad request",
            "400",
            "missing required",
            "invalid format",
        ],
    ),
];

/// Classify a normalized failure. Never fails.
pub fn classify(message: &str, tag: Option<FailureTag>) -> ErrorKind {
    match_message(message)
        .or_else(|| tag.map(FailureTag::kind))
        .unwrap_or(ErrorKind::Transient)
}

/// Match `message` against [`MESSAGE_PATTERNS`] only.
pub fn match_message(message: &str) -> Option<ErrorKind> {
    let lowered = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| lowered.contains(p)))
        .map(|(kind, _)| *kind)
}

/// Classify an arbitrary error by walking its source chain.
///
/// An [`OperationError`] carrying an explicit kind anywhere in the chain
/// short-circuits classification.
pub fn classify_error(error: &(dyn StdError + 'static)) -> ErrorKind {
    if let Some(kind) = chain(error).find_map(|e| {
        e.downcast_ref::<OperationError>()
            .and_then(OperationError::explicit_kind)
    }) {
        return kind;
    }

    let tag = chain(error).find_map(structural_tag);
    classify(&render_chain(error), tag)
}

/// Render an error and its sources as `outer: inner: root`.
pub fn render_chain(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut previous = rendered.clone();
    for cause in chain(error).skip(1) {
        let text = cause.to_string();
        // Transparent wrappers repeat their inner message.
        if text != previous {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        previous = text;
    }
    rendered
}

fn chain<'a>(
    error: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(error), |&e| e.source())
}

fn structural_tag(error: &(dyn StdError + 'static)) -> Option<FailureTag> {
    if let Some(op) = error.downcast_ref::<OperationError>() {
        return op.tag();
    }
    if let Some(io) = error.downcast_ref::<std::io::Error>() {
        return Some(io_tag(io.kind()));
    }
    if error.is::<tokio::time::error::Elapsed>() {
        return Some(FailureTag::Deadline);
    }
    if error.is::<std::num::ParseIntError>()
        || error.is::<std::num::ParseFloatError>()
        || error.is::<std::str::ParseBoolError>()
        || error.is::<std::str::Utf8Error>()
        || error.is::<std::string::FromUtf8Error>()
        || error.is::<serde_json::Error>()
    {
        return Some(FailureTag::InvalidArgument);
    }
    None
}

fn io_tag(kind: std::io::ErrorKind) -> FailureTag {
    use std::io::ErrorKind as Io;
    match kind {
        Io::TimedOut => FailureTag::Deadline,
        Io::PermissionDenied => FailureTag::PermissionDenied,
        Io::InvalidInput | Io::InvalidData => FailureTag::InvalidArgument,
        _ => FailureTag::Connectivity,
    }
}
