//! In-memory error history and statistics.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::render_chain;
use crate::error::ErrorKind;

/// Caller identity attached to failures. All fields are opaque ids.
///
/// ```
/// use resilience_engine::ledger::ErrorContext;
///
/// let ctx = ErrorContext::builder()
///     .user_id("u-17")
///     .request_id("req-9f2")
///     .build();
/// assert_eq!(ctx.user_id.as_deref(), Some("u-17"));
/// assert!(ctx.agent_id.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Builder, Serialize, Deserialize)]
pub struct ErrorContext {
    #[builder(into)]
    pub user_id: Option<String>,
    #[builder(into)]
    pub organization_id: Option<String>,
    #[builder(into)]
    pub agent_id: Option<String>,
    #[builder(into)]
    pub request_id: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One observed failure. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Time-ordered (UUIDv7).
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub operation: String,
    pub context: ErrorContext,
    pub message: String,
    /// Rendered source chain, plus a backtrace when capture is enabled.
    pub trace: String,
    /// 1-based attempt number; 0 for failures logged outside a retry loop.
    pub retry_attempt: u32,
    pub is_retryable: bool,
}

impl ErrorRecord {
    pub fn from_error(
        error: &(dyn StdError + 'static),
        kind: ErrorKind,
        operation: &str,
        context: &ErrorContext,
        retry_attempt: u32,
        is_retryable: bool,
    ) -> Self {
        let mut trace = render_chain(error);
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            trace.push('\n');
            trace.push_str(&backtrace.to_string());
        }

        Self {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            kind,
            operation: operation.to_string(),
            context: context.clone(),
            message: error.to_string(),
            trace,
            retry_attempt,
            is_retryable,
        }
    }
}

/// Aggregated view of the ledger over a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsReport {
    pub total_errors: usize,
    pub window_secs: u64,
    pub counts_by_kind: BTreeMap<ErrorKind, usize>,
    pub counts_by_operation: BTreeMap<String, usize>,
    /// Ties go to the kind declared first in [`ErrorKind`].
    pub most_common_kind: Option<ErrorKind>,
    /// Ties go to the lexicographically smallest name.
    pub most_failing_operation: Option<String>,
}

/// Append-only store of [`ErrorRecord`]s.
///
/// Records are kept in arrival order. With a retention window set, records
/// older than the window are dropped on append. Pruning never reaches inside
/// the widest window a statistics query has asked for, so a query always sees
/// every record it covers.
#[derive(Debug, Clone, Default)]
pub struct ErrorLedger {
    records: Arc<RwLock<VecDeque<ErrorRecord>>>,
    retention: Option<Duration>,
    /// Seconds.
    widest_window: Arc<AtomicU64>,
}

impl ErrorLedger {
    /// Unbounded ledger.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            records: Arc::default(),
            retention: Some(retention),
            widest_window: Arc::default(),
        }
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    /// Append a record and return its id.
    pub fn record(&self, record: ErrorRecord) -> Uuid {
        let id = record.id;
        let mut records = self.write();
        records.push_back(record);
        if let Some(cutoff) = self.horizon().and_then(|h| cutoff(Utc::now(), h)) {
            // Callers may backdate records, so arrival order is not time order.
            records.retain(|r| r.timestamp >= cutoff);
        }
        id
    }

    /// Statistics over the last `window`.
    pub fn statistics(&self, window: Duration) -> StatisticsReport {
        self.statistics_at(Utc::now(), window)
    }

    /// Statistics over `window` ending at `now`.
    pub fn statistics_at(&self, now: DateTime<Utc>, window: Duration) -> StatisticsReport {
        self.widest_window.fetch_max(window.as_secs(), Ordering::Relaxed);
        let since = cutoff(now, window);
        let records = self.read();

        let mut counts_by_kind = BTreeMap::new();
        let mut counts_by_operation = BTreeMap::new();
        let mut total_errors = 0;
        for record in records
            .iter()
            .filter(|r| since.map_or(true, |since| r.timestamp >= since))
        {
            total_errors += 1;
            *counts_by_kind.entry(record.kind).or_insert(0) += 1;
            *counts_by_operation
                .entry(record.operation.clone())
                .or_insert(0) += 1;
        }

        StatisticsReport {
            total_errors,
            window_secs: window.as_secs(),
            most_common_kind: most_frequent(&counts_by_kind),
            most_failing_operation: most_frequent(&counts_by_operation),
            counts_by_kind,
            counts_by_operation,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<ErrorRecord> {
        self.read().iter().find(|r| r.id == id).cloned()
    }

    /// Records for one operation, in arrival order.
    pub fn records_for(&self, operation: &str) -> Vec<ErrorRecord> {
        self.read()
            .iter()
            .filter(|r| r.operation == operation)
            .cloned()
            .collect()
    }

    /// Copy of every record, in arrival order.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every record older than `cutoff`. Returns how many were removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.write();
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        before - records.len()
    }

    /// Age past which appends may drop records.
    fn horizon(&self) -> Option<Duration> {
        let widest = Duration::from_secs(self.widest_window.load(Ordering::Relaxed));
        self.retention.map(|retention| retention.max(widest))
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<ErrorRecord>> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<ErrorRecord>> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `now - window`, or `None` when the window reaches past representable time.
fn cutoff(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
}

fn most_frequent<K: Clone + Ord>(counts: &BTreeMap<K, usize>) -> Option<K> {
    counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(key, _)| key.clone())
}
