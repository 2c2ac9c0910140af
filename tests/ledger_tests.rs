//! Ledger recording and statistics.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;

use resilience_engine::classify::OperationError;
use resilience_engine::config::EngineConfig;
use resilience_engine::coordinator::ResilienceCoordinator;
use resilience_engine::error::{ErrorKind, ResilienceError};
use resilience_engine::ledger::{ErrorContext, ErrorLedger, ErrorRecord};

#[test]
fn concurrent_appends_are_all_kept() {
    let ledger = Arc::new(ErrorLedger::new());

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let ledger = ledger.clone();
            scope.spawn(move || {
                for _ in 0..50 {
                    let err = OperationError::new("503");
                    ledger.record(ErrorRecord::from_error(
                        &err,
                        ErrorKind::ServiceUnavailable,
                        &format!("worker-{worker}"),
                        &ErrorContext::default(),
                        1,
                        true,
                    ));
                }
            });
        }
    });

    let report = ledger.statistics(Duration::from_secs(60));
    assert_eq!(report.total_errors, 400);
    assert_eq!(report.counts_by_operation.len(), 8);
    assert_eq!(report.counts_by_kind[&ErrorKind::ServiceUnavailable], 400);
}

#[test]
fn statistics_at_a_fixed_instant() {
    let ledger = ErrorLedger::new();
    let err = OperationError::new("timed out");
    let mut old = ErrorRecord::from_error(
        &err,
        ErrorKind::Timeout,
        "backup",
        &ErrorContext::default(),
        1,
        true,
    );
    old.timestamp = Utc::now() - chrono::Duration::hours(3);
    ledger.record(old);

    let now = Utc::now();
    assert_eq!(ledger.statistics_at(now, Duration::from_secs(3600)).total_errors, 0);
    assert_eq!(
        ledger
            .statistics_at(now, Duration::from_secs(4 * 3600))
            .total_errors,
        1
    );
}

#[test]
fn coordinator_statistics_aggregate_logged_errors() {
    let c = ResilienceCoordinator::new();
    let ctx = ErrorContext::builder().agent_id("scanner-1").build();
    for message in ["503", "429", "429", "connection refused"] {
        c.log_error(&OperationError::new(message), "crawl", &ctx);
    }
    c.log_error(&OperationError::new("429"), "index", &ctx);

    let report = c.error_statistics(1);
    assert_eq!(report.total_errors, 5);
    assert_eq!(report.window_secs, 3600);
    assert_eq!(report.most_common_kind, Some(ErrorKind::RateLimited));
    assert_eq!(report.most_failing_operation.as_deref(), Some("crawl"));
    assert_eq!(report.counts_by_kind[&ErrorKind::Network], 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["counts_by_kind"]["rate_limited"], 3);
    assert_eq!(json["most_failing_operation"], "crawl");
}

#[test]
fn configured_retention_keeps_the_default_statistics_window_intact() {
    let err = EngineConfig::from_toml_str("[ledger]\nretention_hours = 1\n").unwrap_err();
    assert!(matches!(err, ResilienceError::Configuration(_)), "{err}");

    let config = EngineConfig::from_toml_str("[ledger]\nretention_hours = 24\n").unwrap();
    let c = ResilienceCoordinator::from_config(&config).unwrap();
    let mut earlier = ErrorRecord::from_error(
        &OperationError::new("503 service unavailable"),
        ErrorKind::ServiceUnavailable,
        "render",
        &ErrorContext::default(),
        1,
        true,
    );
    earlier.timestamp = Utc::now() - chrono::Duration::hours(2);
    c.ledger().record(earlier);
    c.log_error(&OperationError::new("503"), "render", &ErrorContext::default());

    let report = c.error_statistics(24);
    assert_eq!(report.total_errors, 2);
    assert_eq!(report.counts_by_operation["render"], 2);
}

#[test]
fn records_serialize_with_context() {
    let c = ResilienceCoordinator::new();
    let ctx = ErrorContext::builder()
        .user_id("u-1")
        .request_id("req-1")
        .build();
    let id = c.log_error(&OperationError::new("bad request"), "submit", &ctx);

    let record = c.ledger().get(id).unwrap();
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["kind"], "validation");
    assert_eq!(json["context"]["user_id"], "u-1");
    assert_eq!(json["retry_attempt"], 0);

    let back: ErrorRecord = serde_json::from_value(json).unwrap();
    assert_eq!(back, record);
}
