//! Shared test helpers: deterministic coordinators, scripted operations and
//! a tracing layer that records emitted events.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use resilience_engine::classify::OperationError;
use resilience_engine::coordinator::ResilienceCoordinator;
use resilience_engine::policy::{BackoffStrategy, FixedJitter, RetryPolicy};

/// Coordinator with presets and jitter pinned to 1.0.
pub fn coordinator() -> ResilienceCoordinator {
    ResilienceCoordinator::new().with_jitter(Arc::new(FixedJitter(1.0)))
}

/// Jitter-free policy with a fixed delay.
pub fn fixed_policy(max_attempts: u32, delay: Duration) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .strategy(BackoffStrategy::FixedDelay)
        .base_delay(delay)
        .max_delay(delay.max(Duration::from_secs(60)))
        .jitter(false)
        .build()
        .unwrap()
}

/// Operation that fails with the scripted messages in order, then succeeds.
#[derive(Clone, Default)]
pub struct Scripted {
    failures: Arc<Vec<String>>,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    pub fn new(failures: &[&str]) -> Self {
        Self {
            failures: Arc::new(failures.iter().map(|s| s.to_string()).collect()),
            calls: Arc::default(),
        }
    }

    /// Always fails with `message`.
    pub fn always(message: &str) -> Self {
        Self::new(&[message; 64])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn next(&self) -> Result<usize, OperationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.get(call) {
            Some(message) => Err(OperationError::new(message.clone())),
            None => Ok(call + 1),
        }
    }

    pub async fn next_async(self) -> Result<usize, OperationError> {
        tokio::task::yield_now().await;
        self.next()
    }
}

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub target: String,
    pub level: Level,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    pub fn message(&self) -> &str {
        self.fields.get("message").map(String::as_str).unwrap_or("")
    }
}

/// Tracing layer that keeps every event it sees.
#[derive(Clone, Default)]
pub struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCapture {
    /// Install as the thread-local default; events stop being captured when
    /// the guard is dropped.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn on_target(&self, target: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.target == target)
            .collect()
    }

    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.message() == message)
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = FieldMap::default();
        event.record(&mut fields);
        self.events.lock().unwrap().push(CapturedEvent {
            target: event.metadata().target().to_string(),
            level: *event.metadata().level(),
            fields: fields.0,
        });
    }
}

#[derive(Default)]
struct FieldMap(HashMap<String, String>);

impl Visit for FieldMap {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}
