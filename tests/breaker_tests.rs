//! Circuit breaker behaviour under concurrency and through the coordinator.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use resilience_engine::breaker::{
    BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitError, CircuitState, ManualClock,
};
use resilience_engine::classify::OperationError;
use resilience_engine::coordinator::{Execution, ResilienceCoordinator};
use resilience_engine::ledger::ErrorLedger;
use resilience_engine::policy::{FixedJitter, PolicyRegistry};

fn tripped(threshold: u32, recovery: Duration) -> (Arc<CircuitBreaker>, ManualClock) {
    let clock = ManualClock::new();
    let breaker = Arc::new(CircuitBreaker::with_clock(
        "gcp",
        BreakerConfig::new(threshold, recovery).unwrap(),
        Arc::new(clock.clone()),
    ));
    for _ in 0..threshold {
        let _ = breaker.call_blocking(|| Err::<(), _>("down"));
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    (breaker, clock)
}

#[test]
fn racing_callers_get_exactly_one_probe() {
    let (breaker, clock) = tripped(3, Duration::from_secs(30));
    clock.advance(Duration::from_secs(30));

    let threads = 16;
    let barrier = Barrier::new(threads);
    let admitted = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| {
                barrier.wait();
                match breaker.try_acquire() {
                    Ok(permit) => {
                        assert!(permit.is_probe());
                        admitted.fetch_add(1, Ordering::SeqCst);
                        // Hold the probe until every thread has tried.
                        std::mem::forget(permit);
                    }
                    Err(_) => {
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(admitted.load(Ordering::SeqCst), 1);
    assert_eq!(rejected.load(Ordering::SeqCst), threads - 1);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

#[test]
fn concurrent_failures_open_the_breaker_once_threshold_is_reached() {
    let breaker = Arc::new(CircuitBreaker::new(
        "azure",
        BreakerConfig::new(10, Duration::from_secs(60)).unwrap(),
    ));

    std::thread::scope(|scope| {
        for _ in 0..10 {
            let breaker = breaker.clone();
            scope.spawn(move || {
                let _ = breaker.call_blocking(|| Err::<(), _>("boom"));
            });
        }
    });

    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.failure_count(), 10);
}

#[test]
fn full_cycle_closed_open_half_open_closed() {
    let (breaker, clock) = tripped(2, Duration::from_secs(10));
    let calls = AtomicUsize::new(0);
    let call = || {
        breaker.call_blocking(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
    };

    assert!(matches!(call(), Err(CircuitError::Open(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    clock.advance(Duration::from_secs(10));
    call().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);

    call().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn coordinator_probes_a_recovered_dependency() {
    let clock = ManualClock::new();
    let breakers = BreakerRegistry::with_presets_and_clock(Arc::new(clock.clone()));
    let policies = PolicyRegistry::with_presets();
    policies.register("once", common::fixed_policy(1, Duration::from_millis(1)));
    let c = ResilienceCoordinator::from_parts(policies, breakers, ErrorLedger::new())
        .with_jitter(Arc::new(FixedJitter(1.0)));
    let execution = Execution::builder("list_projects")
        .policy("once")
        .circuit("gcp")
        .build();

    for _ in 0..3 {
        c.run(&execution, || async {
            Err::<(), _>(OperationError::new("503 service unavailable"))
        })
        .await
        .unwrap_err();
    }
    assert_eq!(c.circuit_breaker("gcp").state(), CircuitState::Open);

    let err = c
        .run(&execution, || async { Ok::<_, OperationError>(1) })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());

    clock.advance(Duration::from_secs(30));
    let value = c
        .run(&execution, || async { Ok::<_, OperationError>(1) })
        .await
        .unwrap();
    assert_eq!(value, 1);
    assert_eq!(c.circuit_breaker("gcp").state(), CircuitState::Closed);
}

#[test]
fn lazily_created_breakers_use_the_default_thresholds() {
    let c = ResilienceCoordinator::new();
    let breaker = c.circuit_breaker("github");
    assert_eq!(breaker.config(), BreakerConfig::default());
    for _ in 0..4 {
        let _ = breaker.call_blocking(|| Err::<(), _>("down"));
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    let _ = breaker.call_blocking(|| Err::<(), _>("down"));
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(Arc::ptr_eq(&breaker, &c.circuit_breaker("github")));
}

#[tokio::test]
async fn concurrent_runs_share_a_single_half_open_probe() {
    let clock = ManualClock::new();
    let breakers = BreakerRegistry::with_presets_and_clock(Arc::new(clock.clone()));
    let policies = PolicyRegistry::with_presets();
    policies.register("once", common::fixed_policy(1, Duration::from_millis(1)));
    let c = ResilienceCoordinator::from_parts(policies, breakers, ErrorLedger::new());
    let execution = Execution::builder("embed")
        .policy("once")
        .circuit("openai")
        .build();

    let breaker = c.circuit_breaker("openai");
    for _ in 0..5 {
        let _ = breaker.call_blocking(|| Err::<(), _>("down"));
    }
    clock.advance(Duration::from_secs(60));

    let invoked = AtomicUsize::new(0);
    let results = futures::future::join_all((0..8).map(|_| {
        c.run(&execution, || async {
            invoked.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok::<_, OperationError>(())
        })
    }))
    .await;

    assert_eq!(invoked.load(Ordering::SeqCst), 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.is_circuit_open()));
    assert_eq!(breaker.state(), CircuitState::Closed);
}
