//! Integration tests for resilience module
//!
//! Exercises circuit breakers and backoff from the outside, including
//! contention across threads.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tourlink_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitTransition, ExponentialBackoff,
    MockClock, ResilienceError, TransitionObserver,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Failure {
    Server,
    RateLimited,
}

#[derive(Default)]
struct TransitionLog(Mutex<Vec<CircuitTransition>>);

impl TransitionObserver for TransitionLog {
    fn on_transition(&self, transition: &CircuitTransition) {
        self.0.lock().unwrap().push(transition.clone());
    }
}

async fn call_dependency(
    breaker: &CircuitBreaker<Failure>,
    healthy: &AtomicBool,
) -> Result<(), ResilienceError<std::io::Error>> {
    breaker
        .execute(
            |_: &std::io::Error| Failure::Server,
            || async {
                if healthy.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err(std::io::Error::other("dependency down"))
                }
            },
        )
        .await
}

fn config(threshold: u32, recovery: Duration) -> CircuitBreakerConfig<Failure> {
    CircuitBreakerConfig::builder()
        .failure_threshold(threshold)
        .recovery_timeout(recovery)
        .exclude(Failure::RateLimited)
        .build()
        .expect("valid breaker config")
}

/// Validates that breakers guarding different dependencies never share
/// state.
///
/// # Test Steps
/// 1. Create two breakers on the same clock and observer
/// 2. Trip the first one
/// 3. Verify the second still admits calls and reported no transition
#[tokio::test(flavor = "multi_thread")]
async fn test_breakers_are_independent() {
    let clock = MockClock::new();
    let log = Arc::new(TransitionLog::default());

    let crm = CircuitBreaker::with_clock("crm-api", config(2, Duration::from_secs(60)), clock.shared())
        .expect("breaker builds")
        .with_observer(log.clone());
    let routing =
        CircuitBreaker::with_clock("route-optimizer", config(2, Duration::from_secs(60)), clock.shared())
            .expect("breaker builds")
            .with_observer(log.clone());

    for _ in 0..2 {
        let _ = crm.try_acquire().expect("closed").record_failure(Failure::Server);
    }

    assert_eq!(crm.state(), CircuitState::Open);
    assert_eq!(routing.state(), CircuitState::Closed);
    assert!(routing.try_acquire().is_ok());

    let log = log.0.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].breaker, "crm-api");
}

/// Validates that only one half-open trial is admitted when many tasks race
/// for it.
///
/// # Test Steps
/// 1. Open a breaker and let its recovery timeout elapse
/// 2. Spawn 32 tasks that each try to acquire a permit and hold it briefly
/// 3. Verify exactly one task obtained the trial permit
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_trial_under_contention() {
    let clock = MockClock::new();
    let breaker = Arc::new(
        CircuitBreaker::with_clock("crm-api", config(1, Duration::from_secs(5)), clock.shared())
            .expect("breaker builds"),
    );
    let _ = breaker.try_acquire().expect("closed").record_failure(Failure::Server);
    clock.advance(Duration::from_secs(5));

    let admitted = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();
    for _ in 0..32 {
        let breaker = Arc::clone(&breaker);
        let admitted = Arc::clone(&admitted);
        handles.push(tokio::spawn(async move {
            if let Ok(permit) = breaker.try_acquire() {
                if permit.is_trial() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                permit.record_success();
            }
        }));
    }
    for handle in handles {
        handle.await.expect("task completes");
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates the full open, probe, reopen, probe, close cycle against a
/// simulated dependency outage.
///
/// # Test Steps
/// 1. Fail three times to open the breaker (threshold 3)
/// 2. Probe after the timeout while the dependency is still down
/// 3. Probe again after a second timeout once it has recovered
/// 4. Verify the breaker closed and accumulated open time across both spans
#[tokio::test(flavor = "multi_thread")]
async fn test_outage_recovery_cycle() {
    let clock = MockClock::new();
    let breaker =
        CircuitBreaker::with_clock("crm-mcp", config(3, Duration::from_secs(120)), clock.shared())
            .expect("breaker builds");
    let healthy = AtomicBool::new(false);

    for _ in 0..3 {
        assert!(call_dependency(&breaker, &healthy).await.is_err());
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(120));
    assert!(call_dependency(&breaker, &healthy).await.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);

    healthy.store(true, Ordering::SeqCst);
    clock.advance(Duration::from_secs(119));
    assert!(call_dependency(&breaker, &healthy).await.is_err(), "timer restarted by the failed trial");
    clock.advance(Duration::from_secs(1));
    assert!(call_dependency(&breaker, &healthy).await.is_ok());

    let metrics = breaker.metrics();
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!(metrics.consecutive_failures, 0);
    assert_eq!(metrics.total_open_time, Duration::from_secs(240));
}

/// Validates that rate-limited failures leave a threshold-3 breaker closed
/// no matter how many arrive.
#[test]
fn test_rate_limited_failures_keep_breaker_closed() {
    let breaker = CircuitBreaker::new("crm-api", config(3, Duration::from_secs(60)))
        .expect("breaker builds");

    for _ in 0..5 {
        let transition = breaker.try_acquire().expect("closed").record_failure(Failure::RateLimited);
        assert!(transition.is_none());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}

#[test]
fn test_backoff_bounded_for_every_retry_count() {
    let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(32))
        .expect("valid backoff");

    for retry in 0..64 {
        assert!(backoff.delay(retry) <= Duration::from_secs(32));
    }
}
