//! Process-wide metrics registry
//!
//! One registry is constructed at startup and shared by reference with every
//! resilient client. It observes breaker transitions directly (it is a
//! [`TransitionObserver`]) and reads live breaker statistics through weak
//! handles so a dropped breaker simply disappears from the report.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tourlink_common::resilience::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitState, CircuitTransition, Clock, FailureKind,
    SharedClock, SystemClock, TransitionObserver,
};
use tourlink_domain::{MetricsSettings, RateLimitHealth, RateLimitSettings, SystemHealth};
use tracing::{debug, info};

use super::operation::{CallOutcome, OperationMetrics, OperationStats};
use super::rate_limits::RateLimitTracker;

/// Error rate above which the system is reported as WARNING
const ERROR_RATE_WARNING: f64 = 0.10;

/// Live statistics of a breaker, independent of its failure classification
pub trait CircuitStatusSource: Send + Sync {
    fn circuit_metrics(&self) -> CircuitBreakerMetrics;
    fn failure_threshold(&self) -> u32;
}

impl<K: FailureKind> CircuitStatusSource for CircuitBreaker<K> {
    fn circuit_metrics(&self) -> CircuitBreakerMetrics {
        self.metrics()
    }

    fn failure_threshold(&self) -> u32 {
        self.config().failure_threshold
    }
}

#[derive(Debug, Default)]
struct CircuitHistory {
    transitions: VecDeque<CircuitTransition>,
    state_changes: u64,
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub excluded_failures: u64,
    pub state_change_count: u64,
    pub last_state_change: DateTime<Utc>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// Accumulated open time, including the current open period
    pub total_open_secs: f64,
    /// Set while the breaker is open
    pub current_open_secs: Option<f64>,
    /// Oldest first
    pub recent_transitions: Vec<CircuitTransition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStateCounts {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

/// Global totals shown on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_errors: u64,
    pub total_retries: u64,
    pub error_rate: f64,
    pub operations: usize,
    pub circuits: CircuitStateCounts,
    pub rate_limit_health: RateLimitHealth,
    /// Failed attempts within the recent-failure window
    pub recent_failures: usize,
    pub health: SystemHealth,
    pub generated_at: DateTime<Utc>,
}

/// Call, latency and breaker bookkeeping keyed by operation name
pub struct MetricsRegistry {
    operations: DashMap<String, Arc<OperationMetrics>>,
    circuits: DashMap<String, CircuitHistory>,
    breakers: RwLock<BTreeMap<String, Weak<dyn CircuitStatusSource>>>,
    rate_limits: Arc<RateLimitTracker>,
    recent_failures: Mutex<VecDeque<Instant>>,
    settings: MetricsSettings,
    clock: SharedClock,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("operations", &self.operations.len())
            .field("circuits", &self.breakers.read().len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        let clock = SystemClock::shared();
        let rate_limits =
            Arc::new(RateLimitTracker::new(RateLimitSettings::default(), Arc::clone(&clock)));
        Self::new(MetricsSettings::default(), rate_limits, clock)
    }
}

impl MetricsRegistry {
    pub fn new(
        settings: MetricsSettings,
        rate_limits: Arc<RateLimitTracker>,
        clock: SharedClock,
    ) -> Self {
        Self {
            operations: DashMap::new(),
            circuits: DashMap::new(),
            breakers: RwLock::new(BTreeMap::new()),
            rate_limits,
            recent_failures: Mutex::new(VecDeque::new()),
            settings,
            clock,
        }
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitTracker> {
        &self.rate_limits
    }

    pub fn settings(&self) -> &MetricsSettings {
        &self.settings
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Record one attempt of `operation`
    pub fn record_call(
        &self,
        operation: &str,
        outcome: CallOutcome,
        latency: Duration,
        is_retry: bool,
    ) {
        let metrics = self.operation(operation);
        metrics.record(outcome, latency, is_retry, self.clock.millis_since_epoch());

        if !outcome.is_success() {
            self.push_recent_failure();
        }
    }

    fn operation(&self, operation: &str) -> Arc<OperationMetrics> {
        if let Some(existing) = self.operations.get(operation) {
            return Arc::clone(existing.value());
        }
        let capacity = self.settings.sample_capacity;
        Arc::clone(
            self.operations
                .entry(operation.to_string())
                .or_insert_with(|| Arc::new(OperationMetrics::new(capacity)))
                .value(),
        )
    }

    fn push_recent_failure(&self) {
        let now = self.clock.now();
        let mut recent = self.recent_failures.lock();
        prune_before(&mut recent, now, self.settings.recent_failure_window());
        recent.push_back(now);
        while recent.len() > self.settings.recent_failure_capacity.max(1) {
            recent.pop_front();
        }
    }

    /// Append a breaker transition to that breaker's bounded history
    pub fn record_circuit_transition(&self, transition: CircuitTransition) {
        debug!(
            breaker = %transition.breaker,
            from = %transition.from,
            to = %transition.to,
            "Recording circuit transition"
        );

        let capacity = self.settings.transition_history.max(1);
        let mut history = self.circuits.entry(transition.breaker.clone()).or_default();
        history.state_changes += 1;
        history.transitions.push_back(transition);
        while history.transitions.len() > capacity {
            history.transitions.pop_front();
        }
    }

    /// Include a breaker in circuit reports.
    ///
    /// Only a weak handle is kept; the breaker usually holds this registry
    /// as its observer.
    pub fn register_circuit<S>(&self, breaker: &Arc<S>)
    where
        S: CircuitStatusSource + 'static,
    {
        let name = breaker.circuit_metrics().name;
        let source: Arc<dyn CircuitStatusSource> = Arc::clone(breaker) as Arc<dyn CircuitStatusSource>;
        self.breakers.write().insert(name, Arc::downgrade(&source));
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get_stats(&self, operation: &str) -> Option<OperationStats> {
        self.operations.get(operation).map(|metrics| metrics.snapshot(operation))
    }

    /// Stats for every operation, sorted by name
    pub fn all_stats(&self) -> Vec<OperationStats> {
        let mut stats: Vec<OperationStats> =
            self.operations.iter().map(|entry| entry.value().snapshot(entry.key())).collect();
        stats.sort_by(|a, b| a.operation.cmp(&b.operation));
        stats
    }

    /// Transition history for one breaker, oldest first
    pub fn circuit_transitions(&self, breaker: &str) -> Vec<CircuitTransition> {
        self.circuits
            .get(breaker)
            .map(|history| history.transitions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshots of every registered breaker that is still alive
    pub fn get_circuit_states(&self) -> Vec<CircuitSnapshot> {
        let live: Vec<Arc<dyn CircuitStatusSource>> = {
            let mut breakers = self.breakers.write();
            breakers.retain(|_, weak| weak.strong_count() > 0);
            breakers.values().filter_map(Weak::upgrade).collect()
        };

        live.iter().map(|source| self.circuit_snapshot(source.as_ref())).collect()
    }

    fn circuit_snapshot(&self, source: &dyn CircuitStatusSource) -> CircuitSnapshot {
        let metrics = source.circuit_metrics();
        let now = self.clock.now();
        let (state_change_count, recent_transitions): (u64, Vec<CircuitTransition>) = self
            .circuits
            .get(&metrics.name)
            .map(|h| (h.state_changes, h.transitions.iter().cloned().collect()))
            .unwrap_or_default();

        let current_open_secs = (metrics.state == CircuitState::Open)
            .then(|| now.saturating_duration_since(metrics.last_state_change).as_secs_f64());

        CircuitSnapshot {
            state: metrics.state,
            failure_threshold: source.failure_threshold(),
            consecutive_failures: metrics.consecutive_failures,
            total_calls: metrics.total_calls,
            rejected_calls: metrics.rejected_calls,
            excluded_failures: metrics.excluded_failures,
            state_change_count,
            last_state_change: self.to_utc(metrics.last_state_change, now),
            last_failure: metrics.last_failure.map(|at| self.to_utc(at, now)),
            last_success: metrics.last_success.map(|at| self.to_utc(at, now)),
            total_open_secs: metrics.total_open_time.as_secs_f64(),
            current_open_secs,
            recent_transitions,
            name: metrics.name,
        }
    }

    fn to_utc(&self, at: Instant, now: Instant) -> DateTime<Utc> {
        let ago = chrono::Duration::from_std(now.saturating_duration_since(at))
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.clock.utc_now() - ago
    }

    /// Failed attempts within the configured recent-failure window
    pub fn recent_failure_count(&self) -> usize {
        let mut recent = self.recent_failures.lock();
        prune_before(&mut recent, self.clock.now(), self.settings.recent_failure_window());
        recent.len()
    }

    pub fn get_summary(&self) -> MonitoringSummary {
        let stats = self.all_stats();
        let total_calls: u64 = stats.iter().map(|s| s.total_count).sum();
        let total_successes: u64 = stats.iter().map(|s| s.success_count).sum();
        let total_errors: u64 = stats.iter().map(|s| s.error_count).sum();
        let total_retries: u64 = stats.iter().map(|s| s.retry_count).sum();
        let error_rate =
            if total_calls == 0 { 0.0 } else { total_errors as f64 / total_calls as f64 };

        let mut circuits = CircuitStateCounts::default();
        for snapshot in self.get_circuit_states() {
            match snapshot.state {
                CircuitState::Closed => circuits.closed += 1,
                CircuitState::Open => circuits.open += 1,
                CircuitState::HalfOpen => circuits.half_open += 1,
            }
        }

        let rate_limit_health = self.rate_limits.classify();
        let health = system_health(&circuits, rate_limit_health, error_rate);

        MonitoringSummary {
            total_calls,
            total_successes,
            total_errors,
            total_retries,
            error_rate,
            operations: stats.len(),
            circuits,
            rate_limit_health,
            recent_failures: self.recent_failure_count(),
            health,
            generated_at: self.clock.utc_now(),
        }
    }

    /// Clear call statistics, transition history and rate-limit records.
    ///
    /// Breaker state is untouched; use the breaker's own reset for that.
    pub fn reset_stats(&self) {
        self.operations.clear();
        self.recent_failures.lock().clear();
        for mut history in self.circuits.iter_mut() {
            history.transitions.clear();
            history.state_changes = 0;
        }
        self.rate_limits.clear();
        info!("Monitoring statistics reset");
    }
}

impl TransitionObserver for MetricsRegistry {
    fn on_transition(&self, transition: &CircuitTransition) {
        self.record_circuit_transition(transition.clone());
    }
}

fn prune_before(recent: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = recent.front() {
        if now.saturating_duration_since(*front) > window {
            recent.pop_front();
        } else {
            break;
        }
    }
}

/// DEGRADED on any open breaker or critical quota, WARNING on a probing
/// breaker, low quota or an error rate above 10 %
fn system_health(
    circuits: &CircuitStateCounts,
    rate_limits: RateLimitHealth,
    error_rate: f64,
) -> SystemHealth {
    if circuits.open > 0 || rate_limits == RateLimitHealth::Critical {
        SystemHealth::Degraded
    } else if circuits.half_open > 0
        || rate_limits == RateLimitHealth::Warning
        || error_rate > ERROR_RATE_WARNING
    {
        SystemHealth::Warning
    } else {
        SystemHealth::Healthy
    }
}
