//! Named circuit breaker guarding one remote dependency
//!
//! Each breaker owns a single mutex around its whole state, so every
//! transition for one dependency is serialized while breakers for different
//! dependencies never contend. Callers obtain a [`CallPermit`] before talking
//! to the dependency and settle it with the outcome; a dropped permit releases
//! a half-open trial slot without counting anything.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SharedClock, SystemClock};

//==============================================================================
// Error Types
//==============================================================================

/// Simple configuration error for validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A call was refused without reaching the dependency
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{breaker}' is {state}, rejecting call")]
pub struct BreakerRejection {
    /// Name of the breaker that refused the call
    pub breaker: String,
    /// State observed when the call was refused
    pub state: CircuitState,
    /// Time left until the next half-open trial is allowed, when known
    pub retry_in: Option<Duration>,
}

/// Errors surfaced by [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker refused the call
    #[error(transparent)]
    CircuitOpen(#[from] BreakerRejection),

    /// The underlying operation failed
    #[error("Operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },
}

//==============================================================================
// States and transitions
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing a single trial request
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Why a breaker changed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Consecutive counted failures reached the threshold
    FailureThreshold,
    /// The recovery timeout elapsed and a trial call was admitted
    RecoveryTimeoutElapsed,
    /// The half-open trial succeeded
    TrialSucceeded,
    /// The half-open trial failed
    TrialFailed,
    /// An operator reset the breaker
    ManualReset,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransitionReason::FailureThreshold => "failure threshold reached",
            TransitionReason::RecoveryTimeoutElapsed => "recovery timeout elapsed",
            TransitionReason::TrialSucceeded => "half-open trial succeeded",
            TransitionReason::TrialFailed => "half-open trial failed",
            TransitionReason::ManualReset => "manual reset",
        };
        f.write_str(label)
    }
}

/// A single state change, as reported to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitTransition {
    pub breaker: String,
    pub from: CircuitState,
    pub to: CircuitState,
    /// Consecutive failure count at the moment of the transition
    pub failure_count: u32,
    pub reason: TransitionReason,
    pub at: DateTime<Utc>,
}

/// Receives every transition of the breakers it is attached to.
///
/// Called while the breaker's lock is held; implementations must be quick and
/// must not call back into the same breaker.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, transition: &CircuitTransition);
}

/// Failure classification a breaker can be configured to ignore
pub trait FailureKind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> FailureKind for T where T: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig<K: FailureKind> {
    /// Number of consecutive counted failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before admitting a half-open trial
    pub recovery_timeout: Duration,
    /// Failure kinds surfaced to callers but never counted
    pub excluded: HashSet<K>,
}

impl<K: FailureKind> Default for CircuitBreakerConfig<K> {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            excluded: HashSet::new(),
        }
    }
}

impl<K: FailureKind> CircuitBreakerConfig<K> {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder<K> {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "recovery_timeout must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Whether failures of this kind bypass breaker accounting
    pub fn is_excluded(&self, kind: &K) -> bool {
        self.excluded.contains(kind)
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug)]
pub struct CircuitBreakerConfigBuilder<K: FailureKind> {
    config: CircuitBreakerConfig<K>,
}

impl<K: FailureKind> Default for CircuitBreakerConfigBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FailureKind> CircuitBreakerConfigBuilder<K> {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Exclude a failure kind from threshold accounting
    pub fn exclude(mut self, kind: K) -> Self {
        self.config.excluded.insert(kind);
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig<K>> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//==============================================================================
// Breaker
//==============================================================================

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub excluded_failures: u64,
    pub last_state_change: Instant,
    pub last_failure: Option<Instant>,
    pub last_success: Option<Instant>,
    /// Time spent open, including the current open period
    pub total_open_time: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    trial_in_flight: bool,
    last_state_change: Instant,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    total_open_time: Duration,
    total_calls: u64,
    rejected_calls: u64,
    excluded_failures: u64,
}

/// Circuit breaker for one named dependency.
///
/// `K` is the caller's failure classification; kinds listed in
/// [`CircuitBreakerConfig::excluded`] never move the state machine.
pub struct CircuitBreaker<K: FailureKind> {
    name: String,
    config: CircuitBreakerConfig<K>,
    inner: Mutex<BreakerInner>,
    clock: SharedClock,
    observer: Option<Arc<dyn TransitionObserver>>,
}

impl<K: FailureKind> fmt::Debug for CircuitBreaker<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<K: FailureKind> CircuitBreaker<K> {
    /// Create a new circuit breaker using the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig<K>) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock::shared())
    }

    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig<K>,
        clock: SharedClock,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let now = clock.now();
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                trial_in_flight: false,
                last_state_change: now,
                last_failure: None,
                last_success: None,
                total_open_time: Duration::ZERO,
                total_calls: 0,
                rejected_calls: 0,
                excluded_failures: 0,
            }),
            clock,
            observer: None,
        })
    }

    /// Attach an observer that receives every state transition
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig<K> {
        &self.config
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(breaker = %self.name, "Circuit breaker state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Ask permission to call the dependency.
    ///
    /// An OPEN breaker whose recovery timeout has elapsed moves to HALF_OPEN
    /// here, before the admitted trial executes. While the trial is in flight
    /// every other caller is rejected.
    pub fn try_acquire(&self) -> Result<CallPermit<'_, K>, BreakerRejection> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed => {
                inner.total_calls += 1;
                Ok(CallPermit::new(self, false))
            }
            CircuitState::Open => {
                let open_for = now.saturating_duration_since(inner.last_state_change);
                if open_for >= self.config.recovery_timeout {
                    self.transition(
                        &mut inner,
                        CircuitState::HalfOpen,
                        TransitionReason::RecoveryTimeoutElapsed,
                        now,
                    );
                    inner.trial_in_flight = true;
                    inner.total_calls += 1;
                    Ok(CallPermit::new(self, true))
                } else {
                    inner.rejected_calls += 1;
                    debug!(breaker = %self.name, "Circuit breaker rejecting call while open");
                    Err(self.rejection(
                        CircuitState::Open,
                        Some(self.config.recovery_timeout - open_for),
                    ))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected_calls += 1;
                    debug!(breaker = %self.name, "Half-open trial already in flight, rejecting");
                    Err(self.rejection(CircuitState::HalfOpen, None))
                } else {
                    inner.trial_in_flight = true;
                    inner.total_calls += 1;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// `classify` maps the operation's error onto the breaker's failure kind
    /// so excluded kinds can be recognised.
    #[instrument(skip_all, fields(breaker = %self.name))]
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        classify: C,
        operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> K,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.try_acquire()?;

        match operation().await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(error) => {
                permit.record_failure(classify(&error));
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    /// Consecutive counted failures since the last success or close
    pub fn consecutive_failures(&self) -> u32 {
        self.lock_inner().consecutive_failures
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let now = self.clock.now();
        let inner = self.lock_inner();

        let mut total_open_time = inner.total_open_time;
        if inner.state == CircuitState::Open {
            total_open_time += now.saturating_duration_since(inner.last_state_change);
        }

        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            excluded_failures: inner.excluded_failures,
            last_state_change: inner.last_state_change,
            last_failure: inner.last_failure,
            last_success: inner.last_success,
            total_open_time,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.lock_inner();

        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed, TransitionReason::ManualReset, now);
        }
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
        inner.last_failure = None;
        info!(breaker = %self.name, "Circuit breaker manually reset to closed state");
    }

    fn on_success(&self, trial: bool) {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        inner.last_success = Some(now);

        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if trial => {
                self.transition(
                    &mut inner,
                    CircuitState::Closed,
                    TransitionReason::TrialSucceeded,
                    now,
                );
            }
            state => {
                // A call admitted before the circuit opened finished late.
                debug!(breaker = %self.name, %state, "Ignoring late success");
            }
        }
    }

    fn on_failure(&self, kind: K, trial: bool) -> Option<CircuitTransition> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();

        if self.config.is_excluded(&kind) {
            inner.excluded_failures += 1;
            if trial {
                inner.trial_in_flight = false;
            }
            debug!(breaker = %self.name, ?kind, "Excluded failure, not counted");
            return None;
        }

        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    return Some(self.transition(
                        &mut inner,
                        CircuitState::Open,
                        TransitionReason::FailureThreshold,
                        now,
                    ));
                }
                None
            }
            CircuitState::HalfOpen if trial => {
                inner.consecutive_failures += 1;
                Some(self.transition(
                    &mut inner,
                    CircuitState::Open,
                    TransitionReason::TrialFailed,
                    now,
                ))
            }
            _ => None,
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock_inner();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn transition(
        &self,
        inner: &mut BreakerInner,
        to: CircuitState,
        reason: TransitionReason,
        now: Instant,
    ) -> CircuitTransition {
        let from = inner.state;
        if from == CircuitState::Open {
            inner.total_open_time += now.saturating_duration_since(inner.last_state_change);
        }

        let transition = CircuitTransition {
            breaker: self.name.clone(),
            from,
            to,
            failure_count: inner.consecutive_failures,
            reason,
            at: self.clock.utc_now(),
        };

        inner.state = to;
        inner.last_state_change = now;
        if to != CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
        if to == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }

        match to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                %from,
                failure_count = transition.failure_count,
                %reason,
                "Circuit breaker opened"
            ),
            _ => info!(breaker = %self.name, %from, %to, %reason, "Circuit breaker transition"),
        }

        if let Some(observer) = &self.observer {
            observer.on_transition(&transition);
        }

        transition
    }

    fn rejection(&self, state: CircuitState, retry_in: Option<Duration>) -> BreakerRejection {
        BreakerRejection { breaker: self.name.clone(), state, retry_in }
    }
}

/// Admission to call the guarded dependency once.
///
/// Settle it with [`CallPermit::record_success`] or
/// [`CallPermit::record_failure`]. Dropping it unsettled records nothing and
/// frees a half-open trial slot.
#[must_use = "a permit should be settled with the call outcome"]
pub struct CallPermit<'a, K: FailureKind> {
    breaker: &'a CircuitBreaker<K>,
    trial: bool,
    settled: bool,
}

impl<'a, K: FailureKind> CallPermit<'a, K> {
    fn new(breaker: &'a CircuitBreaker<K>, trial: bool) -> Self {
        Self { breaker, trial, settled: false }
    }

    /// Whether this permit is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    /// Record a failure; returns the transition it caused, if any
    pub fn record_failure(mut self, kind: K) -> Option<CircuitTransition> {
        self.settled = true;
        self.breaker.on_failure(kind, self.trial)
    }
}

impl<K: FailureKind> Drop for CallPermit<'_, K> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}
