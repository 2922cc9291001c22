//! Resilience patterns for fault tolerance
//!
//! This module provides **generic, reusable** building blocks:
//! - **Clock**: real and mock time sources so time-driven logic is testable
//! - **Circuit Breaker**: a named state machine that stops calling a failing
//!   dependency and probes it with a single trial after a recovery timeout
//! - **Backoff**: capped exponential delays with jitter for retry loops
//!
//! Domain-specific composition (token acquisition, error classification,
//! metrics and alerting) lives in the infra crate; nothing here knows about
//! HTTP or about the dependencies being guarded.

pub mod circuit_breaker;
pub mod clock;
pub mod retry;

// Re-export circuit breaker types
pub use circuit_breaker::{
    BreakerRejection, CallPermit, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerMetrics, CircuitState, CircuitTransition,
    ConfigError, ConfigResult, FailureKind, ResilienceError, TransitionObserver,
    TransitionReason,
};
pub use clock::{Clock, MockClock, SharedClock, SystemClock};
// Re-export backoff types
pub use retry::{ExponentialBackoff, Jitter};
