//! Modular common utilities shared across Tourlink crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error and data types with no side effects
//! - `runtime`: async infrastructure (resilience primitives, token lifecycle)
//! - `observability`: tracing output (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod auth;
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use auth::{IssuedToken, Token, TokenError, TokenManager, TokenManagerConfig, TokenSource};
#[cfg(feature = "runtime")]
pub use resilience::{
    BreakerRejection, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
    CircuitState, CircuitTransition, Clock, ExponentialBackoff, Jitter, MockClock,
    ResilienceError, SharedClock, SystemClock, TransitionObserver, TransitionReason,
};
