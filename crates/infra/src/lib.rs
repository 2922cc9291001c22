//! # Tourlink Infrastructure
//!
//! Impure half of the integration layer: everything that talks to the
//! network, keeps process-wide state or touches the environment.
//!
//! This crate contains:
//! - `ResilientClient`, the breaker/retry/token/metrics composition every
//!   outbound CRM and routing call goes through
//! - The reqwest-based CRM adapter and OAuth2 client-credentials token source
//! - In-process metrics, rate-limit tracking and the monitoring façade
//! - Failure-driven alerting with log, email, webhook and chat delivery
//! - Configuration loading and tracing setup
//!
//! ## Architecture
//! - Resilience primitives come from `tourlink-common`
//! - Data types and configuration come from `tourlink-domain`

pub mod alerts;
pub mod config;
pub mod integrations;
pub mod observability;

// Re-export commonly used items
pub use alerts::{AlertChannel, AlertDecision, AlertError, AlertManager, FailureSignal};
pub use integrations::remote::{
    ClientCredentialsSource, CrmClient, IntegrationError, RemoteFailure, RemoteResponse,
    ResilientClient, RetryPolicy,
};
pub use observability::{
    init_tracing, CallOutcome, MetricsRegistry, MonitoringService, MonitoringSummary,
    OperationStats, RateLimitTracker,
};
