//! Metrics collection modules
//!
//! Thread-safe, in-memory metrics for the integration layer.

pub mod operation;
pub mod rate_limits;
pub mod registry;

// Re-export metric types for convenience
pub use operation::{CallOutcome, OperationMetrics, OperationStats};
pub use rate_limits::{RateLimitInfo, RateLimitSnapshot, RateLimitTracker};
pub use registry::{
    CircuitSnapshot, CircuitStateCounts, CircuitStatusSource, MetricsRegistry, MonitoringSummary,
};
