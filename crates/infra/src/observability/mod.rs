//! Observability infrastructure: in-process metrics, rate-limit tracking,
//! tracing setup and the monitoring façade read by dashboards.
//!
//! ## Design Principles
//!
//! 1. **Poison Recovery**: std mutexes guarding sample buffers use explicit
//!    recovery instead of `.expect()`:
//!    ```rust,ignore
//!    let guard = match mutex.lock() {
//!        Ok(guard) => guard,
//!        Err(poison_err) => {
//!            tracing::warn!("Mutex poisoned, recovering");
//!            poison_err.into_inner()
//!        }
//!    };
//!    ```
//!
//! 2. **Ring Buffers**: `VecDeque` for O(1) eviction, so memory stays bounded
//!    over the life of the process.
//!
//! 3. **Snapshots**: readers get owned, serializable copies; a summary is
//!    eventually consistent with concurrent writers, never transactionally
//!    exact.

pub mod logging;
pub mod metrics;
pub mod monitor;

pub use logging::init_tracing;
pub use metrics::{
    CallOutcome, CircuitSnapshot, CircuitStateCounts, CircuitStatusSource, MetricsRegistry,
    MonitoringSummary, OperationStats, RateLimitInfo, RateLimitSnapshot, RateLimitTracker,
};
pub use monitor::MonitoringService;

/// Metrics error type
///
/// Recording never fails; only aggregate reads over an empty window do.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricsError {
    /// Empty data set - cannot calculate aggregate metric
    #[error("Empty data: cannot calculate {metric}")]
    EmptyData {
        /// Metric name that failed (e.g., "P95", "average")
        metric: &'static str,
    },
}

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;
