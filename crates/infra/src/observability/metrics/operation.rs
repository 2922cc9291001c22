//! Per-operation call accounting
//!
//! ## Design
//! - **Atomic counters** for totals so concurrent callers never contend
//! - **VecDeque ring buffer** of latency samples with O(1) eviction
//! - **Poison-safe locking** with explicit match pattern (no .expect())

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observability::{MetricsError, MetricsResult};

/// Outcome of one attempt against a remote dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    /// Failure that counts against the dependency's health
    Failure,
    /// Failure caused by remote quota; excluded from breaker accounting
    RateLimited,
    /// Refused by an open breaker without reaching the dependency
    Rejected,
}

impl CallOutcome {
    pub fn is_success(self) -> bool {
        self == CallOutcome::Success
    }
}

/// Aggregated view of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub operation: String,
    pub total_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub retry_count: u64,
    /// Errors caused by remote quota
    pub rate_limited_count: u64,
    /// Errors caused by an open breaker
    pub rejected_count: u64,
    pub error_rate: f64,
    pub avg_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<u64>,
    pub last_called_at: Option<DateTime<Utc>>,
}

/// Counters and latency samples for one operation
#[derive(Debug)]
pub struct OperationMetrics {
    total: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
    rejected: AtomicU64,
    /// Epoch millis of the last attempt, 0 when never called
    last_called_ms: AtomicU64,
    samples: Mutex<VecDeque<u64>>,
    capacity: usize,
}

impl OperationMetrics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            last_called_ms: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record one attempt.
    ///
    /// Latency is sampled for successful attempts only; failures carry
    /// timeout and rejection noise that would distort the percentile.
    pub fn record(&self, outcome: CallOutcome, latency: Duration, is_retry: bool, now_ms: u64) {
        // SeqCst: the success/error split must never be observed ahead of the total
        self.total.fetch_add(1, Ordering::SeqCst);
        match outcome {
            CallOutcome::Success => {
                self.successes.fetch_add(1, Ordering::SeqCst);
            }
            CallOutcome::Failure => {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            CallOutcome::RateLimited => {
                self.errors.fetch_add(1, Ordering::SeqCst);
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            CallOutcome::Rejected => {
                self.errors.fetch_add(1, Ordering::SeqCst);
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
        if is_retry {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
        self.last_called_ms.fetch_max(now_ms, Ordering::Relaxed);

        if outcome.is_success() {
            self.push_sample(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
        }
    }

    fn push_sample(&self, ms: u64) {
        let mut samples = match self.samples.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                tracing::warn!(
                    metric = "OperationMetrics::samples",
                    "Mutex poisoned during latency recording, recovering data"
                );
                poison_err.into_inner()
            }
        };

        samples.push_back(ms);
        if samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn success_count(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Average latency in milliseconds over the retained samples
    ///
    /// Returns `MetricsError::EmptyData` if no samples are retained.
    pub fn average_latency_ms(&self) -> MetricsResult<f64> {
        let samples = self.lock_samples();
        if samples.is_empty() {
            return Err(MetricsError::EmptyData { metric: "average" });
        }
        let sum: u64 = samples.iter().sum();
        Ok(sum as f64 / samples.len() as f64)
    }

    /// P95 latency in milliseconds over the retained samples
    ///
    /// Returns `MetricsError::EmptyData` if no samples are retained.
    pub fn p95_latency_ms(&self) -> MetricsResult<u64> {
        self.percentile(0.95, "P95")
    }

    /// Nearest-rank percentile over a sorted copy of the window.
    ///
    /// Holds the lock for the whole computation for a consistent snapshot.
    fn percentile(&self, percentile: f64, metric: &'static str) -> MetricsResult<u64> {
        let samples = self.lock_samples();
        if samples.is_empty() {
            return Err(MetricsError::EmptyData { metric });
        }

        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();

        let index = ((sorted.len() as f64 * percentile) as usize).min(sorted.len() - 1);
        Ok(sorted[index])
    }

    fn lock_samples(&self) -> std::sync::MutexGuard<'_, VecDeque<u64>> {
        match self.samples.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                tracing::warn!(
                    metric = "OperationMetrics::samples",
                    "Mutex poisoned during latency read, recovering"
                );
                poison_err.into_inner()
            }
        }
    }

    pub fn snapshot(&self, operation: &str) -> OperationStats {
        let total_count = self.total_count();
        let error_count = self.error_count();
        let last_ms = self.last_called_ms.load(Ordering::Relaxed);

        OperationStats {
            operation: operation.to_string(),
            total_count,
            success_count: self.success_count(),
            error_count,
            retry_count: self.retry_count(),
            rate_limited_count: self.rate_limited.load(Ordering::Relaxed),
            rejected_count: self.rejected.load(Ordering::Relaxed),
            error_rate: if total_count == 0 { 0.0 } else { error_count as f64 / total_count as f64 },
            avg_latency_ms: self.average_latency_ms().ok(),
            p95_latency_ms: self.p95_latency_ms().ok(),
            last_called_at: (last_ms > 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_ms as i64))
                .flatten(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    const NOW: u64 = 1_700_000_000_000;

    #[test]
    fn test_counts_partition_total() {
        let metrics = OperationMetrics::new(100);
        let outcomes = [
            CallOutcome::Success,
            CallOutcome::Failure,
            CallOutcome::RateLimited,
            CallOutcome::Rejected,
            CallOutcome::Success,
        ];
        for (i, outcome) in outcomes.into_iter().enumerate() {
            metrics.record(outcome, Duration::from_millis(10), i > 0, NOW);
        }

        let stats = metrics.snapshot("optimize_route");
        assert_eq!(stats.total_count, 5);
        assert_eq!(stats.success_count + stats.error_count, stats.total_count);
        assert_eq!(stats.error_count, 3);
        assert_eq!(stats.rate_limited_count, 1);
        assert_eq!(stats.rejected_count, 1);
        assert_eq!(stats.retry_count, 4);
        assert!((stats.error_rate - 0.6).abs() < f64::EPSILON);
        assert_eq!(stats.last_called_at.map(|t| t.timestamp_millis()), Some(NOW as i64));
    }

    #[test]
    fn test_percentile_calculations() {
        let metrics = OperationMetrics::new(100);
        assert!(matches!(metrics.p95_latency_ms(), Err(MetricsError::EmptyData { metric: "P95" })));
        assert!(matches!(
            metrics.average_latency_ms(),
            Err(MetricsError::EmptyData { metric: "average" })
        ));

        for ms in [100, 200, 300, 400, 500] {
            metrics.record(CallOutcome::Success, Duration::from_millis(ms), false, NOW);
        }

        // index = 5 * 0.95 = 4.75 -> 4, sorted[4] = 500
        assert_eq!(metrics.p95_latency_ms().unwrap(), 500);
        assert!((metrics.average_latency_ms().unwrap() - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failures_are_not_sampled() {
        let metrics = OperationMetrics::new(100);
        metrics.record(CallOutcome::Failure, Duration::from_secs(30), false, NOW);
        assert!(metrics.p95_latency_ms().is_err());
    }

    #[test]
    fn test_samples_ring_buffer() {
        let metrics = OperationMetrics::new(1000);
        for i in 0..1100 {
            metrics.record(CallOutcome::Success, Duration::from_millis(i), false, NOW);
        }

        let samples = metrics.lock_samples();
        assert_eq!(samples.len(), 1000);
        assert_eq!(samples[0], 100);
        assert_eq!(samples[999], 1099);
    }

    #[test]
    fn test_concurrent_recording_keeps_totals_exact() {
        let metrics = Arc::new(OperationMetrics::new(50));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for i in 0..250 {
                        let outcome =
                            if (t + i) % 3 == 0 { CallOutcome::Failure } else { CallOutcome::Success };
                        metrics.record(outcome, Duration::from_millis(5), false, NOW);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.total_count(), 2000);
        assert_eq!(metrics.success_count() + metrics.error_count(), 2000);
        assert_eq!(metrics.lock_samples().len(), 50);
    }

    #[test]
    fn test_poison_recovery_during_record() {
        let metrics = Arc::new(OperationMetrics::new(10));

        let metrics_clone = Arc::clone(&metrics);
        let _ = thread::spawn(move || {
            let _guard = metrics_clone.samples.lock().unwrap();
            panic!("intentional poison");
        })
        .join();

        metrics.record(CallOutcome::Success, Duration::from_millis(100), false, NOW);
        assert_eq!(metrics.p95_latency_ms().unwrap(), 100);
    }
}
