//! Remote-declared quota bookkeeping
//!
//! Every response carrying rate-limit headers upserts one record per
//! operation. Health is the worst `remaining / limit` ratio across all
//! tracked operations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tourlink_common::resilience::{Clock, SharedClock, SystemClock};
use tourlink_domain::{RateLimitHealth, RateLimitSettings};
use tracing::{debug, warn};

/// Rate-limit metadata carried by a remote response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    /// Time until the quota window resets
    pub reset_after: Duration,
}

impl RateLimitInfo {
    pub fn new(limit: u64, remaining: u64, reset_after: Duration) -> Self {
        Self { limit, remaining, reset_after }
    }
}

#[derive(Debug, Clone)]
struct RateLimitRecord {
    limit: u64,
    remaining: u64,
    reset_time: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl RateLimitRecord {
    /// `None` when the remote declared no quota
    fn ratio(&self) -> Option<f64> {
        (self.limit > 0).then(|| self.remaining as f64 / self.limit as f64)
    }
}

/// Read-only view of one tracked operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub operation: String,
    pub limit: u64,
    pub remaining: u64,
    pub ratio: Option<f64>,
    pub reset_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub health: RateLimitHealth,
}

/// Tracks remaining quota per operation
pub struct RateLimitTracker {
    records: DashMap<String, RateLimitRecord>,
    settings: RateLimitSettings,
    clock: SharedClock,
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("tracked", &self.records.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new(RateLimitSettings::default(), SystemClock::shared())
    }
}

impl RateLimitTracker {
    pub fn new(settings: RateLimitSettings, clock: SharedClock) -> Self {
        Self { records: DashMap::new(), settings, clock }
    }

    /// Upsert the record for `operation` and return the overall health
    /// after the update.
    ///
    /// A blank operation name is recorded under the configured default
    /// endpoint label.
    pub fn record(&self, operation: &str, info: RateLimitInfo) -> RateLimitHealth {
        let key = self.key_for(operation);

        let now = self.clock.utc_now();
        let reset_time = now
            + chrono::Duration::from_std(info.reset_after).unwrap_or_else(|_| chrono::Duration::zero());

        let record = RateLimitRecord {
            limit: info.limit,
            remaining: info.remaining,
            reset_time,
            last_updated: now,
        };
        let ratio = record.ratio();
        self.records.insert(key.clone(), record);

        let health = self.classify();
        match health {
            RateLimitHealth::Critical => warn!(
                operation = %key,
                limit = info.limit,
                remaining = info.remaining,
                "Rate limit headroom critical"
            ),
            _ => debug!(
                operation = %key,
                limit = info.limit,
                remaining = info.remaining,
                ratio = ?ratio,
                "Rate limit recorded"
            ),
        }
        health
    }

    /// Health of the last quota reported by `operation` alone
    pub fn operation_health(&self, operation: &str) -> RateLimitHealth {
        self.records
            .get(&self.key_for(operation))
            .and_then(|record| record.ratio())
            .map_or(RateLimitHealth::Healthy, |ratio| self.health_for(ratio))
    }

    fn key_for(&self, operation: &str) -> String {
        if operation.trim().is_empty() {
            self.settings.default_endpoint.clone()
        } else {
            operation.to_string()
        }
    }

    /// Lowest `remaining / limit` ratio across tracked operations
    pub fn min_ratio(&self) -> Option<f64> {
        self.records.iter().filter_map(|entry| entry.value().ratio()).reduce(f64::min)
    }

    /// Overall health; healthy when nothing is tracked
    pub fn classify(&self) -> RateLimitHealth {
        self.min_ratio().map_or(RateLimitHealth::Healthy, |ratio| self.health_for(ratio))
    }

    fn health_for(&self, ratio: f64) -> RateLimitHealth {
        RateLimitHealth::classify(ratio, self.settings.warning_ratio, self.settings.critical_ratio)
    }

    /// Snapshots sorted by operation name
    pub fn snapshots(&self) -> Vec<RateLimitSnapshot> {
        let mut snapshots: Vec<RateLimitSnapshot> = self
            .records
            .iter()
            .map(|entry| {
                let record = entry.value();
                let ratio = record.ratio();
                RateLimitSnapshot {
                    operation: entry.key().clone(),
                    limit: record.limit,
                    remaining: record.remaining,
                    ratio,
                    reset_time: record.reset_time,
                    last_updated: record.last_updated,
                    health: ratio.map_or(RateLimitHealth::Healthy, |r| self.health_for(r)),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.operation.cmp(&b.operation));
        snapshots
    }

    pub fn get(&self, operation: &str) -> Option<RateLimitSnapshot> {
        self.snapshots().into_iter().find(|s| s.operation == operation)
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use tourlink_common::resilience::MockClock;

    use super::*;

    fn tracker() -> (RateLimitTracker, MockClock) {
        let clock = MockClock::new();
        (RateLimitTracker::new(RateLimitSettings::default(), clock.shared()), clock)
    }

    #[test]
    fn test_empty_tracker_is_healthy() {
        let (tracker, _) = tracker();
        assert_eq!(tracker.classify(), RateLimitHealth::Healthy);
        assert!(tracker.snapshots().is_empty());
    }

    #[test]
    fn test_worst_operation_drives_health() {
        let (tracker, _) = tracker();
        let window = Duration::from_secs(60);

        let record = |op: &str, remaining| tracker.record(op, RateLimitInfo::new(100, remaining, window));

        assert_eq!(record("list_contacts", 80), RateLimitHealth::Healthy);
        assert_eq!(record("push_feedback", 20), RateLimitHealth::Warning);
        assert_eq!(record("push_tour", 5), RateLimitHealth::Critical);

        // Quota recovers on the worst operation
        assert_eq!(record("push_tour", 90), RateLimitHealth::Warning);
        assert!((tracker.min_ratio().unwrap() - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_operation_health_ignores_other_operations() {
        let (tracker, _) = tracker();
        let window = Duration::from_secs(60);

        tracker.record("list_contacts", RateLimitInfo::new(100, 5, window));
        let overall = tracker.record("get_route", RateLimitInfo::new(100, 95, window));

        assert_eq!(overall, RateLimitHealth::Critical);
        assert_eq!(tracker.operation_health("get_route"), RateLimitHealth::Healthy);
        assert_eq!(tracker.operation_health("list_contacts"), RateLimitHealth::Critical);
        assert_eq!(tracker.operation_health("push_tour"), RateLimitHealth::Healthy);
    }

    #[test]
    fn test_blank_operation_uses_default_endpoint() {
        let (tracker, _) = tracker();
        tracker.record("", RateLimitInfo::new(50, 40, Duration::from_secs(10)));

        let snapshot = tracker.get("crm-api").expect("recorded under default label");
        assert_eq!(snapshot.limit, 50);
        assert_eq!(snapshot.health, RateLimitHealth::Healthy);
    }

    #[test]
    fn test_reset_time_follows_clock() {
        let (tracker, clock) = tracker();
        clock.advance_secs(30);
        let now = clock.utc_now();
        tracker.record("push_tour", RateLimitInfo::new(10, 9, Duration::from_secs(45)));

        let snapshot = tracker.get("push_tour").unwrap();
        assert_eq!(snapshot.last_updated, now);
        assert_eq!(snapshot.reset_time, now + chrono::Duration::seconds(45));
    }

    #[test]
    fn test_zero_limit_is_ignored_for_health() {
        let (tracker, _) = tracker();
        tracker.record("push_tour", RateLimitInfo::new(0, 0, Duration::ZERO));
        assert_eq!(tracker.classify(), RateLimitHealth::Healthy);
        assert_eq!(tracker.get("push_tour").unwrap().ratio, None);
    }
}
