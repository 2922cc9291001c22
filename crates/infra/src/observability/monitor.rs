//! Read surface for dashboards and reports
//!
//! [`MonitoringService`] bundles the metrics registry and the alert manager
//! behind the handful of calls an admin dashboard makes. Every method but
//! [`MonitoringService::update_alert_config`], `reset_stats` and
//! `send_test_alert` is a pure read.

use std::sync::Arc;

use tourlink_domain::{AlertConfig, AlertEvent, AlertFilter, AlertLevel, AlertType};
use tracing::info;

use super::metrics::{
    CircuitSnapshot, MetricsRegistry, MonitoringSummary, OperationStats, RateLimitSnapshot,
};
use crate::alerts::{AlertError, AlertManager};

#[derive(Debug, Clone)]
pub struct MonitoringService {
    metrics: Arc<MetricsRegistry>,
    alerts: Arc<AlertManager>,
}

impl MonitoringService {
    pub fn new(metrics: Arc<MetricsRegistry>, alerts: Arc<AlertManager>) -> Self {
        Self { metrics, alerts }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn get_summary(&self) -> MonitoringSummary {
        self.metrics.get_summary()
    }

    /// Stats for one operation, or every operation when `operation` is `None`
    pub fn get_stats(&self, operation: Option<&str>) -> Vec<OperationStats> {
        match operation {
            Some(name) => self.metrics.get_stats(name).into_iter().collect(),
            None => self.metrics.all_stats(),
        }
    }

    pub fn get_circuit_states(&self) -> Vec<CircuitSnapshot> {
        self.metrics.get_circuit_states()
    }

    pub fn get_rate_limits(&self) -> Vec<RateLimitSnapshot> {
        self.metrics.rate_limits().snapshots()
    }

    pub fn list_alerts(&self, filter: &AlertFilter) -> Vec<AlertEvent> {
        self.alerts.list_alerts(filter)
    }

    pub fn list_alert_configs(&self) -> Vec<AlertConfig> {
        self.alerts.list_alert_configs()
    }

    pub fn update_alert_config(
        &self,
        alert_type: AlertType,
        config: AlertConfig,
    ) -> Result<(), AlertError> {
        self.alerts.update_alert_config(alert_type, config)
    }

    pub fn reset_stats(&self) {
        info!("Resetting monitoring statistics on request");
        self.metrics.reset_stats();
    }

    pub async fn send_test_alert(&self, level: AlertLevel) -> AlertEvent {
        self.alerts.send_test_alert(level).await
    }
}
