//! Alerting data model
//!
//! Alert configs are keyed by [`AlertType`]; events are immutable records of
//! a notification that was produced.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, TourlinkError};

/// Kind of condition an alert reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Repeated failures for the same entity within a window
    RepeatedSyncFailure,
    /// A circuit breaker opened
    CircuitBreakerOpen,
    /// Rate-limit headroom fell to the critical band
    RateLimitCritical,
    /// Credential fetch or use failed repeatedly
    AuthFailure,
    /// Repeated remote errors not covered by another type
    IntegrationError,
    /// Operator-triggered test notification
    HealthCheck,
}

impl AlertType {
    pub const ALL: [AlertType; 6] = [
        AlertType::RepeatedSyncFailure,
        AlertType::CircuitBreakerOpen,
        AlertType::RateLimitCritical,
        AlertType::AuthFailure,
        AlertType::IntegrationError,
        AlertType::HealthCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::RepeatedSyncFailure => "REPEATED_SYNC_FAILURE",
            AlertType::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            AlertType::RateLimitCritical => "RATE_LIMIT_CRITICAL",
            AlertType::AuthFailure => "AUTH_FAILURE",
            AlertType::IntegrationError => "INTEGRATION_ERROR",
            AlertType::HealthCheck => "HEALTH_CHECK",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Error => "ERROR",
            AlertLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertMethod {
    /// Structured log line
    Log,
    Email,
    /// HTTP POST of the JSON event
    Webhook,
    /// Chat webhook with a formatted message
    Chat,
}

impl fmt::Display for AlertMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertMethod::Log => "LOG",
            AlertMethod::Email => "EMAIL",
            AlertMethod::Webhook => "WEBHOOK",
            AlertMethod::Chat => "CHAT",
        };
        f.write_str(label)
    }
}

fn default_cooldown_minutes() -> u32 {
    30
}

fn default_enabled() -> bool {
    true
}

/// Policy for one alert type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub level: AlertLevel,
    /// Failures within `window_minutes` needed to fire
    pub threshold: u32,
    pub window_minutes: u32,
    /// Minimum time between alerts for the same entity and type
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
    pub methods: Vec<AlertMethod>,
    /// Per-method recipients: addresses for email, URLs for webhooks,
    /// channels for chat
    #[serde(default)]
    pub recipients: BTreeMap<AlertMethod, Vec<String>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AlertConfig {
    pub fn new(
        alert_type: AlertType,
        level: AlertLevel,
        threshold: u32,
        window_minutes: u32,
        methods: Vec<AlertMethod>,
    ) -> Self {
        Self {
            alert_type,
            level,
            threshold,
            window_minutes,
            cooldown_minutes: default_cooldown_minutes(),
            methods,
            recipients: BTreeMap::new(),
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_cooldown_minutes(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_recipients(mut self, method: AlertMethod, recipients: Vec<String>) -> Self {
        self.recipients.insert(method, recipients);
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_minutes) * 60)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(u64::from(self.cooldown_minutes) * 60)
    }

    pub fn recipients_for(&self, method: AlertMethod) -> &[String] {
        self.recipients.get(&method).map_or(&[], Vec::as_slice)
    }

    /// Reject configs that could never fire or never forget failures
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(TourlinkError::InvalidInput(format!(
                "{}: threshold must be at least 1",
                self.alert_type
            )));
        }
        if self.window_minutes == 0 {
            return Err(TourlinkError::InvalidInput(format!(
                "{}: window must be at least one minute",
                self.alert_type
            )));
        }
        Ok(())
    }

    /// The default alert table
    pub fn defaults() -> Vec<AlertConfig> {
        use AlertLevel::{Critical, Error, Info, Warning};
        use AlertMethod::{Email, Log};

        vec![
            AlertConfig::new(AlertType::RepeatedSyncFailure, Error, 3, 60, vec![Log, Email]),
            AlertConfig::new(AlertType::CircuitBreakerOpen, Error, 1, 30, vec![Log, Email]),
            AlertConfig::new(AlertType::RateLimitCritical, Warning, 2, 30, vec![Log]),
            AlertConfig::new(AlertType::AuthFailure, Critical, 2, 30, vec![Log, Email]),
            AlertConfig::new(AlertType::IntegrationError, Warning, 5, 60, vec![Log]),
            AlertConfig::new(AlertType::HealthCheck, Info, 1, 1440, vec![Log]),
        ]
    }
}

/// A notification that was produced; never modified once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub level: AlertLevel,
    pub entity_id: String,
    pub entity_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
    /// Channels that accepted the event
    #[serde(default)]
    pub delivered_methods: Vec<AlertMethod>,
}

/// Filter for listing recorded alerts; empty fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub alert_type: Option<AlertType>,
    pub level: Option<AlertLevel>,
    pub since: Option<DateTime<Utc>>,
    /// Newest `limit` matches only
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn matches(&self, event: &AlertEvent) -> bool {
        self.alert_type.map_or(true, |t| t == event.alert_type)
            && self.level.map_or(true, |l| l == event.level)
            && self.since.map_or(true, |since| event.timestamp >= since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_type_once() {
        let defaults = AlertConfig::defaults();
        for alert_type in AlertType::ALL {
            assert_eq!(defaults.iter().filter(|c| c.alert_type == alert_type).count(), 1);
        }
        assert!(defaults.iter().all(|c| c.cooldown_minutes == 30 && c.enabled));
    }

    #[test]
    fn test_config_serializes_with_type_key() {
        let config = AlertConfig::new(
            AlertType::AuthFailure,
            AlertLevel::Critical,
            2,
            30,
            vec![AlertMethod::Log],
        )
        .with_recipients(AlertMethod::Email, vec!["ops@example.com".into()]);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "AUTH_FAILURE");
        assert_eq!(json["level"], "CRITICAL");
        assert_eq!(json["recipients"]["EMAIL"][0], "ops@example.com");

        let back: AlertConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validate_rejects_zero_threshold_and_window() {
        let mut config = AlertConfig::new(
            AlertType::IntegrationError,
            AlertLevel::Warning,
            0,
            60,
            vec![AlertMethod::Log],
        );
        assert!(config.validate().is_err());

        config.threshold = 1;
        config.window_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_matching() {
        let event = AlertEvent {
            id: Uuid::new_v4(),
            alert_type: AlertType::CircuitBreakerOpen,
            level: AlertLevel::Error,
            entity_id: "crm-api".into(),
            entity_type: "circuit_breaker".into(),
            message: "opened".into(),
            timestamp: Utc::now(),
            operation_id: None,
            details: BTreeMap::new(),
            delivered_methods: vec![AlertMethod::Log],
        };

        assert!(AlertFilter::default().matches(&event));
        assert!(AlertFilter { level: Some(AlertLevel::Error), ..Default::default() }
            .matches(&event));
        assert!(!AlertFilter { alert_type: Some(AlertType::AuthFailure), ..Default::default() }
            .matches(&event));
        assert!(!AlertFilter {
            since: Some(event.timestamp + chrono::Duration::seconds(1)),
            ..Default::default()
        }
        .matches(&event));
    }
}
