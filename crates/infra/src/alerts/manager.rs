//! Policy-driven alerting
//!
//! Failure signals are bucketed per `(entity_id, operation_type)` and
//! evaluated against the [`AlertConfig`] of their alert type. An event fires
//! when the bucket reaches the threshold within the window and the
//! `(entity_id, alert_type)` cooldown has elapsed.
//!
//! Bookkeeping is synchronous and guarded per key; delivery happens after
//! every lock is released, so a slow channel never stalls unrelated
//! entities.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tourlink_common::resilience::{Clock, SharedClock};
use tourlink_domain::{
    AlertConfig, AlertEvent, AlertFilter, AlertLevel, AlertMethod, AlertSettings, AlertType,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channels::{
    AlertChannel, ChatChannel, EmailChannel, LogChannel, MailTransport, WebhookChannel,
};
use crate::integrations::remote::IntegrationError;

/// Default number of events kept for the dashboard
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Rejected alert-config update
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AlertError {
    #[error("Config for {actual} cannot be stored under {expected}")]
    TypeMismatch { expected: AlertType, actual: AlertType },

    #[error("Invalid alert config: {0}")]
    Invalid(String),
}

/// Result of evaluating one failure signal
#[derive(Debug, Clone, PartialEq)]
pub enum AlertDecision {
    /// An event was produced and dispatched
    Triggered(AlertEvent),
    /// Recorded; not enough failures in the window yet
    BelowThreshold { count: usize, threshold: u32 },
    /// Threshold reached but the entity alerted recently
    CoolingDown { remaining: Duration },
    /// The alert type is switched off
    Disabled,
    /// No config exists for the alert type
    Unconfigured,
}

impl AlertDecision {
    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered(_))
    }

    pub fn event(&self) -> Option<&AlertEvent> {
        match self {
            Self::Triggered(event) => Some(event),
            _ => None,
        }
    }
}

/// One failure observation fed to the manager
#[derive(Debug, Clone, PartialEq)]
pub struct FailureSignal {
    pub alert_type: AlertType,
    pub entity_id: String,
    pub entity_type: String,
    pub operation_type: String,
    pub error: String,
    pub operation_id: Option<String>,
    pub details: BTreeMap<String, Value>,
}

impl FailureSignal {
    pub fn new(
        alert_type: AlertType,
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        operation_type: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            operation_type: operation_type.into(),
            error: error.into(),
            operation_id: None,
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone)]
struct FailureRecord {
    entity_type: String,
    error_message: String,
    at: Instant,
    timestamp: DateTime<Utc>,
}

type FailureKey = (String, String);
type CooldownKey = (String, AlertType);

/// Converts failure signals into rate-limited notifications
pub struct AlertManager {
    configs: RwLock<BTreeMap<AlertType, AlertConfig>>,
    failures: DashMap<FailureKey, VecDeque<FailureRecord>>,
    last_alerts: DashMap<CooldownKey, Instant>,
    channels: BTreeMap<AlertMethod, Arc<dyn AlertChannel>>,
    history: Mutex<VecDeque<AlertEvent>>,
    history_capacity: usize,
    last_sweep: Mutex<Instant>,
    clock: SharedClock,
}

impl std::fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertManager")
            .field("configs", &self.configs.read().len())
            .field("tracked_keys", &self.tracked_keys())
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("history", &self.history.lock().len())
            .finish_non_exhaustive()
    }
}

impl AlertManager {
    /// Manager with the log channel registered
    pub fn new(configs: impl IntoIterator<Item = AlertConfig>, clock: SharedClock) -> Self {
        let configs = configs.into_iter().map(|config| (config.alert_type, config)).collect();
        let mut channels: BTreeMap<AlertMethod, Arc<dyn AlertChannel>> = BTreeMap::new();
        channels.insert(AlertMethod::Log, Arc::new(LogChannel));

        Self {
            configs: RwLock::new(configs),
            failures: DashMap::new(),
            last_alerts: DashMap::new(),
            channels,
            history: Mutex::new(VecDeque::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            last_sweep: Mutex::new(clock.now()),
            clock,
        }
    }

    /// Build the manager and its channels from settings.
    ///
    /// Email is only available with a transport; chat only with a webhook
    /// URL. Webhook targets may come from per-config recipients, so that
    /// channel is always registered.
    pub fn from_settings(
        settings: &AlertSettings,
        clock: SharedClock,
        mail: Option<Arc<dyn MailTransport>>,
    ) -> Result<Self, AlertError> {
        for config in &settings.configs {
            config.validate().map_err(|e| AlertError::Invalid(e.to_string()))?;
        }

        let http = Client::builder()
            .build()
            .map_err(|e| AlertError::Invalid(format!("alert HTTP client: {e}")))?;

        let mut manager = Self::new(settings.configs.iter().cloned(), clock)
            .with_history_capacity(settings.history_capacity)
            .with_channel(Arc::new(WebhookChannel::new(http.clone(), settings.webhook.clone())));

        if let Some(transport) = mail {
            manager =
                manager.with_channel(Arc::new(EmailChannel::new(transport, settings.email.clone())));
        }
        if settings.chat.webhook_url.is_some() {
            manager = manager.with_channel(Arc::new(ChatChannel::new(http, settings.chat.clone())));
        }
        Ok(manager)
    }

    /// Register or replace the channel for its method
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.insert(channel.method(), channel);
        self
    }

    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    // ========================================================================
    // Failure intake
    // ========================================================================

    /// Record a failed operation, deriving the alert type from the error
    pub async fn record_operation_failure(
        &self,
        entity_id: &str,
        entity_type: &str,
        operation_type: &str,
        error: &IntegrationError,
        operation_id: Option<&str>,
        details: BTreeMap<String, Value>,
    ) -> AlertDecision {
        let mut signal = FailureSignal::new(
            error.alert_type(),
            entity_id,
            entity_type,
            operation_type,
            error.to_string(),
        );
        signal.operation_id = operation_id.map(str::to_string);
        signal.details = details;
        self.record_failure(signal).await
    }

    /// Record a failure signal and fire an alert when policy allows
    pub async fn record_failure(&self, signal: FailureSignal) -> AlertDecision {
        let Some(config) = self.get_alert_config(signal.alert_type) else {
            debug!(alert_type = %signal.alert_type, "No alert config, failure not tracked");
            return AlertDecision::Unconfigured;
        };
        if !config.enabled {
            return AlertDecision::Disabled;
        }

        let now = self.clock.now();
        self.sweep_if_due(now);
        let count = self.push_failure(&signal, now, config.window());
        if count < config.threshold as usize {
            debug!(
                entity_id = %signal.entity_id,
                operation = %signal.operation_type,
                count,
                threshold = config.threshold,
                "Failure recorded below alert threshold"
            );
            return AlertDecision::BelowThreshold { count, threshold: config.threshold };
        }

        if let Err(remaining) = self.claim_cooldown(&signal.entity_id, signal.alert_type, now, &config)
        {
            debug!(
                entity_id = %signal.entity_id,
                alert_type = %signal.alert_type,
                remaining_secs = remaining.as_secs(),
                "Alert suppressed by cooldown"
            );
            return AlertDecision::CoolingDown { remaining };
        }

        let mut details = signal.details;
        details.insert("failure_count".into(), json!(count));
        details.insert("operation_type".into(), json!(signal.operation_type));
        details.insert("window_minutes".into(), json!(config.window_minutes));

        let event = AlertEvent {
            id: Uuid::new_v4(),
            alert_type: signal.alert_type,
            level: config.level,
            message: format!(
                "Repeated {} failures for {} {}: {}",
                signal.operation_type, signal.entity_type, signal.entity_id, signal.error
            ),
            entity_id: signal.entity_id,
            entity_type: signal.entity_type,
            timestamp: self.clock.utc_now(),
            operation_id: signal.operation_id,
            details,
            delivered_methods: Vec::new(),
        };

        AlertDecision::Triggered(self.dispatch(event, &config).await)
    }

    /// Prune stale keys at most once per shortest configured window
    fn sweep_if_due(&self, now: Instant) {
        let interval =
            self.configs.read().values().map(AlertConfig::window).min().unwrap_or(Duration::ZERO);
        {
            let mut last = self.last_sweep.lock();
            if now.saturating_duration_since(*last) < interval {
                return;
            }
            *last = now;
        }

        let removed = self.prune_expired();
        if removed > 0 {
            debug!(removed, remaining = self.tracked_keys(), "Pruned stale alert bookkeeping");
        }
    }

    /// Append the failure and return how many remain inside the window
    fn push_failure(&self, signal: &FailureSignal, now: Instant, window: Duration) -> usize {
        let key = (signal.entity_id.clone(), signal.operation_type.clone());
        let mut records = self.failures.entry(key).or_default();

        records.push_back(FailureRecord {
            entity_type: signal.entity_type.clone(),
            error_message: signal.error.clone(),
            at: now,
            timestamp: self.clock.utc_now(),
        });
        while records.front().is_some_and(|r| now.saturating_duration_since(r.at) > window) {
            records.pop_front();
        }
        records.len()
    }

    /// Check-and-set of the cooldown slot; `Err` carries the time left
    fn claim_cooldown(
        &self,
        entity_id: &str,
        alert_type: AlertType,
        now: Instant,
        config: &AlertConfig,
    ) -> Result<(), Duration> {
        match self.last_alerts.entry((entity_id.to_string(), alert_type)) {
            Entry::Occupied(mut last) => {
                let elapsed = now.saturating_duration_since(*last.get());
                if elapsed < config.cooldown() {
                    return Err(config.cooldown() - elapsed);
                }
                last.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Deliver to every configured method concurrently and record the event
    async fn dispatch(&self, mut event: AlertEvent, config: &AlertConfig) -> AlertEvent {
        let deliveries = config.methods.iter().filter_map(|method| {
            let Some(channel) = self.channels.get(method) else {
                warn!(method = %method, alert_type = %event.alert_type, "No channel registered for alert method");
                return None;
            };
            let channel = Arc::clone(channel);
            let recipients = config.recipients_for(*method);
            let event = &event;
            Some(async move { (*method, channel.deliver(event, recipients).await) })
        });

        let mut delivered = Vec::new();
        for (method, result) in join_all(deliveries).await {
            match result {
                Ok(()) => delivered.push(method),
                Err(err) => warn!(
                    alert_id = %event.id,
                    method = %method,
                    error = %err,
                    "Alert delivery failed"
                ),
            }
        }
        event.delivered_methods = delivered;

        info!(
            alert_id = %event.id,
            alert_type = %event.alert_type,
            entity_id = %event.entity_id,
            delivered = ?event.delivered_methods,
            "Alert triggered"
        );

        let mut history = self.history.lock();
        history.push_back(event.clone());
        while history.len() > self.history_capacity {
            history.pop_front();
        }
        event
    }

    /// Emit a HEALTH_CHECK event through its configured channels, bypassing
    /// thresholds and cooldown
    pub async fn send_test_alert(&self, level: AlertLevel) -> AlertEvent {
        let config = self.get_alert_config(AlertType::HealthCheck).unwrap_or_else(|| {
            AlertConfig::new(AlertType::HealthCheck, level, 1, 1440, vec![AlertMethod::Log])
        });

        let event = AlertEvent {
            id: Uuid::new_v4(),
            alert_type: AlertType::HealthCheck,
            level,
            entity_id: "system".into(),
            entity_type: "health_check".into(),
            message: "Test alert from the tour sync monitor".into(),
            timestamp: self.clock.utc_now(),
            operation_id: None,
            details: BTreeMap::from([("test".to_string(), json!(true))]),
            delivered_methods: Vec::new(),
        };
        self.dispatch(event, &config).await
    }

    // ========================================================================
    // Reads and admin
    // ========================================================================

    /// Recorded alerts matching `filter`, newest first
    pub fn list_alerts(&self, filter: &AlertFilter) -> Vec<AlertEvent> {
        let history = self.history.lock();
        let matches = history.iter().rev().filter(|event| filter.matches(event)).cloned();
        match filter.limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        }
    }

    pub fn list_alert_configs(&self) -> Vec<AlertConfig> {
        self.configs.read().values().cloned().collect()
    }

    pub fn get_alert_config(&self, alert_type: AlertType) -> Option<AlertConfig> {
        self.configs.read().get(&alert_type).cloned()
    }

    /// Replace the config stored for `alert_type`
    pub fn update_alert_config(
        &self,
        alert_type: AlertType,
        config: AlertConfig,
    ) -> Result<(), AlertError> {
        if config.alert_type != alert_type {
            return Err(AlertError::TypeMismatch { expected: alert_type, actual: config.alert_type });
        }
        config.validate().map_err(|e| AlertError::Invalid(e.to_string()))?;

        info!(
            alert_type = %alert_type,
            threshold = config.threshold,
            window_minutes = config.window_minutes,
            enabled = config.enabled,
            "Alert config updated"
        );
        self.configs.write().insert(alert_type, config);
        Ok(())
    }

    /// Number of failures currently retained for an entity and operation
    pub fn failure_count(&self, entity_id: &str, operation_type: &str) -> usize {
        self.failures
            .get(&(entity_id.to_string(), operation_type.to_string()))
            .map_or(0, |records| records.len())
    }

    /// Most recent retained failure for an entity and operation
    pub fn last_failure(&self, entity_id: &str, operation_type: &str) -> Option<(String, String, DateTime<Utc>)> {
        self.failures
            .get(&(entity_id.to_string(), operation_type.to_string()))
            .and_then(|records| {
                records
                    .back()
                    .map(|r| (r.entity_type.clone(), r.error_message.clone(), r.timestamp))
            })
    }

    /// Failure buckets plus live cooldown slots
    pub fn tracked_keys(&self) -> usize {
        self.failures.len() + self.last_alerts.len()
    }

    /// Drop failure buckets older than the longest configured window and
    /// cooldown slots that have expired. Returns the number of keys removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let configs = self.configs.read().clone();
        let longest_window =
            configs.values().map(AlertConfig::window).max().unwrap_or(Duration::ZERO);

        let mut removed = 0;
        self.failures.retain(|_, records| {
            while records.front().is_some_and(|r| now.saturating_duration_since(r.at) > longest_window) {
                records.pop_front();
            }
            let keep = !records.is_empty();
            removed += usize::from(!keep);
            keep
        });
        self.last_alerts.retain(|(_, alert_type), last| {
            let cooldown = configs.get(alert_type).map_or(Duration::ZERO, AlertConfig::cooldown);
            let keep = now.saturating_duration_since(*last) < cooldown;
            removed += usize::from(!keep);
            keep
        });
        removed
    }
}
