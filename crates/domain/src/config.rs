//! Configuration structures
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working configuration. Durations are stored as integer seconds or
//! milliseconds to keep TOML and JSON files readable.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TourlinkError};
use crate::types::AlertConfig;

/// Dependency names guarded out of the box
pub const CRM_API: &str = "crm-api";
pub const CRM_MCP: &str = "crm-mcp";
pub const ROUTE_OPTIMIZER: &str = "route-optimizer";

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TourlinkConfig {
    /// Breaker settings per guarded dependency
    pub breakers: BTreeMap<String, BreakerSettings>,
    pub retry: RetrySettings,
    pub token: TokenSettings,
    pub rate_limits: RateLimitSettings,
    pub metrics: MetricsSettings,
    pub alerts: AlertSettings,
    pub logging: LoggingConfig,
}

impl Default for TourlinkConfig {
    fn default() -> Self {
        let breakers = BTreeMap::from([
            (CRM_API.to_string(), BreakerSettings::new(3, 60)),
            (CRM_MCP.to_string(), BreakerSettings::new(5, 120)),
            (ROUTE_OPTIMIZER.to_string(), BreakerSettings::new(5, 60)),
        ]);

        Self {
            breakers,
            retry: RetrySettings::default(),
            token: TokenSettings::default(),
            rate_limits: RateLimitSettings::default(),
            metrics: MetricsSettings::default(),
            alerts: AlertSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TourlinkConfig {
    /// Breaker settings for `dependency`, falling back to defaults
    pub fn breaker(&self, dependency: &str) -> BreakerSettings {
        self.breakers.get(dependency).copied().unwrap_or_default()
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        for (name, breaker) in &self.breakers {
            if breaker.failure_threshold == 0 {
                return Err(TourlinkError::Config(format!(
                    "breaker '{name}': failure_threshold must be at least 1"
                )));
            }
            if breaker.recovery_timeout_secs == 0 {
                return Err(TourlinkError::Config(format!(
                    "breaker '{name}': recovery_timeout_secs must be at least 1"
                )));
            }
        }

        if self.retry.max_backoff_ms < self.retry.base_backoff_ms {
            return Err(TourlinkError::Config(
                "retry.max_backoff_ms must not be smaller than retry.base_backoff_ms".into(),
            ));
        }
        if self.retry.attempt_timeout_secs == 0 {
            return Err(TourlinkError::Config("retry.attempt_timeout_secs must be at least 1".into()));
        }

        if !(0.0..1.0).contains(&self.token.jitter_ratio) {
            return Err(TourlinkError::Config("token.jitter_ratio must be in [0, 1)".into()));
        }

        let limits = &self.rate_limits;
        let in_unit = |r: f64| r > 0.0 && r < 1.0;
        if !in_unit(limits.warning_ratio) || !in_unit(limits.critical_ratio) {
            return Err(TourlinkError::Config(
                "rate_limits ratios must be strictly between 0 and 1".into(),
            ));
        }
        if limits.critical_ratio >= limits.warning_ratio {
            return Err(TourlinkError::Config(
                "rate_limits.critical_ratio must be below rate_limits.warning_ratio".into(),
            ));
        }

        if self.metrics.sample_capacity == 0 {
            return Err(TourlinkError::Config("metrics.sample_capacity must be at least 1".into()));
        }

        for config in &self.alerts.configs {
            config.validate().map_err(|e| TourlinkError::Config(e.to_string()))?;
        }

        Ok(())
    }
}

/// Circuit breaker settings for one dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl BreakerSettings {
    pub fn new(failure_threshold: u32, recovery_timeout_secs: u64) -> Self {
        Self { failure_threshold, recovery_timeout_secs }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::new(5, 60)
    }
}

/// Retry loop settings applied by the resilient client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upper bound for a single remote attempt
    pub attempt_timeout_secs: u64,
    /// Longest wait honoured for a remote-declared rate-limit reset
    pub rate_limit_max_wait_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff_ms: 1_000,
            max_backoff_ms: 32_000,
            attempt_timeout_secs: 30,
            rate_limit_max_wait_secs: 60,
        }
    }
}

impl RetrySettings {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn rate_limit_max_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit_max_wait_secs)
    }
}

/// Bearer token settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    /// Endpoint for the client-credentials grant
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    /// Lifetime assumed when the issuer does not declare one
    pub default_lifetime_secs: u64,
    /// Maximum fraction of the lifetime shaved off the cached expiry
    pub jitter_ratio: f64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            token_url: None,
            client_id: None,
            client_secret: None,
            scope: None,
            default_lifetime_secs: 3_300,
            jitter_ratio: 0.1,
        }
    }
}

/// Rate-limit health bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub warning_ratio: f64,
    pub critical_ratio: f64,
    /// Label used when a response cannot be tied to an operation
    pub default_endpoint: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { warning_ratio: 0.25, critical_ratio: 0.10, default_endpoint: CRM_API.to_string() }
    }
}

/// Bounds for in-memory metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Latency samples kept per operation
    pub sample_capacity: usize,
    /// Transitions kept per breaker
    pub transition_history: usize,
    /// Window for the summary's recent-failure count
    pub recent_failure_window_secs: u64,
    /// Failure timestamps kept for that count
    pub recent_failure_capacity: usize,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            sample_capacity: 1_000,
            transition_history: 100,
            recent_failure_window_secs: 86_400,
            recent_failure_capacity: 10_000,
        }
    }
}

impl MetricsSettings {
    pub fn recent_failure_window(&self) -> Duration {
        Duration::from_secs(self.recent_failure_window_secs)
    }
}

/// Alert policies and channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Events kept in memory for listing
    pub history_capacity: usize,
    pub configs: Vec<AlertConfig>,
    pub email: EmailSettings,
    pub webhook: WebhookSettings,
    pub chat: ChatSettings,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            history_capacity: 500,
            configs: AlertConfig::defaults(),
            email: EmailSettings::default(),
            webhook: WebhookSettings::default(),
            chat: ChatSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub sender: String,
    /// Used when an alert config lists no email recipients
    pub default_recipients: Vec<String>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self { sender: "alerts@tourlink.local".to_string(), default_recipients: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// Used when an alert config lists no webhook recipients
    pub default_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self { default_url: None, headers: BTreeMap::new(), timeout_secs: 10 }
    }
}

impl WebhookSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub webhook_url: Option<String>,
    pub channel: String,
    pub username: String,
    pub icon_emoji: String,
    pub timeout_secs: u64,
    /// Linked from the message when set
    pub dashboard_url: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            channel: "#alerts".to_string(),
            username: "Tourlink Alerts".to_string(),
            icon_emoji: ":rotating_light:".to_string(),
            timeout_secs: 10,
            dashboard_url: None,
        }
    }
}

impl ChatSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}
