//! Failure classification for remote calls
//!
//! The outbound adapter turns every failed attempt into a [`RemoteFailure`];
//! the resilient client turns the final outcome of a call into an
//! [`IntegrationError`] that business code can match on.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tourlink_domain::AlertType;

use crate::observability::RateLimitInfo;

/// Closed set of failure classes produced by the outbound adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Credentials rejected (401, 403)
    Auth,
    /// Remote quota exhausted (429)
    RateLimit,
    /// Transient server-side failure (5xx, connection errors)
    Server,
    /// Malformed request; never retried
    Validation,
    /// A dependency behind the remote has its own breaker open
    CircuitOpen,
    /// The attempt exceeded its time budget
    Timeout,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Validation => "validation",
            Self::CircuitOpen => "circuit_open",
            Self::Timeout => "timeout",
        };
        f.write_str(label)
    }
}

/// A failed attempt against a remote dependency
#[derive(Debug, Clone, Error)]
pub enum RemoteFailure {
    #[error("Credentials rejected: {message}")]
    Auth { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        /// Remote-declared wait before the quota resets
        retry_after: Option<Duration>,
        /// Quota headers carried by the rejection, when present
        limits: Option<RateLimitInfo>,
    },

    #[error("Server error: {message}")]
    Server { status: Option<u16>, message: String },

    #[error("Invalid request: {message}")]
    Validation { status: Option<u16>, message: String },

    #[error("Upstream circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl RemoteFailure {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth { message: message.into() }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimit { message: "quota exhausted".into(), retry_after, limits: None }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::Server { status: None, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { status: None, message: message.into() }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::Auth { .. } => FailureClass::Auth,
            Self::RateLimit { .. } => FailureClass::RateLimit,
            Self::Server { .. } => FailureClass::Server,
            Self::Validation { .. } => FailureClass::Validation,
            Self::CircuitOpen { .. } => FailureClass::CircuitOpen,
            Self::Timeout(_) => FailureClass::Timeout,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        match self {
            Self::RateLimit { limits, .. } => *limits,
            _ => None,
        }
    }
}

/// Categories of surfaced errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Auth,
    RateLimit,
    Server,
    CircuitOpen,
    Validation,
    Config,
}

/// Error surfaced by a resilient call once retries are done
#[derive(Debug, Clone, Error)]
pub enum IntegrationError {
    /// Credential fetch or remote authentication failed
    #[error("Authentication with {dependency} failed: {message}")]
    Auth { dependency: String, message: String },

    /// Quota still exhausted after the last retry
    #[error("Rate limit on {dependency} exhausted after {attempts} attempt(s)")]
    RateLimit { dependency: String, attempts: u32, retry_after: Option<Duration> },

    /// Transient failures persisted after the last retry
    #[error("{dependency} failed after {attempts} attempt(s): {message}")]
    Server { dependency: String, attempts: u32, status: Option<u16>, message: String },

    /// Rejected without a remote attempt
    #[error("Circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String, retry_in: Option<Duration> },

    /// Malformed request; never retried
    #[error("Invalid request to {dependency}: {message}")]
    Validation { dependency: String, status: Option<u16>, message: String },

    /// Client construction or policy settings are invalid
    #[error("Invalid integration configuration: {0}")]
    Config(String),
}

impl IntegrationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth { .. } => ErrorCategory::Auth,
            Self::RateLimit { .. } => ErrorCategory::RateLimit,
            Self::Server { .. } => ErrorCategory::Server,
            Self::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Config,
        }
    }

    /// Temporarily degraded; an outer scheduler should re-attempt later
    /// instead of treating the operation as failed
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::RateLimit { .. })
    }

    /// Suggested wait before the caller tries again
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            Self::CircuitOpen { retry_in, .. } => *retry_in,
            _ => None,
        }
    }

    /// Alert type raised when this error ends a call
    pub fn alert_type(&self) -> AlertType {
        match self {
            Self::CircuitOpen { .. } => AlertType::CircuitBreakerOpen,
            Self::RateLimit { .. } => AlertType::RateLimitCritical,
            Self::Auth { .. } => AlertType::AuthFailure,
            Self::Server { .. } => AlertType::RepeatedSyncFailure,
            Self::Validation { .. } | Self::Config(_) => AlertType::IntegrationError,
        }
    }

    /// Build the surfaced error for a failed final attempt
    pub(crate) fn from_failure(dependency: &str, attempts: u32, failure: RemoteFailure) -> Self {
        let dependency = dependency.to_string();
        match failure {
            RemoteFailure::Auth { message } => Self::Auth { dependency, message },
            RemoteFailure::RateLimit { retry_after, .. } => {
                Self::RateLimit { dependency, attempts, retry_after }
            }
            RemoteFailure::Server { status, message } => {
                Self::Server { dependency, attempts, status, message }
            }
            RemoteFailure::Timeout(after) => Self::Server {
                dependency,
                attempts,
                status: None,
                message: format!("attempt timed out after {after:?}"),
            },
            RemoteFailure::Validation { status, message } => {
                Self::Validation { dependency, status, message }
            }
            RemoteFailure::CircuitOpen { breaker } => Self::CircuitOpen { breaker, retry_in: None },
        }
    }
}

/// Lets an operation that itself calls another resilient client propagate
/// that client's outcome with `?`
impl From<IntegrationError> for RemoteFailure {
    fn from(err: IntegrationError) -> Self {
        match err {
            IntegrationError::CircuitOpen { breaker, .. } => Self::CircuitOpen { breaker },
            IntegrationError::RateLimit { retry_after, .. } => Self::rate_limited(retry_after),
            IntegrationError::Auth { message, .. } => Self::Auth { message },
            IntegrationError::Server { status, message, .. } => Self::Server { status, message },
            IntegrationError::Validation { status, message, .. } => {
                Self::Validation { status, message }
            }
            IntegrationError::Config(message) => Self::Validation { status: None, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        assert_eq!(RemoteFailure::auth("expired").class(), FailureClass::Auth);
        assert_eq!(RemoteFailure::rate_limited(None).class(), FailureClass::RateLimit);
        assert_eq!(RemoteFailure::server("502").class(), FailureClass::Server);
        assert_eq!(RemoteFailure::validation("bad id").class(), FailureClass::Validation);
        assert_eq!(RemoteFailure::Timeout(Duration::from_secs(1)).class(), FailureClass::Timeout);
    }

    #[test]
    fn test_timeout_surfaces_as_server_error() {
        let err = IntegrationError::from_failure(
            "route-optimizer",
            4,
            RemoteFailure::Timeout(Duration::from_secs(30)),
        );
        assert_eq!(err.category(), ErrorCategory::Server);
        assert!(!err.is_degraded());
        assert_eq!(err.alert_type(), AlertType::RepeatedSyncFailure);
    }

    #[test]
    fn test_degraded_errors_carry_retry_hint() {
        let rate_limited = IntegrationError::from_failure(
            "crm-api",
            6,
            RemoteFailure::rate_limited(Some(Duration::from_secs(42))),
        );
        assert!(rate_limited.is_degraded());
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(rate_limited.alert_type(), AlertType::RateLimitCritical);

        let open = IntegrationError::CircuitOpen {
            breaker: "crm-api".into(),
            retry_in: Some(Duration::from_secs(10)),
        };
        assert!(open.is_degraded());
        assert_eq!(open.retry_after(), Some(Duration::from_secs(10)));
        assert_eq!(open.alert_type(), AlertType::CircuitBreakerOpen);
    }

    #[test]
    fn test_alert_type_derivation() {
        let auth = IntegrationError::from_failure("crm-api", 1, RemoteFailure::auth("401"));
        assert_eq!(auth.alert_type(), AlertType::AuthFailure);

        let invalid = IntegrationError::from_failure("crm-api", 1, RemoteFailure::validation("422"));
        assert_eq!(invalid.alert_type(), AlertType::IntegrationError);
        assert!(!invalid.is_degraded());
    }

    #[test]
    fn test_nested_circuit_open_keeps_breaker_name() {
        let nested: RemoteFailure =
            IntegrationError::CircuitOpen { breaker: "crm-mcp".into(), retry_in: None }.into();
        assert_eq!(nested.class(), FailureClass::CircuitOpen);

        match IntegrationError::from_failure("crm-api", 1, nested) {
            IntegrationError::CircuitOpen { breaker, .. } => assert_eq!(breaker, "crm-mcp"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
