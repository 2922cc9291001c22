//! Health classifications shown on the monitoring surface

use std::fmt;

use serde::{Deserialize, Serialize};

/// Remaining rate-limit headroom, classified against configured ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitHealth {
    Healthy,
    Warning,
    Critical,
}

impl RateLimitHealth {
    /// Classify a `remaining / limit` ratio.
    ///
    /// Above `warning_ratio` is healthy, above `critical_ratio` is a warning,
    /// anything at or below `critical_ratio` is critical.
    pub fn classify(ratio: f64, warning_ratio: f64, critical_ratio: f64) -> Self {
        if ratio > warning_ratio {
            RateLimitHealth::Healthy
        } else if ratio > critical_ratio {
            RateLimitHealth::Warning
        } else {
            RateLimitHealth::Critical
        }
    }
}

impl fmt::Display for RateLimitHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RateLimitHealth::Healthy => "HEALTHY",
            RateLimitHealth::Warning => "WARNING",
            RateLimitHealth::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// Overall integration health reported by the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemHealth {
    Healthy,
    Warning,
    Degraded,
}

impl fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SystemHealth::Healthy => "HEALTHY",
            SystemHealth::Warning => "WARNING",
            SystemHealth::Degraded => "DEGRADED",
        };
        f.write_str(label)
    }
}
