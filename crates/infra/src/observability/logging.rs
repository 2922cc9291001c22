//! Tracing subscriber setup

use tourlink_domain::{LoggingConfig, Result, TourlinkError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Build the filter: `RUST_LOG` wins, otherwise the configured directive.
///
/// # Errors
/// Returns `TourlinkError::Config` if the configured directive does not parse
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.filter).map_err(|e| {
        TourlinkError::Config(format!("Invalid log filter '{}': {}", config.filter, e))
    })
}

/// Install the global subscriber.
///
/// Calling this more than once is harmless: a subscriber that is already set
/// is kept and the call returns `Ok(false)`.
///
/// # Errors
/// Returns `TourlinkError::Config` for an invalid filter directive
pub fn init_tracing(config: &LoggingConfig) -> Result<bool> {
    let filter = build_filter(config)?;

    let installed = if config.json {
        Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()
    } else {
        Registry::default().with(filter).with(fmt::layer().with_target(true)).try_init()
    };

    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_config_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig { filter: "tourlink=[".into(), json: false };
        assert!(matches!(build_filter(&config), Err(TourlinkError::Config(_))));
    }

    #[test]
    fn test_second_init_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config).unwrap());
    }
}
