//! Configuration loader
//!
//! Loads [`TourlinkConfig`] from a file and layers `TOURLINK_*` environment
//! variables on top.
//!
//! ## Loading Strategy
//! 1. Reads a `.env` file if one exists (values already set in the process
//!    environment win)
//! 2. Probes the standard locations for a config file; when none exists the
//!    built-in defaults are used
//! 3. Applies environment overrides
//! 4. Validates the result
//!
//! ## Environment Variables
//! - `TOURLINK_LOG_FILTER`: `EnvFilter` directive used when `RUST_LOG` is unset
//! - `TOURLINK_LOG_JSON`: JSON log lines (true/false)
//! - `TOURLINK_MAX_RETRIES`: Retry budget for outbound calls
//! - `TOURLINK_TOKEN_URL`: OAuth2 token endpoint
//! - `TOURLINK_CLIENT_ID`: OAuth2 client id
//! - `TOURLINK_CLIENT_SECRET`: OAuth2 client secret
//! - `TOURLINK_TOKEN_SCOPE`: OAuth2 scope
//! - `TOURLINK_ALERT_WEBHOOK_URL`: Default webhook for alert delivery
//! - `TOURLINK_CHAT_WEBHOOK_URL`: Incoming-webhook URL for chat alerts
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./tourlink.toml`, `./tourlink.json`, `./config.toml`, `./config.json`
//! 2. The same names in the parent and grandparent directories
//! 3. The same names next to the executable

use std::path::{Path, PathBuf};

use tourlink_domain::{Result, TourlinkConfig, TourlinkError};

const FILE_NAMES: [&str; 4] = ["tourlink.toml", "tourlink.json", "config.toml", "config.json"];

/// Load configuration from the first file found, then the environment
///
/// # Errors
/// Returns `TourlinkError::Config` if a file exists but cannot be parsed, an
/// override has an invalid value, or the merged configuration fails
/// [`TourlinkConfig::validate`].
pub fn load() -> Result<TourlinkConfig> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    let mut config = match probe_config_paths() {
        Some(path) => read_config(&path)?,
        None => {
            tracing::info!("No config file found, using defaults");
            TourlinkConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations and fails when none
/// exists. Environment overrides are not applied.
///
/// # Errors
/// Returns `TourlinkError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - The configuration fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<TourlinkConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(TourlinkError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            TourlinkError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    let config = read_config(&config_path)?;
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<TourlinkConfig> {
    tracing::info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| TourlinkError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, path)
}

/// Parse configuration by file extension (`.json` or `.toml`)
fn parse_config(contents: &str, path: &Path) -> Result<TourlinkConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| TourlinkError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| TourlinkError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(TourlinkError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.extend(cwd.ancestors().take(3).map(Path::to_path_buf));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}

/// Layer `TOURLINK_*` variables over `config`
///
/// # Errors
/// Returns `TourlinkError::Config` when a numeric variable does not parse.
pub fn apply_env_overrides(config: &mut TourlinkConfig) -> Result<()> {
    if let Some(filter) = env_string("TOURLINK_LOG_FILTER") {
        config.logging.filter = filter;
    }
    config.logging.json = env_bool("TOURLINK_LOG_JSON", config.logging.json);

    if let Some(raw) = env_string("TOURLINK_MAX_RETRIES") {
        config.retry.max_retries = raw.parse::<u32>().map_err(|e| {
            TourlinkError::Config(format!("Invalid TOURLINK_MAX_RETRIES '{}': {}", raw, e))
        })?;
    }

    let token = &mut config.token;
    for (key, slot) in [
        ("TOURLINK_TOKEN_URL", &mut token.token_url),
        ("TOURLINK_CLIENT_ID", &mut token.client_id),
        ("TOURLINK_CLIENT_SECRET", &mut token.client_secret),
        ("TOURLINK_TOKEN_SCOPE", &mut token.scope),
    ] {
        if let Some(value) = env_string(key) {
            *slot = Some(value);
        }
    }

    if let Some(url) = env_string("TOURLINK_ALERT_WEBHOOK_URL") {
        config.alerts.webhook.default_url = Some(url);
    }
    if let Some(url) = env_string("TOURLINK_CHAT_WEBHOOK_URL") {
        config.alerts.chat.webhook_url = Some(url);
    }

    Ok(())
}

/// Non-empty environment variable
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
