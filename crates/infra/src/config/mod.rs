//! Configuration loading
//!
//! File discovery, JSON/TOML parsing and `TOURLINK_*` environment overrides
//! for [`TourlinkConfig`](tourlink_domain::TourlinkConfig).

pub mod loader;

pub use loader::{apply_env_overrides, load, load_from_file, probe_config_paths};
