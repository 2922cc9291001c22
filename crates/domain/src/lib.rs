//! # Tourlink Domain
//!
//! Domain types shared by the integration layer and its hosts.
//!
//! This crate contains:
//! - Alert types, levels, delivery methods, configs and events
//! - Health classifications for rate limits and the overall system
//! - Configuration structures with their defaults
//! - Domain error types and Result definitions
//!
//! ## Architecture
//! - No dependencies on other Tourlink crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
