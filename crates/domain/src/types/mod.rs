//! Common data types used throughout the integration layer

pub mod alert;
pub mod health;

pub use alert::{AlertConfig, AlertEvent, AlertFilter, AlertLevel, AlertMethod, AlertType};
pub use health::{RateLimitHealth, SystemHealth};
