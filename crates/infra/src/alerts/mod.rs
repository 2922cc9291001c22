//! Alerting: failure bookkeeping, cooldowns and delivery channels

pub mod channels;
pub mod manager;

pub use channels::{
    AlertChannel, ChatChannel, DeliveryError, EmailChannel, EmailMessage, LogChannel,
    MailTransport, WebhookChannel,
};
pub use manager::{AlertDecision, AlertError, AlertManager, FailureSignal};
