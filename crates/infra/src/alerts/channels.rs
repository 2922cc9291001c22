//! Alert delivery channels
//!
//! Every channel exposes one capability: deliver an event to its
//! recipients. Failures are returned, never raised further; the manager logs
//! them and moves on to the next channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tourlink_domain::{
    AlertEvent, AlertLevel, AlertMethod, ChatSettings, EmailSettings, WebhookSettings,
};
use tracing::{debug, error, info, warn};

/// A single channel failed to deliver an event
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("{method} delivery has no recipients configured")]
    NoRecipients { method: AlertMethod },

    #[error("{method} delivery to {target} failed: {message}")]
    Transport { method: AlertMethod, target: String, message: String },

    #[error("{method} delivery to {target} returned HTTP {status}")]
    Status { method: AlertMethod, target: String, status: u16 },
}

/// Notification capability
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn method(&self) -> AlertMethod;

    /// Deliver `event`; `recipients` come from the alert's config and may be
    /// empty, in which case the channel falls back to its own defaults
    async fn deliver(&self, event: &AlertEvent, recipients: &[String]) -> Result<(), DeliveryError>;
}

// ============================================================================
// Log sink
// ============================================================================

/// Writes the event as a structured log line at a level matching its
/// severity
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn method(&self) -> AlertMethod {
        AlertMethod::Log
    }

    async fn deliver(&self, event: &AlertEvent, _recipients: &[String]) -> Result<(), DeliveryError> {
        let details = serde_json::to_string(&event.details).unwrap_or_default();
        match event.level {
            AlertLevel::Info => info!(
                alert_id = %event.id,
                alert_type = %event.alert_type,
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                details = %details,
                "{}",
                event.message
            ),
            AlertLevel::Warning => warn!(
                alert_id = %event.id,
                alert_type = %event.alert_type,
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                details = %details,
                "{}",
                event.message
            ),
            AlertLevel::Error | AlertLevel::Critical => error!(
                alert_id = %event.id,
                alert_type = %event.alert_type,
                level = %event.level,
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                details = %details,
                "{}",
                event.message
            ),
        }
        Ok(())
    }
}

// ============================================================================
// Email
// ============================================================================

/// A rendered email ready for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Sends rendered emails (SMTP relay, provider API, test spy, ...)
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), String>;
}

/// Subject line for an alert email
pub fn email_subject(event: &AlertEvent) -> String {
    format!("[{}] Tour sync alert: {}", event.level, event.alert_type)
}

/// Plain-text body for an alert email
pub fn email_body(event: &AlertEvent) -> String {
    let mut body = format!(
        "Alert: {}\nLevel: {}\nTime: {}\nEntity: {} {}\n",
        event.alert_type,
        event.level,
        event.timestamp.to_rfc3339(),
        event.entity_type,
        event.entity_id,
    );
    if let Some(operation_id) = &event.operation_id {
        body.push_str(&format!("Operation: {operation_id}\n"));
    }
    body.push_str(&format!("\n{}\n", event.message));

    if !event.details.is_empty() {
        body.push_str("\nDetails:\n");
        for (key, value) in &event.details {
            body.push_str(&format!("  {key}: {value}\n"));
        }
    }
    body
}

pub struct EmailChannel {
    transport: Arc<dyn MailTransport>,
    settings: EmailSettings,
}

impl EmailChannel {
    pub fn new(transport: Arc<dyn MailTransport>, settings: EmailSettings) -> Self {
        Self { transport, settings }
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn method(&self) -> AlertMethod {
        AlertMethod::Email
    }

    async fn deliver(&self, event: &AlertEvent, recipients: &[String]) -> Result<(), DeliveryError> {
        let to = if recipients.is_empty() { &self.settings.default_recipients[..] } else { recipients };
        if to.is_empty() {
            return Err(DeliveryError::NoRecipients { method: AlertMethod::Email });
        }

        let message = EmailMessage {
            from: self.settings.sender.clone(),
            to: to.to_vec(),
            subject: email_subject(event),
            body: email_body(event),
        };

        self.transport.send(&message).await.map_err(|message| DeliveryError::Transport {
            method: AlertMethod::Email,
            target: to.join(", "),
            message,
        })?;

        debug!(alert_id = %event.id, recipients = to.len(), "Alert email sent");
        Ok(())
    }
}

// ============================================================================
// HTTP channels
// ============================================================================

async fn post_json(
    client: &Client,
    method: AlertMethod,
    url: &str,
    headers: &[(String, String)],
    payload: &Value,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    let mut request = client.post(url).timeout(timeout).json(payload);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().await.map_err(|e| DeliveryError::Transport {
        method,
        target: url.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DeliveryError::Status { method, target: url.to_string(), status: status.as_u16() });
    }
    Ok(())
}

/// Post to every target concurrently; the first failure is returned after
/// all targets were tried
async fn post_to_all(
    client: &Client,
    method: AlertMethod,
    targets: Vec<(String, Value)>,
    headers: &[(String, String)],
    timeout: Duration,
) -> Result<(), DeliveryError> {
    let results = join_all(
        targets
            .iter()
            .map(|(url, payload)| post_json(client, method, url, headers, payload, timeout)),
    )
    .await;

    let mut first_error = None;
    for result in results {
        if let Err(err) = result {
            warn!(error = %err, "Alert delivery target failed");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// POSTs the JSON event to each recipient URL
pub struct WebhookChannel {
    client: Client,
    settings: WebhookSettings,
}

impl WebhookChannel {
    pub fn new(client: Client, settings: WebhookSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn method(&self) -> AlertMethod {
        AlertMethod::Webhook
    }

    async fn deliver(&self, event: &AlertEvent, recipients: &[String]) -> Result<(), DeliveryError> {
        let urls: Vec<String> = if recipients.is_empty() {
            self.settings.default_url.iter().cloned().collect()
        } else {
            recipients.to_vec()
        };
        if urls.is_empty() {
            return Err(DeliveryError::NoRecipients { method: AlertMethod::Webhook });
        }

        let payload = serde_json::to_value(event).map_err(|e| DeliveryError::Transport {
            method: AlertMethod::Webhook,
            target: "payload".into(),
            message: e.to_string(),
        })?;
        let headers: Vec<(String, String)> =
            self.settings.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let targets = urls.into_iter().map(|url| (url, payload.clone())).collect();

        post_to_all(&self.client, AlertMethod::Webhook, targets, &headers, self.settings.timeout())
            .await
    }
}

/// Attachment colour for a level
pub fn chat_color(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Info => "#36a64f",
        AlertLevel::Warning => "#ffcc00",
        AlertLevel::Error => "#ff9900",
        AlertLevel::Critical => "#ff0000",
    }
}

/// Slack-compatible message for `event` posted to `channel`
pub fn chat_payload(event: &AlertEvent, channel: &str, settings: &ChatSettings) -> Value {
    let details = if event.details.is_empty() {
        "-".to_string()
    } else {
        event
            .details
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut attachment = json!({
        "color": chat_color(event.level),
        "title": format!("[{}] {}", event.level, event.alert_type),
        "text": event.message,
        "fields": [
            { "title": "Entity", "value": format!("{} {}", event.entity_type, event.entity_id), "short": true },
            { "title": "Time", "value": event.timestamp.to_rfc3339(), "short": true },
            { "title": "Details", "value": details, "short": false },
        ],
        "ts": event.timestamp.timestamp(),
    });
    if let Some(url) = &settings.dashboard_url {
        attachment["title_link"] = json!(url);
    }

    json!({
        "channel": channel,
        "username": settings.username,
        "icon_emoji": settings.icon_emoji,
        "attachments": [attachment],
    })
}

/// Posts a formatted message to a chat incoming-webhook; recipients name
/// chat channels
pub struct ChatChannel {
    client: Client,
    settings: ChatSettings,
}

impl ChatChannel {
    pub fn new(client: Client, settings: ChatSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl AlertChannel for ChatChannel {
    fn method(&self) -> AlertMethod {
        AlertMethod::Chat
    }

    async fn deliver(&self, event: &AlertEvent, recipients: &[String]) -> Result<(), DeliveryError> {
        let Some(url) = self.settings.webhook_url.as_deref() else {
            return Err(DeliveryError::NoRecipients { method: AlertMethod::Chat });
        };

        let channels: Vec<&str> = if recipients.is_empty() {
            vec![self.settings.channel.as_str()]
        } else {
            recipients.iter().map(String::as_str).collect()
        };
        let targets = channels
            .into_iter()
            .map(|channel| (url.to_string(), chat_payload(event, channel, &self.settings)))
            .collect();

        post_to_all(&self.client, AlertMethod::Chat, targets, &[], self.settings.timeout()).await
    }
}
