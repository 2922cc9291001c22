//! Resilient access to remote dependencies (CRM API, CRM MCP, route
//! optimizer)
//!
//! - [`errors`]: closed failure taxonomy for attempts and surfaced errors
//! - [`client`]: retry loop combining breaker, credentials, metrics, alerts
//! - [`http`]: reqwest adapter and the JSON CRM client
//! - [`auth`]: client-credentials token source

pub mod auth;
pub mod client;
pub mod errors;
pub mod http;

pub use auth::ClientCredentialsSource;
pub use client::{
    CallContext, CredentialProvider, RemoteResponse, ResilientClient, ResilientClientBuilder,
    RetryPolicy,
};
pub use errors::{ErrorCategory, FailureClass, IntegrationError, RemoteFailure};
pub use http::{classify_status, classify_transport, parse_rate_limit, retry_after, CrmClient};
