//! HTTP adapter for remote dependencies
//!
//! Maps reqwest responses and transport errors onto [`RemoteFailure`] and
//! reads the `X-RateLimit-*` headers into [`RateLimitInfo`]. [`CrmClient`]
//! is a JSON client that sends every request through a
//! [`ResilientClient`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::client::{CallContext, RemoteResponse, ResilientClient};
use super::errors::{IntegrationError, RemoteFailure};
use crate::observability::RateLimitInfo;

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Seconds until the quota window resets
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Longest error body kept in a failure message
const MAX_BODY_EXCERPT: usize = 512;

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Quota metadata; `None` unless both limit and remaining are present
pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let limit = header_u64(headers, RATE_LIMIT_LIMIT)?;
    let remaining = header_u64(headers, RATE_LIMIT_REMAINING)?;
    let reset = header_u64(headers, RATE_LIMIT_RESET).unwrap_or(0);
    Some(RateLimitInfo::new(limit, remaining, Duration::from_secs(reset)))
}

/// Remote-declared wait: `Retry-After` in seconds, else the quota reset
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, RETRY_AFTER.as_str())
        .or_else(|| header_u64(headers, RATE_LIMIT_RESET))
        .map(Duration::from_secs)
}

fn excerpt(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}

/// Classify a non-success response
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> RemoteFailure {
    let body = excerpt(body);
    let message =
        if body.is_empty() { format!("status {status}") } else { format!("status {status}: {body}") };
    let code = Some(status.as_u16());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteFailure::Auth { message },
        StatusCode::TOO_MANY_REQUESTS => RemoteFailure::RateLimit {
            message,
            retry_after: retry_after(headers),
            limits: parse_rate_limit(headers),
        },
        StatusCode::REQUEST_TIMEOUT => RemoteFailure::Server { status: code, message },
        s if s.is_client_error() => RemoteFailure::Validation { status: code, message },
        _ => RemoteFailure::Server { status: code, message },
    }
}

/// Classify a transport error; `timeout` is the request budget
pub fn classify_transport(err: &reqwest::Error, timeout: Duration) -> RemoteFailure {
    if err.is_timeout() {
        RemoteFailure::Timeout(timeout)
    } else if err.is_builder() {
        RemoteFailure::validation(format!("request could not be built: {err}"))
    } else {
        RemoteFailure::server(format!("transport error: {err}"))
    }
}

/// JSON client for the CRM API
#[derive(Debug, Clone)]
pub struct CrmClient {
    base_url: String,
    http: Client,
    client: Arc<ResilientClient>,
    request_timeout: Duration,
}

impl CrmClient {
    /// Create a client rooted at `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::Config`] if the URL is invalid or the HTTP
    /// client cannot be built
    pub fn new(base_url: &str, client: Arc<ResilientClient>) -> Result<Self, IntegrationError> {
        let request_timeout = client.policy().attempt_timeout;
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IntegrationError::Config(format!("failed to build HTTP client: {e}")))?;
        Self::with_http(base_url, http, client)
    }

    /// Create a client around an existing reqwest client
    pub fn with_http(
        base_url: &str,
        http: Client,
        client: Arc<ResilientClient>,
    ) -> Result<Self, IntegrationError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| IntegrationError::Config(format!("invalid base URL '{base_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(IntegrationError::Config(format!(
                "base URL '{base_url}' must use http or https"
            )));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: client.policy().attempt_timeout,
            http,
            client,
        })
    }

    pub fn resilient(&self) -> &Arc<ResilientClient> {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    #[instrument(skip(self), fields(dependency = %self.client.dependency()))]
    pub async fn get_json<R: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
    ) -> Result<R, IntegrationError> {
        self.send(operation, Method::GET, path, None).await
    }

    #[instrument(skip(self, body), fields(dependency = %self.client.dependency()))]
    pub async fn post_json<B, R>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> Result<R, IntegrationError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|e| IntegrationError::Validation {
            dependency: self.client.dependency().to_string(),
            status: None,
            message: format!("failed to serialize body: {e}"),
        })?;
        self.send(operation, Method::POST, path, Some(body)).await
    }

    async fn send<R: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<R, IntegrationError> {
        let url = self.url(path);
        let body = body.as_ref();
        self.client
            .call(operation, |ctx| self.attempt(method.clone(), &url, body, ctx))
            .await
    }

    async fn attempt<R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        ctx: CallContext,
    ) -> Result<RemoteResponse<R>, RemoteFailure> {
        debug!(%method, url, attempt = ctx.attempt, "Sending request");

        let mut request = self.http.request(method, url).header(ACCEPT, "application/json");
        if let Some(bearer) = ctx.bearer() {
            request = request.header(AUTHORIZATION, bearer);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response =
            request.send().await.map_err(|e| classify_transport(&e, self.request_timeout))?;
        let status = response.status();
        let limits = parse_rate_limit(response.headers());

        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, &text));
        }

        // 204/205 carry no body by definition
        let value = if status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT {
            serde_json::from_value(Value::Null).map_err(|_| RemoteFailure::Validation {
                status: Some(status.as_u16()),
                message: "empty response cannot be decoded into the expected type".into(),
            })?
        } else {
            response.json::<R>().await.map_err(|e| {
                if e.is_timeout() {
                    RemoteFailure::Timeout(self.request_timeout)
                } else {
                    RemoteFailure::Validation {
                        status: Some(status.as_u16()),
                        message: format!("failed to decode response: {e}"),
                    }
                }
            })?
        };

        let response = RemoteResponse::new(value);
        Ok(match limits {
            Some(info) => response.with_rate_limit(info),
            None => response,
        })
    }
}
