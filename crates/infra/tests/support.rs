use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tourlink_common::auth::{TokenManager, TokenManagerConfig};
use tourlink_common::resilience::{ExponentialBackoff, SystemClock};
use tourlink_domain::{AlertConfig, BreakerSettings, MetricsSettings, RateLimitSettings};
use tourlink_infra::alerts::AlertManager;
use tourlink_infra::integrations::remote::{
    ClientCredentialsSource, CrmClient, ResilientClient, RetryPolicy,
};
use tourlink_infra::observability::{MetricsRegistry, RateLimitTracker};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TOKEN_PATH: &str = "/oauth/token";

/// Token endpoint that hands out `token-1`, `token-2`, ... on each request.
#[derive(Default)]
pub struct NumberedTokens {
    issued: AtomicU32,
}

impl Respond for NumberedTokens {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(200)
            .set_body_json(json!({"access_token": format!("token-{n}"), "expires_in": 3600}))
    }
}

/// Mount the numbered token endpoint on `server`.
pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(NumberedTokens::default())
        .mount(server)
        .await;
}

/// Retry policy with millisecond backoff so tests finish quickly.
pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(max_retries)
        .with_backoff(
            ExponentialBackoff::new(Duration::from_millis(5), Duration::from_millis(20))
                .expect("backoff bounds are valid"),
        )
        .with_attempt_timeout(Duration::from_secs(5))
}

/// Shared metrics registry on the system clock.
pub fn metrics() -> Arc<MetricsRegistry> {
    let clock = SystemClock::shared();
    let rate_limits = Arc::new(RateLimitTracker::new(RateLimitSettings::default(), clock.clone()));
    Arc::new(MetricsRegistry::new(MetricsSettings::default(), rate_limits, clock))
}

/// Alert manager with the default table and log delivery only.
pub fn alerts() -> Arc<AlertManager> {
    Arc::new(AlertManager::new(AlertConfig::defaults(), SystemClock::shared()))
}

/// Everything a test needs to talk to one mocked CRM.
pub struct CrmHarness {
    pub server: MockServer,
    pub crm: CrmClient,
    pub metrics: Arc<MetricsRegistry>,
}

impl CrmHarness {
    /// CRM client whose credentials come from the server's token endpoint.
    pub async fn new(threshold: u32, policy: RetryPolicy, alerts: Option<Arc<AlertManager>>) -> Self {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;

        let source = ClientCredentialsSource::new(
            Client::new(),
            format!("{}{}", server.uri(), TOKEN_PATH),
            "tourlink",
            "s3cret",
        );
        let tokens = TokenManager::with_config(
            source,
            TokenManagerConfig { jitter_ratio: 0.0 },
            SystemClock::shared(),
        )
        .expect("token config is valid");

        let metrics = metrics();
        let mut builder = ResilientClient::builder("crm-api")
            .breaker_settings(BreakerSettings::new(threshold, 60))
            .policy(policy)
            .credentials(Arc::new(tokens))
            .metrics(Arc::clone(&metrics));
        if let Some(alerts) = alerts {
            builder = builder.alerts(alerts);
        }
        let client = builder.build().expect("client settings are valid");

        let crm = CrmClient::new(&server.uri(), Arc::new(client)).expect("mock URI is valid");
        Self { server, crm, metrics }
    }

    /// Token requests the server has seen so far.
    pub async fn token_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == TOKEN_PATH)
            .count()
    }
}
