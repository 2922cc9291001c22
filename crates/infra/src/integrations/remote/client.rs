//! Resilient client: the single choke point for calls to one dependency
//!
//! Every call goes through the same sequence:
//! 1. Acquire a bearer credential (fails fast, never retried here)
//! 2. Ask the breaker for a permit (fails fast while OPEN)
//! 3. Invoke the remote under a per-attempt timeout
//! 4. Settle the permit, record metrics and quota, then retry or surface
//!
//! Metrics, breaker and quota updates for an attempt are applied before the
//! next attempt starts, so a retry always sees the breaker as other callers
//! left it.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use tourlink_common::auth::{Token, TokenError, TokenManager, TokenSource};
use tourlink_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitTransition, ExponentialBackoff,
    SharedClock, SystemClock, TransitionObserver,
};
use tourlink_domain::{
    AlertType, BreakerSettings, MetricsSettings, RateLimitHealth, RateLimitSettings, RetrySettings,
    TourlinkConfig,
};
use tracing::{debug, error, instrument, warn};

use super::errors::{FailureClass, IntegrationError, RemoteFailure};
use crate::alerts::{AlertManager, FailureSignal};
use crate::observability::{CallOutcome, MetricsRegistry, RateLimitInfo, RateLimitTracker};

/// Entity type used when a final call failure is reported to alerting
const INTEGRATION_ENTITY: &str = "integration";

// ============================================================================
// Call plumbing types
// ============================================================================

/// Successful remote payload plus the quota it reported
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse<T> {
    pub value: T,
    pub rate_limit: Option<RateLimitInfo>,
}

impl<T> RemoteResponse<T> {
    pub fn new(value: T) -> Self {
        Self { value, rate_limit: None }
    }

    #[must_use]
    pub fn with_rate_limit(mut self, info: RateLimitInfo) -> Self {
        self.rate_limit = Some(info);
        self
    }
}

/// Per-attempt context handed to the invoke closure
#[derive(Debug, Clone)]
pub struct CallContext {
    /// 1-based attempt number
    pub attempt: u32,
    pub token: Option<Arc<Token>>,
}

impl CallContext {
    /// `Authorization` header value, when a credential is attached
    pub fn bearer(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("Bearer {}", token.value()))
    }
}

/// Supplies bearer credentials to the client
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A currently valid credential
    async fn bearer(&self) -> Result<Arc<Token>, TokenError>;

    /// Drop `token` from any cache after the remote rejected it
    async fn invalidate(&self, token: &Token) -> bool;
}

#[async_trait]
impl<S: TokenSource> CredentialProvider for TokenManager<S> {
    async fn bearer(&self) -> Result<Arc<Token>, TokenError> {
        self.get_token().await
    }

    async fn invalidate(&self, token: &Token) -> bool {
        TokenManager::invalidate(self, token.unique_id()).await
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Retry behaviour for one call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff: ExponentialBackoff,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
    /// Cap on a remote-declared rate-limit wait
    pub rate_limit_max_wait: Duration,
    /// Classes surfaced immediately, in addition to validation failures
    pub non_retryable: HashSet<FailureClass>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let settings = RetrySettings::default();
        Self {
            max_retries: settings.max_retries,
            backoff: ExponentialBackoff::default(),
            attempt_timeout: settings.attempt_timeout(),
            rate_limit_max_wait: settings.rate_limit_max_wait(),
            non_retryable: HashSet::new(),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Result<Self, IntegrationError> {
        let backoff = ExponentialBackoff::new(settings.base_backoff(), settings.max_backoff())
            .map_err(|e| IntegrationError::Config(e.to_string()))?;
        Ok(Self {
            max_retries: settings.max_retries,
            backoff,
            attempt_timeout: settings.attempt_timeout(),
            rate_limit_max_wait: settings.rate_limit_max_wait(),
            non_retryable: HashSet::new(),
        })
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub fn non_retryable(mut self, class: FailureClass) -> Self {
        self.non_retryable.insert(class);
        self
    }

    fn is_retryable(&self, class: FailureClass) -> bool {
        !self.non_retryable.contains(&class)
            && matches!(class, FailureClass::RateLimit | FailureClass::Server | FailureClass::Timeout)
    }

    /// Wait before retry number `retry` (0-based) after `failure`
    fn wait_for(&self, failure: &RemoteFailure, retry: u32) -> Duration {
        match failure.retry_after() {
            Some(declared) => declared.min(self.rate_limit_max_wait),
            None => self.backoff.delay(retry),
        }
    }
}

/// Records exactly one outcome for an attempt.
///
/// An attempt that never reaches [`AttemptRecord::finish`] (the invoke
/// future panicked, or the caller dropped the call mid-attempt) is recorded
/// as a failure when the record is dropped.
struct AttemptRecord<'a> {
    metrics: &'a MetricsRegistry,
    operation: &'a str,
    started: Instant,
    is_retry: bool,
    finished: bool,
}

impl<'a> AttemptRecord<'a> {
    fn start(metrics: &'a MetricsRegistry, operation: &'a str, is_retry: bool) -> Self {
        Self { metrics, operation, started: Instant::now(), is_retry, finished: false }
    }

    /// Record `outcome` and return the attempt latency
    fn finish(mut self, outcome: CallOutcome) -> Duration {
        self.finished = true;
        let latency = self.started.elapsed();
        self.metrics.record_call(self.operation, outcome, latency, self.is_retry);
        latency
    }
}

impl Drop for AttemptRecord<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.record_call(
                self.operation,
                CallOutcome::Failure,
                self.started.elapsed(),
                self.is_retry,
            );
        }
    }
}

/// What the loop does after a failed attempt
enum NextStep {
    Retry(Duration),
    RefreshCredential,
    Surface,
}

// ============================================================================
// Client
// ============================================================================

/// Guards every outbound call to one dependency with a breaker, retries,
/// credentials, metrics and alert feeds
pub struct ResilientClient {
    dependency: String,
    breaker: Arc<CircuitBreaker<FailureClass>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    metrics: Arc<MetricsRegistry>,
    alerts: Option<Arc<AlertManager>>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("dependency", &self.dependency)
            .field("breaker", &self.breaker)
            .field("credentials", &self.credentials.is_some())
            .field("alerts", &self.alerts.is_some())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    pub fn builder(dependency: impl Into<String>) -> ResilientClientBuilder {
        ResilientClientBuilder::new(dependency)
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker<FailureClass>> {
        &self.breaker
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `invoke` under the client's default retry policy
    pub async fn call<T, F, Fut>(&self, operation: &str, invoke: F) -> Result<T, IntegrationError>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<RemoteResponse<T>, RemoteFailure>>,
    {
        self.call_with_policy(operation, &self.policy, invoke).await
    }

    /// Run `invoke` with a per-call retry policy.
    ///
    /// `invoke` is called once per attempt; it must be safe to repeat.
    #[instrument(skip_all, fields(dependency = %self.dependency, operation = %operation))]
    pub async fn call_with_policy<T, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        mut invoke: F,
    ) -> Result<T, IntegrationError>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<RemoteResponse<T>, RemoteFailure>>,
    {
        let mut token = self.acquire_token(operation, 0).await?;
        let mut retries_used = 0u32;
        let mut credential_refreshed = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let is_retry = attempt > 1;

            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(rejection) => {
                    self.metrics.record_call(operation, CallOutcome::Rejected, Duration::ZERO, is_retry);
                    let error = IntegrationError::CircuitOpen {
                        breaker: rejection.breaker,
                        retry_in: rejection.retry_in,
                    };
                    return Err(self.surface(operation, attempt, error).await);
                }
            };

            let record = AttemptRecord::start(&self.metrics, operation, is_retry);
            let context = CallContext { attempt, token: token.clone() };
            let result = match tokio::time::timeout(policy.attempt_timeout, invoke(context)).await {
                Ok(result) => result,
                Err(_) => Err(RemoteFailure::Timeout(policy.attempt_timeout)),
            };

            let failure = match result {
                Ok(response) => {
                    permit.record_success();
                    let latency = record.finish(CallOutcome::Success);
                    if let Some(info) = response.rate_limit {
                        self.observe_rate_limit(operation, info).await;
                    }
                    debug!(
                        attempt,
                        latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        "Remote call succeeded"
                    );
                    return Ok(response.value);
                }
                Err(failure) => failure,
            };

            let class = failure.class();
            let transition = if class == FailureClass::CircuitOpen {
                // The nested dependency is unavailable; this one is not at fault
                drop(permit);
                None
            } else {
                permit.record_failure(class)
            };

            let outcome = match class {
                FailureClass::RateLimit => CallOutcome::RateLimited,
                FailureClass::CircuitOpen => CallOutcome::Rejected,
                _ => CallOutcome::Failure,
            };
            record.finish(outcome);
            if let Some(info) = failure.rate_limit_info() {
                self.observe_rate_limit(operation, info).await;
            }
            if let Some(transition) = transition.filter(|t| t.to == CircuitState::Open) {
                self.alert_circuit_open(&transition).await;
            }

            match self.next_step(&failure, policy, retries_used, credential_refreshed) {
                NextStep::Retry(wait) => {
                    retries_used += 1;
                    warn!(
                        attempt,
                        class = %class,
                        retry = retries_used,
                        max_retries = policy.max_retries,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        error = %failure,
                        "Remote call failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                NextStep::RefreshCredential => {
                    credential_refreshed = true;
                    if let (Some(credentials), Some(rejected)) = (&self.credentials, &token) {
                        credentials.invalidate(rejected).await;
                    }
                    warn!(attempt, "Remote rejected credential, retrying with a fresh one");
                    token = self.acquire_token(operation, attempt).await?;
                }
                NextStep::Surface => {
                    let error = IntegrationError::from_failure(&self.dependency, attempt, failure);
                    return Err(self.surface(operation, attempt, error).await);
                }
            }
        }
    }

    fn next_step(
        &self,
        failure: &RemoteFailure,
        policy: &RetryPolicy,
        retries_used: u32,
        credential_refreshed: bool,
    ) -> NextStep {
        let class = failure.class();
        if class == FailureClass::Auth
            && !policy.non_retryable.contains(&FailureClass::Auth)
            && !credential_refreshed
            && self.credentials.is_some()
        {
            return NextStep::RefreshCredential;
        }
        if policy.is_retryable(class) && retries_used < policy.max_retries {
            return NextStep::Retry(policy.wait_for(failure, retries_used));
        }
        NextStep::Surface
    }

    /// Fetch the bearer credential; `attempts` counts remote attempts made
    /// so far in this call.
    async fn acquire_token(
        &self,
        operation: &str,
        attempts: u32,
    ) -> Result<Option<Arc<Token>>, IntegrationError> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };

        match credentials.bearer().await {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                self.metrics.record_call(operation, CallOutcome::Failure, Duration::ZERO, attempts > 0);
                let error = IntegrationError::Auth {
                    dependency: self.dependency.clone(),
                    message: err.to_string(),
                };
                Err(self.surface(operation, attempts, error).await)
            }
        }
    }

    // ========================================================================
    // Alert feeds
    // ========================================================================

    /// Log the final error and report it to alerting
    async fn surface(&self, operation: &str, attempts: u32, error: IntegrationError) -> IntegrationError {
        if error.is_degraded() {
            warn!(attempts, error = %error, "Remote call degraded");
        } else {
            error!(attempts, error = %error, "Remote call failed");
        }

        if let Some(alerts) = &self.alerts {
            let details = BTreeMap::from([
                ("attempts".to_string(), json!(attempts)),
                ("category".to_string(), json!(error.category())),
            ]);
            alerts
                .record_operation_failure(
                    &self.dependency,
                    INTEGRATION_ENTITY,
                    operation,
                    &error,
                    None,
                    details,
                )
                .await;
        }
        error
    }

    async fn observe_rate_limit(&self, operation: &str, info: RateLimitInfo) {
        let tracker = self.metrics.rate_limits();
        tracker.record(operation, info);
        if tracker.operation_health(operation) != RateLimitHealth::Critical {
            return;
        }
        if let Some(alerts) = &self.alerts {
            let signal = FailureSignal::new(
                AlertType::RateLimitCritical,
                operation,
                "rate_limit",
                operation,
                format!("{} of {} requests remaining", info.remaining, info.limit),
            )
            .with_detail("dependency", json!(self.dependency))
            .with_detail("reset_after_secs", json!(info.reset_after.as_secs()));
            alerts.record_failure(signal).await;
        }
    }

    async fn alert_circuit_open(&self, transition: &CircuitTransition) {
        if let Some(alerts) = &self.alerts {
            let signal = FailureSignal::new(
                AlertType::CircuitBreakerOpen,
                transition.breaker.as_str(),
                "circuit_breaker",
                "circuit_transition",
                format!(
                    "breaker opened from {} after {} consecutive failures ({})",
                    transition.from, transition.failure_count, transition.reason
                ),
            )
            .with_detail("from", json!(transition.from.to_string()))
            .with_detail("consecutive_failures", json!(transition.failure_count));
            alerts.record_failure(signal).await;
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ResilientClient`]
pub struct ResilientClientBuilder {
    dependency: String,
    breaker: BreakerSettings,
    excluded: Vec<FailureClass>,
    policy: RetryPolicy,
    credentials: Option<Arc<dyn CredentialProvider>>,
    metrics: Option<Arc<MetricsRegistry>>,
    alerts: Option<Arc<AlertManager>>,
    clock: Option<SharedClock>,
}

impl ResilientClientBuilder {
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            breaker: BreakerSettings::default(),
            excluded: vec![FailureClass::RateLimit],
            policy: RetryPolicy::default(),
            credentials: None,
            metrics: None,
            alerts: None,
            clock: None,
        }
    }

    /// Take breaker and retry settings for this dependency from `config`
    pub fn config(mut self, config: &TourlinkConfig) -> Result<Self, IntegrationError> {
        self.breaker = config.breaker(&self.dependency);
        self.policy = RetryPolicy::from_settings(&config.retry)?;
        Ok(self)
    }

    pub fn breaker_settings(mut self, settings: BreakerSettings) -> Self {
        self.breaker = settings;
        self
    }

    /// Failure classes that never count against the breaker
    pub fn exclude(mut self, class: FailureClass) -> Self {
        if !self.excluded.contains(&class) {
            self.excluded.push(class);
        }
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn alerts(mut self, alerts: Arc<AlertManager>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::Config`] if the breaker settings are
    /// invalid
    pub fn build(self) -> Result<ResilientClient, IntegrationError> {
        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        let metrics = self.metrics.unwrap_or_else(|| {
            let rate_limits =
                Arc::new(RateLimitTracker::new(RateLimitSettings::default(), Arc::clone(&clock)));
            Arc::new(MetricsRegistry::new(MetricsSettings::default(), rate_limits, Arc::clone(&clock)))
        });

        let mut config = CircuitBreakerConfig::builder()
            .failure_threshold(self.breaker.failure_threshold)
            .recovery_timeout(self.breaker.recovery_timeout());
        for class in self.excluded {
            config = config.exclude(class);
        }
        let config = config.build().map_err(|e| IntegrationError::Config(e.to_string()))?;

        let observer: Arc<dyn TransitionObserver> = metrics.clone();
        let breaker = Arc::new(
            CircuitBreaker::with_clock(self.dependency.clone(), config, clock)
                .map_err(|e| IntegrationError::Config(e.to_string()))?
                .with_observer(observer),
        );
        metrics.register_circuit(&breaker);

        Ok(ResilientClient {
            dependency: self.dependency,
            breaker,
            credentials: self.credentials,
            metrics,
            alerts: self.alerts,
            policy: self.policy,
        })
    }
}
