//! Integration tests for the CRM client over real HTTP
//!
//! **Coverage:**
//! - Happy path: token fetch → bearer request → quota headers tracked
//! - Auth failure: 401 → credential refreshed once → success
//! - Remote quota: 429 retried without opening the breaker
//! - Server failure: 503 retried until the budget runs out
//! - Open breaker: later calls rejected without reaching the server
//!
//! **Infrastructure:**
//! - WireMock HTTP server for both the token endpoint and the CRM API
//! - Real `TokenManager`, `ResilientClient` and metrics registry

#![allow(dead_code)]

#[path = "support.rs"]
mod support;

use serde::Deserialize;
use serde_json::json;
use support::{fast_policy, CrmHarness};
use tourlink_common::resilience::CircuitState;
use tourlink_domain::RateLimitHealth;
use tourlink_infra::integrations::remote::{ErrorCategory, IntegrationError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
struct Contact {
    id: String,
    name: String,
}

// ============================================================================
// Happy path
// ============================================================================

/// Validates that a successful call carries the bearer token and records
/// both metrics and quota.
///
/// Assertions:
/// - The request is authorized with the first issued token
/// - One successful call is counted, none retried
/// - Quota headers end up in the rate-limit tracker
#[tokio::test]
async fn test_get_with_bearer_and_quota_headers() {
    let harness = CrmHarness::new(3, fast_policy(2), None).await;
    Mock::given(method("GET"))
        .and(path("/contacts/c-1"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-RateLimit-Limit", "100")
                .insert_header("X-RateLimit-Remaining", "80")
                .insert_header("X-RateLimit-Reset", "60")
                .set_body_json(json!({"id": "c-1", "name": "Avery"})),
        )
        .expect(1)
        .mount(&harness.server)
        .await;

    let contact: Contact = harness.crm.get_json("get_contact", "/contacts/c-1").await.unwrap();
    assert_eq!(contact, Contact { id: "c-1".into(), name: "Avery".into() });

    let stats = harness.metrics.get_stats("get_contact").unwrap();
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.retry_count, 0);

    let quota = harness.metrics.rate_limits().get("get_contact").unwrap();
    assert_eq!(quota.remaining, 80);
    assert_eq!(harness.metrics.rate_limits().classify(), RateLimitHealth::Healthy);
}

// ============================================================================
// Credential refresh
// ============================================================================

/// Validates that a 401 invalidates the cached token and the retry uses a
/// freshly issued one.
///
/// # Test Steps
/// 1. CRM rejects `token-1` with 401
/// 2. Client invalidates it and fetches `token-2`
/// 3. CRM accepts `token-2`
#[tokio::test]
async fn test_unauthorized_refreshes_token_once() {
    let harness = CrmHarness::new(3, fast_policy(0), None).await;
    Mock::given(method("GET"))
        .and(path("/contacts"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/contacts"))
        .and(header("authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&harness.server)
        .await;

    // max_retries = 0: the credential refresh does not spend the retry budget
    let contacts: Vec<Contact> = harness.crm.get_json("list_contacts", "/contacts").await.unwrap();
    assert!(contacts.is_empty());
    assert_eq!(harness.token_requests().await, 2);
}

/// Validates that a credential rejected twice surfaces as an auth error.
#[tokio::test]
async fn test_persistent_unauthorized_surfaces_auth_error() {
    let harness = CrmHarness::new(5, fast_policy(3), None).await;
    Mock::given(method("GET"))
        .and(path("/contacts"))
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&harness.server)
        .await;

    let err = harness.crm.get_json::<Vec<Contact>>("list_contacts", "/contacts").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Auth);
    assert_eq!(harness.token_requests().await, 2);
}

// ============================================================================
// Remote quota
// ============================================================================

/// Validates that 429 responses are retried but never count toward opening
/// the breaker.
///
/// Assertions:
/// - Every attempt reaches the server (1 + max_retries)
/// - The surfaced error is a degraded rate-limit error
/// - The breaker stays closed despite more failures than its threshold
#[tokio::test]
async fn test_rate_limited_calls_do_not_open_breaker() {
    let harness = CrmHarness::new(2, fast_policy(3), None).await;
    Mock::given(method("POST"))
        .and(path("/tours"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .insert_header("X-RateLimit-Limit", "100")
                .insert_header("X-RateLimit-Remaining", "0")
                .insert_header("X-RateLimit-Reset", "30"),
        )
        .expect(4)
        .mount(&harness.server)
        .await;

    let err = harness
        .crm
        .post_json::<_, serde_json::Value>("push_tour", "/tours", &json!({"id": "t-1"}))
        .await
        .unwrap_err();

    assert!(matches!(err, IntegrationError::RateLimit { attempts: 4, .. }), "got {err:?}");
    assert!(err.is_degraded());
    assert_eq!(harness.crm.resilient().breaker().state(), CircuitState::Closed);

    let stats = harness.metrics.get_stats("push_tour").unwrap();
    assert_eq!(stats.rate_limited_count, 4);
    assert_eq!(stats.retry_count, 3);
    assert_eq!(harness.metrics.rate_limits().classify(), RateLimitHealth::Critical);
}

// ============================================================================
// Server failures and the breaker
// ============================================================================

/// Validates that transient failures are retried until the budget is spent.
#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let harness = CrmHarness::new(10, fast_policy(2), None).await;
    Mock::given(method("GET"))
        .and(path("/routes/r-9"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(3)
        .mount(&harness.server)
        .await;

    let err = harness
        .crm
        .get_json::<serde_json::Value>("get_route", "/routes/r-9")
        .await
        .unwrap_err();

    match err {
        IntegrationError::Server { attempts, status, message, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(status, Some(503));
            assert!(message.contains("maintenance"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert_eq!(harness.crm.resilient().breaker().state(), CircuitState::Closed);
}

/// Validates that an open breaker short-circuits later calls.
///
/// # Test Steps
/// 1. Two 500s open a breaker with threshold 2
/// 2. A second call is rejected without a request reaching the server
/// 3. The rejection is counted separately from remote failures
#[tokio::test]
async fn test_open_breaker_rejects_without_request() {
    let harness = CrmHarness::new(2, fast_policy(1), None).await;
    Mock::given(method("GET"))
        .and(path("/contacts"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&harness.server)
        .await;

    let first = harness.crm.get_json::<Vec<Contact>>("list_contacts", "/contacts").await;
    assert!(matches!(first, Err(IntegrationError::Server { attempts: 2, .. })));
    assert_eq!(harness.crm.resilient().breaker().state(), CircuitState::Open);

    let second = harness.crm.get_json::<Vec<Contact>>("list_contacts", "/contacts").await;
    let err = second.unwrap_err();
    assert!(matches!(err, IntegrationError::CircuitOpen { .. }), "got {err:?}");
    assert!(err.retry_after().is_some());

    let stats = harness.metrics.get_stats("list_contacts").unwrap();
    assert_eq!(stats.total_count, 3);
    assert_eq!(stats.rejected_count, 1);

    let circuits = harness.metrics.get_circuit_states();
    assert_eq!(circuits.len(), 1);
    assert_eq!(circuits[0].state, CircuitState::Open);
}

/// Validates that a client error is surfaced immediately.
#[tokio::test]
async fn test_unprocessable_request_is_not_retried() {
    let harness = CrmHarness::new(3, fast_policy(4), None).await;
    Mock::given(method("POST"))
        .and(path("/tours"))
        .respond_with(ResponseTemplate::new(422).set_body_string("missing listing_id"))
        .expect(1)
        .mount(&harness.server)
        .await;

    let err = harness
        .crm
        .post_json::<_, serde_json::Value>("push_tour", "/tours", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, IntegrationError::Validation { status: Some(422), .. }));
    assert!(!err.is_degraded());
}
