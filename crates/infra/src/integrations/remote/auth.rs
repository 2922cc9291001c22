//! OAuth2 client-credentials token source
//!
//! Feeds [`TokenManager`](tourlink_common::auth::TokenManager); caching,
//! jittered expiry and single-flight refresh live there.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tourlink_common::auth::{IssuedToken, TokenError, TokenSource};
use tourlink_domain::TokenSettings;
use tracing::{debug, warn};

/// Token endpoint response body
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Fetches bearer tokens with `grant_type=client_credentials`
#[derive(Clone)]
pub struct ClientCredentialsSource {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    default_lifetime: Duration,
}

impl fmt::Debug for ClientCredentialsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsSource")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("default_lifetime", &self.default_lifetime)
            .finish()
    }
}

impl ClientCredentialsSource {
    pub fn new(
        http: Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
            default_lifetime: Duration::from_secs(3300),
        }
    }

    /// Build from settings; the URL, id and secret are required
    pub fn from_settings(http: Client, settings: &TokenSettings) -> Result<Self, TokenError> {
        let required = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| TokenError::InvalidConfiguration(format!("token.{name} is not set")))
        };

        let mut source = Self::new(
            http,
            required(&settings.token_url, "token_url")?,
            required(&settings.client_id, "client_id")?,
            required(&settings.client_secret, "client_secret")?,
        )
        .with_default_lifetime(Duration::from_secs(settings.default_lifetime_secs));
        source.scope = settings.scope.clone();
        Ok(source)
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Lifetime assumed when the endpoint omits `expires_in`
    #[must_use]
    pub fn with_default_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lifetime = lifetime;
        self
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    async fn fetch_token(&self) -> Result<IssuedToken, TokenError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::Fetch(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token endpoint rejected client credentials");
            return Err(TokenError::Fetch(format!("token endpoint returned {status}: {}", body.trim())));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Fetch(format!("invalid token response: {e}")))?;
        let lifetime = body.expires_in.map_or(self.default_lifetime, Duration::from_secs);

        debug!(lifetime_secs = lifetime.as_secs(), "Fetched client-credentials token");
        Ok(IssuedToken::new(body.access_token, lifetime))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn source(server: &MockServer) -> ClientCredentialsSource {
        ClientCredentialsSource::new(
            Client::new(),
            format!("{}/oauth/token", server.uri()),
            "tourlink",
            "s3cret",
        )
    }

    #[tokio::test]
    async fn test_fetch_token_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=tourlink"))
            .and(body_string_contains("scope=crm.write"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "abc", "expires_in": 600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = source(&server).with_scope("crm.write").fetch_token().await.unwrap();
        assert_eq!(token.value, "abc");
        assert_eq!(token.lifetime, Duration::from_secs(600));
        assert!(!format!("{token:?}").contains("abc"));
    }

    #[tokio::test]
    async fn test_missing_expiry_uses_default_lifetime() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "abc"})),
            )
            .mount(&server)
            .await;

        let token = source(&server)
            .with_default_lifetime(Duration::from_secs(120))
            .fetch_token()
            .await
            .unwrap();
        assert_eq!(token.lifetime, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_fetch_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        match source(&server).fetch_token().await {
            Err(TokenError::Fetch(message)) => assert!(message.contains("invalid_client")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_from_settings_requires_credentials() {
        let settings = TokenSettings {
            token_url: Some("https://auth.example.com/token".into()),
            client_id: Some("tourlink".into()),
            ..TokenSettings::default()
        };
        let err = ClientCredentialsSource::from_settings(Client::new(), &settings).unwrap_err();
        assert_eq!(err, TokenError::InvalidConfiguration("token.client_secret is not set".into()));

        let complete = TokenSettings { client_secret: Some("s3cret".into()), ..settings };
        let source = ClientCredentialsSource::from_settings(Client::new(), &complete).unwrap();
        assert!(!format!("{source:?}").contains("s3cret"));
    }
}
