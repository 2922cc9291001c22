//! Token cache with jittered early expiry
//!
//! Manages the bearer credential lifecycle:
//! - Serves the cached token while it is valid
//! - Fetches a new one when missing or past its jittered expiry
//! - Lets concurrent callers wait on one in-flight refresh instead of issuing
//!   parallel fetches
//!
//! A failed fetch is returned to the caller as-is; the caller's retry loop
//! decides what happens next.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::traits::TokenSource;
use super::types::Token;
use crate::resilience::{SharedClock, SystemClock};

/// Error type for token manager operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The issuer could not produce a credential
    #[error("Token fetch failed: {0}")]
    Fetch(String),

    /// The issuer returned a credential that is already unusable
    #[error("Token source returned an unusable lifetime of {0:?}")]
    InvalidLifetime(Duration),

    /// Token manager settings are out of range
    #[error("Invalid token manager configuration: {0}")]
    InvalidConfiguration(String),
}

/// Settings for [`TokenManager`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenManagerConfig {
    /// Upper bound of the fraction of the nominal lifetime removed from
    /// `expires_at`; the actual fraction is drawn uniformly from
    /// `[0, jitter_ratio]` per token.
    pub jitter_ratio: f64,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self { jitter_ratio: 0.1 }
    }
}

impl TokenManagerConfig {
    pub fn validate(&self) -> Result<(), TokenError> {
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(TokenError::InvalidConfiguration(format!(
                "jitter_ratio must be in [0, 1), got {}",
                self.jitter_ratio
            )));
        }
        Ok(())
    }
}

/// Caching front for a [`TokenSource`]
pub struct TokenManager<S: TokenSource> {
    source: S,
    config: TokenManagerConfig,
    cached: Mutex<Option<Arc<Token>>>,
    clock: SharedClock,
    refresh_count: AtomicU64,
}

impl<S: TokenSource> TokenManager<S> {
    /// Create a token manager with default jitter and the system clock
    pub fn new(source: S) -> Self {
        Self {
            source,
            config: TokenManagerConfig::default(),
            cached: Mutex::new(None),
            clock: SystemClock::shared(),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// Create a token manager with explicit settings and clock
    ///
    /// # Errors
    /// Returns [`TokenError::InvalidConfiguration`] if the jitter ratio is out
    /// of range
    pub fn with_config(
        source: S,
        config: TokenManagerConfig,
        clock: SharedClock,
    ) -> Result<Self, TokenError> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            cached: Mutex::new(None),
            clock,
            refresh_count: AtomicU64::new(0),
        })
    }

    /// Return a valid token, fetching a new one if needed
    ///
    /// The cache lock is held across the fetch, so callers arriving during a
    /// refresh wait for it and then receive the refreshed token.
    ///
    /// # Errors
    /// Propagates the source's [`TokenError`] unchanged; nothing is retried
    /// here
    pub async fn get_token(&self) -> Result<Arc<Token>, TokenError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.is_expired_at(self.clock.now()) {
                return Ok(Arc::clone(token));
            }
            debug!(token_id = %token.unique_id(), "Cached token expired, refreshing");
        }

        let issued = self.source.fetch_token().await.map_err(|err| {
            warn!(error = %err, "Token fetch failed");
            err
        })?;

        if issued.lifetime.is_zero() {
            return Err(TokenError::InvalidLifetime(issued.lifetime));
        }

        let issued_at = self.clock.now();
        let lifetime = self.jittered_lifetime(issued.lifetime);
        let token = Arc::new(Token::new(
            issued.value,
            issued_at,
            issued_at + lifetime,
            self.clock.utc_now(),
        ));

        info!(
            token_id = %token.unique_id(),
            fingerprint = %token.fingerprint(),
            lifetime_secs = lifetime.as_secs(),
            "Bearer token refreshed"
        );

        *cached = Some(Arc::clone(&token));
        self.refresh_count.fetch_add(1, Ordering::Relaxed);
        Ok(token)
    }

    /// Drop the cached token if it is still the one identified by
    /// `unique_id`
    ///
    /// Used after the remote rejects a credential. Comparing ids keeps a token
    /// that another caller refreshed in the meantime.
    ///
    /// # Returns
    /// `true` if the cached token was discarded
    pub async fn invalidate(&self, unique_id: Uuid) -> bool {
        let mut cached = self.cached.lock().await;
        match cached.as_ref() {
            Some(token) if token.unique_id() == unique_id => {
                debug!(token_id = %unique_id, "Invalidating cached token");
                *cached = None;
                true
            }
            _ => false,
        }
    }

    /// The cached token, valid or not, without triggering a refresh
    pub async fn current(&self) -> Option<Arc<Token>> {
        self.cached.lock().await.clone()
    }

    /// Number of successful fetches since construction
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }

    fn jittered_lifetime(&self, lifetime: Duration) -> Duration {
        let ratio = rand::thread_rng().gen_range(0.0..=self.config.jitter_ratio);
        lifetime.mul_f64(1.0 - ratio)
    }
}
