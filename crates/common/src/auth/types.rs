//! Bearer credential types

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Credential as returned by a [`super::TokenSource`], before caching
#[derive(Clone)]
pub struct IssuedToken {
    /// Opaque credential string
    pub value: String,
    /// Nominal lifetime declared by the issuer
    pub lifetime: Duration,
}

impl IssuedToken {
    pub fn new(value: impl Into<String>, lifetime: Duration) -> Self {
        Self { value: value.into(), lifetime }
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("value", &"<redacted>")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// Cached bearer credential.
///
/// Immutable once built; a refresh replaces the whole token. `expires_at`
/// already has the refresh jitter subtracted, so it is earlier than the
/// issuer's deadline.
#[derive(Clone)]
pub struct Token {
    value: String,
    issued_at: Instant,
    expires_at: Instant,
    issued_at_utc: DateTime<Utc>,
    unique_id: Uuid,
}

impl Token {
    pub(crate) fn new(
        value: String,
        issued_at: Instant,
        expires_at: Instant,
        issued_at_utc: DateTime<Utc>,
    ) -> Self {
        Self { value, issued_at, expires_at, issued_at_utc, unique_id: Uuid::new_v4() }
    }

    /// The credential to place in the `Authorization` header
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn issued_at_utc(&self) -> DateTime<Utc> {
        self.issued_at_utc
    }

    /// Identifier used to correlate log lines about this token
    pub fn unique_id(&self) -> Uuid {
        self.unique_id
    }

    /// Effective lifetime after jitter
    pub fn effective_lifetime(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.issued_at)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Short SHA-256 prefix of the credential, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.value.as_bytes());
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("unique_id", &self.unique_id)
            .field("fingerprint", &self.fingerprint())
            .field("issued_at_utc", &self.issued_at_utc)
            .field("effective_lifetime", &self.effective_lifetime())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_never_prints_value() {
        let now = Instant::now();
        let token =
            Token::new("s3cr3t-value".into(), now, now + Duration::from_secs(60), Utc::now());

        let rendered = format!("{token:?}");
        assert!(!rendered.contains("s3cr3t-value"));
        assert!(rendered.contains(&token.fingerprint()));

        let issued = IssuedToken::new("s3cr3t-value", Duration::from_secs(60));
        assert!(!format!("{issued:?}").contains("s3cr3t-value"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let now = Instant::now();
        let a = Token::new("abc".into(), now, now, Utc::now());
        let b = Token::new("abc".into(), now, now, Utc::now());

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 8);
        assert_ne!(a.unique_id(), b.unique_id());
    }
}
