//! Traits for credential issuance
//!
//! Abstracts the remote (or local) issuer so the token cache can be tested
//! with scripted sources.

use async_trait::async_trait;

use super::token_manager::TokenError;
use super::types::IssuedToken;

/// Issues bearer credentials on demand
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a brand new credential
    ///
    /// # Returns
    /// The credential value together with its nominal lifetime
    ///
    /// # Errors
    /// Returns [`TokenError::Fetch`] if the issuer cannot be reached or
    /// refuses to issue a credential
    async fn fetch_token(&self) -> Result<IssuedToken, TokenError>;
}
