//! Bearer credential lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  TokenManager   │  cache + jittered expiry + single-flight refresh
//! └────────┬────────┘
//!          │
//!          └──► TokenSource   (issuer, injected by the host)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use tourlink_common::auth::{IssuedToken, TokenError, TokenManager, TokenSource};
//!
//! struct StaticSource;
//!
//! #[async_trait]
//! impl TokenSource for StaticSource {
//!     async fn fetch_token(&self) -> Result<IssuedToken, TokenError> {
//!         Ok(IssuedToken::new("opaque", Duration::from_secs(3300)))
//!     }
//! }
//!
//! # async fn demo() -> Result<(), TokenError> {
//! let manager = TokenManager::new(StaticSource);
//! let token = manager.get_token().await?;
//! println!("bearer {}", token.fingerprint());
//! # Ok(())
//! # }
//! ```

pub mod token_manager;
pub mod traits;
pub mod types;

pub use token_manager::{TokenError, TokenManager, TokenManagerConfig};
pub use traits::TokenSource;
pub use types::{IssuedToken, Token};
