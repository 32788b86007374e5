//! # Token Acquisition
//!
//! The engine authorizes every network call with a fresh, time-bounded
//! token requested from a [`TokenProvider`]. Token cryptography lives
//! outside this crate: key-based credentials require the application to
//! inject a provider, while pre-signed shared access signatures are served
//! by [`StaticTokenProvider`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;

/// Produces a time-bounded authorization token for a hub resource.
///
/// Called once per network round-trip, so implementations are free to
/// cache internally or mint fresh tokens every time.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a token authorizing `resource_uri` for roughly
    /// `valid_secs` seconds from now.
    async fn authorization_token(&self, resource_uri: &str, valid_secs: u64) -> Result<String>;
}

/// Serves a pre-signed shared access signature verbatim.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn authorization_token(&self, _resource_uri: &str, _valid_secs: u64) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Shared, atomically updatable token validity window in seconds.
///
/// The client and its transport hold clones of the same window, so a
/// runtime option change is visible to the next token request without
/// rebuilding the transport.
#[derive(Debug, Clone)]
pub struct TokenValidity(Arc<AtomicU64>);

impl TokenValidity {
    pub fn new(secs: u64) -> Self {
        Self(Arc::new(AtomicU64::new(secs)))
    }

    pub fn secs(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_secs(&self, secs: u64) {
        self.0.store(secs, Ordering::Release);
    }

    /// Epoch second at which a token minted now would expire.
    pub fn expiry_epoch(&self) -> i64 {
        Utc::now().timestamp() + self.secs() as i64
    }
}
