//! # Error Types
//!
//! Structured error handling for the device client. Errors fall into four
//! groups: configuration problems caught up front, illegal-state misuse of
//! the API, connectivity failures that the delivery engine retries on its
//! own, and protocol violations reported by a reachable hub.
//!
//! Hub-reported send outcomes are *not* errors. A send that reached the hub
//! resolves to a [`crate::status::HubStatusCode`] delivered through the
//! completion callback, whatever that status is.

use thiserror::Error;

/// Errors surfaced by the device client and its transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HublineError {
    /// Invalid configuration: bad connection string, missing or conflicting
    /// credentials, or a misused client option. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation was invoked in a state that does not permit it, such as
    /// queueing a message on a closed transport. Never retried.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The hub could not be reached or did not answer within the read
    /// timeout. In-flight work is kept and retried on the next tick.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The hub was reachable but answered an acknowledgment round-trip with
    /// an unexpected status.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, HublineError>;

impl HublineError {
    /// True for errors the scheduler retries implicitly by leaving queued
    /// work in place.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HublineError::Connectivity(_))
    }
}
