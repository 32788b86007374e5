//! # Wire Client Interface
//!
//! The seam between the delivery engine and the per-protocol wire stacks.
//! A [`WireClient`] wraps whatever actually moves bytes for one protocol,
//! such as an HTTP request layer, an AMQP connection/session/link engine,
//! or an MQTT client, behind a uniform connect/send/receive/acknowledge
//! surface. Production implementations are injected by the application;
//! the test suite injects recording mocks.
//!
//! Transports own their wire *format* (batch JSON, property prefixes) and
//! hand the wire client finished payload bytes; the wire client owns the
//! protocol plumbing underneath.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::status::HubStatusCode;
use crate::transport::MessageDisposition;

/// A fully encoded service-bound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePayload {
    /// Encoded message body, single or batch format.
    pub bytes: Vec<u8>,
    /// Content type describing the encoding of `bytes`.
    pub content_type: &'static str,
    /// Out-of-band properties for formats that carry them outside the
    /// body, such as HTTPS headers or AMQP application properties. Empty
    /// when the properties are folded into `bytes`.
    pub properties: Vec<(String, String)>,
}

/// A device-bound message as it arrived off the wire.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub body: Vec<u8>,
    /// Properties as the wire client decoded them, before any
    /// transport-specific prefix stripping.
    pub properties: Vec<(String, String)>,
    /// Opaque delivery lock identifying this message for acknowledgment.
    pub lock_token: String,
    /// When the hub enqueued the message, if the protocol reports it.
    pub enqueued_at: Option<DateTime<Utc>>,
}

/// Uniform wire-level contract every protocol stack fulfills.
///
/// Every call takes the authorization token to use for that round-trip;
/// the engine requests a fresh token per call.
#[async_trait]
pub trait WireClient: Send + Sync {
    /// Establishes the underlying connection or channel. A trusted
    /// certificate, when configured, overrides the default trust store;
    /// protocols without that concern ignore it.
    async fn connect(&self, token: &str, certificate: Option<&Path>) -> Result<()>;

    /// Delivers one payload and reports the hub's verdict. Returns an
    /// error only when the hub could not be reached at all.
    async fn send(&self, payload: WirePayload, token: &str) -> Result<HubStatusCode>;

    /// Polls for at most one device-bound message. A returned message
    /// stays locked for acknowledgment for `lock_timeout_secs` before the
    /// hub requeues it.
    async fn receive(&self, lock_timeout_secs: u64, token: &str)
        -> Result<Option<InboundEnvelope>>;

    /// Relays a disposition for the message identified by `lock_token`.
    async fn acknowledge(
        &self,
        lock_token: &str,
        disposition: MessageDisposition,
        token: &str,
    ) -> Result<HubStatusCode>;

    /// Tears down the underlying connection.
    async fn close(&self) -> Result<()>;
}
