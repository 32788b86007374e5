//! # Transport Layer
//!
//! This module provides the transport abstraction the device client drives:
//! a uniform lifecycle and queueing contract implemented once per protocol,
//! so the delivery engine works with any transport without knowing the wire
//! details underneath.
//!
//! Every transport owns the same three-stage outbound pipeline (waiting,
//! in-progress, callback) and the single-slot inbound message lock. The
//! concrete implementations differ in how they stage work, HTTPS batching
//! under a size ceiling while AMQP and MQTT send one message per
//! round-trip, and in the wire format they encode privately.

pub mod amqp;
pub mod https;
pub mod mqtt;
pub(crate) mod queue;

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{HublineError, Result};
use crate::message::Message;
use crate::status::HubStatusCode;

pub use amqp::AmqpTransport;
pub use https::HttpsTransport;
pub use mqtt::MqttTransport;

/// The protocols a device can talk to the hub over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    Https,
    Amqps,
    /// AMQP tunneled through a WebSocket, for networks that only pass 443.
    AmqpsWs,
    Mqtt,
}

impl std::fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportProtocol::Https => "HTTPS",
            TransportProtocol::Amqps => "AMQPS",
            TransportProtocol::AmqpsWs => "AMQPS_WS",
            TransportProtocol::Mqtt => "MQTT",
        };
        write!(f, "{name}")
    }
}

/// Two-state transport lifecycle. Closed is both the initial state and
/// re-enterable; open and close are idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Open,
    Closed,
}

/// The caller's verdict on a received message, relayed back to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageDisposition {
    /// Processed successfully; the hub deletes the message.
    Complete,
    /// Not processed; the hub requeues it for redelivery.
    Abandon,
    /// Unprocessable; the hub discards it permanently.
    Reject,
}

/// Opaque caller-supplied context threaded through to callbacks.
pub type CallbackContext = Arc<dyn Any + Send + Sync>;

/// Completion callback invoked once per sent message with the hub's
/// delivery status.
pub trait EventCallback: Send + Sync {
    fn execute(&self, status: HubStatusCode, context: Option<&CallbackContext>);
}

impl<F> EventCallback for F
where
    F: Fn(HubStatusCode, Option<&CallbackContext>) + Send + Sync,
{
    fn execute(&self, status: HubStatusCode, context: Option<&CallbackContext>) {
        self(status, context)
    }
}

/// Handler for device-bound messages; its return value decides the
/// acknowledgment sent back to the hub.
pub trait MessageCallback: Send + Sync {
    fn execute(&self, message: &Message, context: Option<&CallbackContext>) -> MessageDisposition;
}

impl<F> MessageCallback for F
where
    F: Fn(&Message, Option<&CallbackContext>) -> MessageDisposition + Send + Sync,
{
    fn execute(&self, message: &Message, context: Option<&CallbackContext>) -> MessageDisposition {
        self(message, context)
    }
}

/// A message waiting in, or moving through, the outbound pipeline.
pub struct OutboundPacket {
    pub(crate) message: Message,
    pub(crate) callback: Option<Arc<dyn EventCallback>>,
    pub(crate) context: Option<CallbackContext>,
    /// Correlation id for log lines about this packet.
    pub(crate) id: Uuid,
    pub(crate) queued_at: DateTime<Utc>,
}

impl OutboundPacket {
    pub(crate) fn new(
        message: Message,
        callback: Option<Arc<dyn EventCallback>>,
        context: Option<CallbackContext>,
    ) -> Self {
        Self {
            message,
            callback,
            context,
            id: Uuid::new_v4(),
            queued_at: Utc::now(),
        }
    }

    pub(crate) fn message(&self) -> &Message {
        &self.message
    }
}

impl std::fmt::Debug for OutboundPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundPacket")
            .field("id", &self.id)
            .field("body_len", &self.message.body_len())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// A resolved delivery whose completion callback awaits invocation.
pub struct CallbackPacket {
    pub(crate) status: HubStatusCode,
    pub(crate) callback: Arc<dyn EventCallback>,
    pub(crate) context: Option<CallbackContext>,
    pub(crate) id: Uuid,
    pub(crate) queued_at: DateTime<Utc>,
}

impl std::fmt::Debug for CallbackPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackPacket")
            .field("id", &self.id)
            .field("status", &self.status)
            .finish()
    }
}

/// Invokes one completion callback, isolating panics so a broken callback
/// cannot block the rest of the queue or kill the scheduler task.
pub(crate) fn dispatch_event_callback(packet: CallbackPacket) {
    let CallbackPacket {
        status,
        callback,
        context,
        id,
        queued_at,
    } = packet;

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        callback.execute(status, context.as_ref());
    }));
    match outcome {
        Ok(()) => {
            let queued_ms = (Utc::now() - queued_at).num_milliseconds();
            debug!(packet_id = %id, status = %status, queued_ms, "📬 Completion callback invoked");
        }
        Err(_) => {
            warn!(packet_id = %id, status = %status, "⚠️ Completion callback panicked; dropping it");
        }
    }
}

/// Shared slot holding the registered message handler, written by the
/// client facade and read by the transport on every receive tick.
#[derive(Clone, Default)]
pub struct MessageHandlerSlot {
    inner: Arc<RwLock<Option<RegisteredHandler>>>,
}

#[derive(Clone)]
struct RegisteredHandler {
    callback: Arc<dyn MessageCallback>,
    context: Option<CallbackContext>,
}

impl MessageHandlerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or clears the handler. A context without a callback to
    /// receive it is a configuration error.
    pub fn set(
        &self,
        callback: Option<Arc<dyn MessageCallback>>,
        context: Option<CallbackContext>,
    ) -> Result<()> {
        if callback.is_none() && context.is_some() {
            return Err(HublineError::Configuration(
                "cannot register a message context without a message callback".to_string(),
            ));
        }
        *self.inner.write() = callback.map(|callback| RegisteredHandler { callback, context });
        Ok(())
    }

    pub(crate) fn get(&self) -> Option<(Arc<dyn MessageCallback>, Option<CallbackContext>)> {
        self.inner
            .read()
            .as_ref()
            .map(|handler| (Arc::clone(&handler.callback), handler.context.clone()))
    }

    pub fn is_registered(&self) -> bool {
        self.inner.read().is_some()
    }
}

/// The delivery lock recorded by the last receive, or an illegal-state
/// error when no unacknowledged message exists.
pub(crate) fn recorded_lock(lock: &Option<String>) -> Result<&str> {
    lock.as_deref().ok_or_else(|| {
        HublineError::IllegalState(
            "cannot acknowledge a message before one has been received".to_string(),
        )
    })
}

/// Fails with an illegal-state error unless the transport is open.
pub(crate) fn ensure_open(state: TransportState, operation: &str) -> Result<()> {
    match state {
        TransportState::Open => Ok(()),
        TransportState::Closed => Err(HublineError::IllegalState(format!(
            "cannot {operation} on a transport that is closed"
        ))),
    }
}

/// Bounds one network round-trip by the configured read timeout.
pub(crate) async fn bounded<T>(
    read_timeout: Duration,
    operation: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(read_timeout, call).await {
        Ok(outcome) => outcome,
        Err(_) => Err(HublineError::Connectivity(format!(
            "{operation} timed out after {read_timeout:?}"
        ))),
    }
}

/// Uniform lifecycle and queueing contract every concrete transport
/// implements.
///
/// The queue-mutating operations (`add_message`, `send_messages`,
/// `invoke_callbacks`, `handle_message`) require the transport to be open
/// and fail with an illegal-state error otherwise. Implementations
/// serialize all of them, callback invocation included, behind one lock
/// per transport instance.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the underlying connection. Does nothing if already open.
    async fn open(&self) -> Result<()>;

    /// Tears down the underlying connection. Does nothing if already
    /// closed. Queued work is retained, not flushed; callers that need a
    /// clean drain await [`Transport::await_drain`] first.
    async fn close(&self) -> Result<()>;

    /// Enqueues a message with its completion callback on the waiting
    /// queue.
    async fn add_message(
        &self,
        message: Message,
        callback: Option<Arc<dyn EventCallback>>,
        context: Option<CallbackContext>,
    ) -> Result<()>;

    /// Performs one delivery round-trip for queued work, if any. A failed
    /// previous attempt is retried with the identical packet set before
    /// new work is picked up.
    async fn send_messages(&self) -> Result<()>;

    /// Drains the callback queue, invoking each completion callback in
    /// resolution order.
    async fn invoke_callbacks(&self) -> Result<()>;

    /// Polls for at most one device-bound message and runs the registered
    /// handler's accept/abandon/reject round-trip. A no-op when no handler
    /// is registered.
    async fn handle_message(&self) -> Result<()>;

    /// True when the waiting, in-progress, and callback queues are all
    /// empty.
    async fn is_empty(&self) -> bool;

    /// Resolves once all three queues are empty. The efficient companion
    /// to [`Transport::is_empty`] for shutdown paths.
    async fn await_drain(&self);

    fn protocol(&self) -> TransportProtocol;
}
