//! # AMQP Transport
//!
//! Non-batching transport over an AMQP connection, plain or tunneled
//! through a WebSocket for networks that only pass 443. Each send tick
//! delivers exactly one message; the short default tick period keeps
//! latency low. Application properties travel as AMQP application
//! properties, unprefixed, and the wire client reports the delivery
//! outcome per message.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::auth::TokenProvider;
use crate::config::ClientConfig;
use crate::error::{HublineError, Result};
use crate::message::Message;
use crate::status::HubStatusCode;
use crate::transport::queue::DeliveryQueues;
use crate::transport::{
    bounded, ensure_open, recorded_lock, CallbackContext, EventCallback, MessageDisposition, MessageHandlerSlot,
    OutboundPacket, Transport, TransportProtocol, TransportState,
};
use crate::wire::{InboundEnvelope, WireClient, WirePayload};

/// Content type attached to outbound AMQP message bodies.
pub const AMQP_MESSAGE_CONTENT_TYPE: &str = "application/octet-stream";

/// Renders one message for the AMQP link: raw body plus its application
/// properties.
fn amqp_payload(message: &Message) -> WirePayload {
    WirePayload {
        bytes: message.body().to_vec(),
        content_type: AMQP_MESSAGE_CONTENT_TYPE,
        properties: message
            .properties()
            .iter()
            .map(|p| (p.name().to_string(), p.value().to_string()))
            .collect(),
    }
}

/// Rebuilds a device-bound message from its AMQP envelope.
fn envelope_to_message(envelope: &InboundEnvelope) -> Message {
    let mut message = Message::new(envelope.body.clone());
    for (name, value) in &envelope.properties {
        if let Err(e) = message.set_property(name, value) {
            debug!(property = %name, error = %e, "Skipping undecodable inbound property");
        }
    }
    message
}

struct AmqpInner {
    state: TransportState,
    queues: DeliveryQueues,
    message_lock: Option<String>,
}

/// An AMQP transport. Buffers unsent messages and hands them to the AMQP
/// wire engine one per send tick, tracking each delivery outcome through
/// the shared three-stage pipeline.
pub struct AmqpTransport {
    config: ClientConfig,
    wire: Arc<dyn WireClient>,
    tokens: Arc<dyn TokenProvider>,
    handler: MessageHandlerSlot,
    use_websockets: bool,
    inner: Mutex<AmqpInner>,
    drained: Notify,
}

impl AmqpTransport {
    pub fn new(
        config: ClientConfig,
        wire: Arc<dyn WireClient>,
        tokens: Arc<dyn TokenProvider>,
        handler: MessageHandlerSlot,
        use_websockets: bool,
    ) -> Self {
        Self {
            config,
            wire,
            tokens,
            handler,
            use_websockets,
            inner: Mutex::new(AmqpInner {
                state: TransportState::Closed,
                queues: DeliveryQueues::new(),
                message_lock: None,
            }),
            drained: Notify::new(),
        }
    }

    async fn fresh_token(&self) -> Result<String> {
        self.tokens
            .authorization_token(
                &self.config.resource_uri(),
                self.config.token_validity.secs(),
            )
            .await
    }

    async fn relay_disposition(
        &self,
        inner: &mut AmqpInner,
        disposition: MessageDisposition,
    ) -> Result<()> {
        let lock = recorded_lock(&inner.message_lock)?.to_string();
        let token = self.fresh_token().await?;
        let status = bounded(
            self.config.read_timeout,
            "acknowledge message",
            self.wire.acknowledge(&lock, disposition, &token),
        )
        .await?;
        if status != HubStatusCode::OkEmpty {
            return Err(HublineError::Protocol(format!(
                "message acknowledgment answered with {status}"
            )));
        }
        inner.message_lock = None;
        debug!(disposition = ?disposition, "📥 Inbound message acknowledged");
        Ok(())
    }

    fn notify_if_drained(&self, inner: &AmqpInner) {
        if inner.queues.is_empty() {
            self.drained.notify_waiters();
        }
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == TransportState::Open {
            return Ok(());
        }
        let token = self.fresh_token().await?;
        bounded(
            self.config.read_timeout,
            "open connection",
            self.wire.connect(&token, self.config.certificate_path.as_deref()),
        )
        .await?;
        inner.state = TransportState::Open;
        info!(
            endpoint = %self.config.endpoint_host(),
            device = %self.config.device_id,
            websockets = self.use_websockets,
            certificate = ?self.config.certificate_path,
            "🚀 AMQP transport opened"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == TransportState::Closed {
            return Ok(());
        }
        self.wire.close().await?;
        inner.state = TransportState::Closed;
        info!(hub = %self.config.hostname, "✅ AMQP transport closed");
        Ok(())
    }

    async fn add_message(
        &self,
        message: Message,
        callback: Option<Arc<dyn EventCallback>>,
        context: Option<CallbackContext>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure_open(inner.state, "add a message")?;
        let packet = OutboundPacket::new(message, callback, context);
        debug!(packet_id = %packet.id, "📤 Message queued for delivery");
        inner.queues.push_waiting(packet);
        Ok(())
    }

    async fn send_messages(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure_open(inner.state, "send messages")?;

        if !inner.queues.has_in_progress() {
            inner.queues.stage_one();
        }
        let Some(payload) = inner.queues.in_progress().next().map(|p| amqp_payload(p.message()))
        else {
            return Ok(());
        };

        let token = self.fresh_token().await?;
        let status = bounded(
            self.config.read_timeout,
            "send event",
            self.wire.send(payload, &token),
        )
        .await?;

        debug!(status = %status, "📦 Delivery round-trip resolved");
        inner.queues.complete_in_progress(status);
        self.notify_if_drained(&inner);
        Ok(())
    }

    async fn invoke_callbacks(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure_open(inner.state, "invoke callbacks")?;
        let pending = inner.queues.take_callbacks();
        for packet in pending {
            crate::transport::dispatch_event_callback(packet);
        }
        self.notify_if_drained(&inner);
        Ok(())
    }

    async fn handle_message(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure_open(inner.state, "handle a message")?;

        let Some((callback, context)) = self.handler.get() else {
            return Ok(());
        };

        let token = self.fresh_token().await?;
        let envelope = bounded(
            self.config.read_timeout,
            "poll for message",
            self.wire
                .receive(self.config.message_lock_timeout_secs, &token),
        )
        .await?;
        let Some(envelope) = envelope else {
            return Ok(());
        };

        inner.message_lock = Some(envelope.lock_token.clone());
        let message = envelope_to_message(&envelope);
        let disposition = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback.execute(&message, context.as_ref())
        }))
        .unwrap_or_else(|_| {
            warn!("⚠️ Message callback panicked; abandoning the message for redelivery");
            MessageDisposition::Abandon
        });

        self.relay_disposition(&mut inner, disposition).await
    }

    async fn is_empty(&self) -> bool {
        self.inner.lock().await.queues.is_empty()
    }

    async fn await_drain(&self) {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            // Register before checking, so a drain landing between the
            // check and the await still wakes this task.
            drained.as_mut().enable();
            if self.is_empty().await {
                return;
            }
            drained.await;
        }
    }

    fn protocol(&self) -> TransportProtocol {
        if self.use_websockets {
            TransportProtocol::AmqpsWs
        } else {
            TransportProtocol::Amqps
        }
    }
}
