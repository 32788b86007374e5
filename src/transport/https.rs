//! # HTTPS Transport
//!
//! The batching transport. Waiting messages are packed into a single JSON
//! array request while the serialized body stays under the hub's size
//! ceiling; a lone message travels unbatched as a raw octet-stream
//! request. Inbound messages arrive by polling, carrying their delivery
//! lock in the response, and every application property crosses the wire
//! under the `hub-app-` prefix.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
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

/// Hub-enforced ceiling on a serialized batch body. The subtraction is
/// deliberate and must match the hub's enforcement exactly.
pub const BATCH_SIZE_CEILING_BYTES: usize = 255 * 1024 - 1;

/// Content type of an unbatched message request.
pub const SINGLE_MESSAGE_CONTENT_TYPE: &str = "binary/octet-stream";
/// Content type of a batched message request.
pub const BATCH_CONTENT_TYPE: &str = "application/vnd.hubline.json";

/// Prefix distinguishing application properties from system headers on
/// the HTTPS wire.
pub const APP_PROPERTY_PREFIX: &str = "hub-app-";

/// One message rendered as a batch array element. Text bodies travel
/// verbatim; binary bodies are Base64-encoded and flagged as such, since
/// arbitrary bytes are unsafe inside the JSON batch format.
struct BatchEntry<'a> {
    message: &'a Message,
}

impl Serialize for BatchEntry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut entry = serializer.serialize_struct("BatchEntry", 3)?;
        if self.message.is_text() {
            entry.serialize_field("body", &self.message.body_as_text())?;
            entry.serialize_field("base64Encoded", &false)?;
        } else {
            entry.serialize_field("body", &BASE64.encode(self.message.body()))?;
            entry.serialize_field("base64Encoded", &true)?;
        }
        entry.serialize_field(
            "properties",
            &PrefixedProperties {
                message: self.message,
            },
        )?;
        entry.end()
    }
}

/// Application properties serialized in insertion order under the wire
/// prefix.
struct PrefixedProperties<'a> {
    message: &'a Message,
}

impl Serialize for PrefixedProperties<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let properties = self.message.properties();
        let mut map = serializer.serialize_map(Some(properties.len()))?;
        for property in properties {
            map.serialize_entry(
                &format!("{APP_PROPERTY_PREFIX}{}", property.name()),
                property.value(),
            )?;
        }
        map.end()
    }
}

fn entry_json(message: &Message) -> Result<String> {
    serde_json::to_string(&BatchEntry { message })
        .map_err(|e| HublineError::Configuration(format!("failed to encode batch entry: {e}")))
}

/// Incrementally built JSON batch body with exact size accounting: the
/// opening bracket, every serialized entry, the separating commas, and
/// the closing bracket all count against the ceiling.
pub(crate) struct BatchBody {
    json: String,
    count: usize,
}

impl BatchBody {
    pub(crate) fn new() -> Self {
        Self {
            json: String::from("["),
            count: 0,
        }
    }

    /// Adds a message if the body stays under the ceiling with it
    /// included. Returns whether the message was added.
    pub(crate) fn try_add(&mut self, message: &Message) -> Result<bool> {
        let entry = entry_json(message)?;
        let separator = usize::from(self.count > 0);
        if self.json.len() + separator + entry.len() + 1 > BATCH_SIZE_CEILING_BYTES {
            return Ok(false);
        }
        self.push_entry(&entry);
        Ok(true)
    }

    /// Adds a message unconditionally. Used when rebuilding the payload
    /// for a packet set that already passed staging.
    pub(crate) fn push(&mut self, message: &Message) -> Result<()> {
        let entry = entry_json(message)?;
        self.push_entry(&entry);
        Ok(())
    }

    fn push_entry(&mut self, entry: &str) {
        if self.count > 0 {
            self.json.push(',');
        }
        self.json.push_str(entry);
        self.count += 1;
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        self.json.push(']');
        self.json.into_bytes()
    }
}

/// Renders an unbatched message: raw body bytes with the application
/// properties carried as prefixed headers.
fn single_payload(message: &Message) -> WirePayload {
    let properties = message
        .properties()
        .iter()
        .map(|p| {
            (
                format!("{APP_PROPERTY_PREFIX}{}", p.name()),
                p.value().to_string(),
            )
        })
        .collect();
    WirePayload {
        bytes: message.body().to_vec(),
        content_type: SINGLE_MESSAGE_CONTENT_TYPE,
        properties,
    }
}

/// Rebuilds a device-bound message from its wire envelope, keeping only
/// the prefixed application properties.
fn envelope_to_message(envelope: &InboundEnvelope) -> Message {
    let mut message = Message::new(envelope.body.clone());
    for (name, value) in &envelope.properties {
        let Some(app_name) = strip_app_prefix(name) else {
            continue;
        };
        if let Err(e) = message.set_property(app_name, value) {
            debug!(property = %name, error = %e, "Skipping undecodable inbound property");
        }
    }
    message
}

fn strip_app_prefix(name: &str) -> Option<&str> {
    let prefix_len = APP_PROPERTY_PREFIX.len();
    if name.len() > prefix_len && name[..prefix_len].eq_ignore_ascii_case(APP_PROPERTY_PREFIX) {
        Some(&name[prefix_len..])
    } else {
        None
    }
}

struct HttpsInner {
    state: TransportState,
    queues: DeliveryQueues,
    /// Delivery lock of the one message received and not yet acknowledged.
    message_lock: Option<String>,
}

/// An HTTPS transport. Buffers unsent messages until the hub has received
/// them, batching as many as fit under the size ceiling per request, and
/// polls the hub for device-bound messages on its receive tick.
pub struct HttpsTransport {
    config: ClientConfig,
    wire: Arc<dyn WireClient>,
    tokens: Arc<dyn TokenProvider>,
    handler: MessageHandlerSlot,
    inner: Mutex<HttpsInner>,
    drained: Notify,
}

impl HttpsTransport {
    pub fn new(
        config: ClientConfig,
        wire: Arc<dyn WireClient>,
        tokens: Arc<dyn TokenProvider>,
        handler: MessageHandlerSlot,
    ) -> Self {
        Self {
            config,
            wire,
            tokens,
            handler,
            inner: Mutex::new(HttpsInner {
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

    /// Renders the current in-progress set as one wire payload: single
    /// format for one packet, batch format otherwise.
    fn build_payload(queues: &DeliveryQueues) -> Result<WirePayload> {
        if queues.in_progress_len() == 1 {
            let payload = queues
                .in_progress()
                .next()
                .map(|packet| single_payload(packet.message()));
            payload.ok_or_else(|| {
                HublineError::IllegalState("in-progress stage emptied mid-send".to_string())
            })
        } else {
            let mut batch = BatchBody::new();
            for packet in queues.in_progress() {
                batch.push(packet.message())?;
            }
            Ok(WirePayload {
                bytes: batch.finish(),
                content_type: BATCH_CONTENT_TYPE,
                properties: Vec::new(),
            })
        }
    }

    async fn relay_disposition(
        &self,
        inner: &mut HttpsInner,
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

    fn notify_if_drained(&self, inner: &HttpsInner) {
        if inner.queues.is_empty() {
            self.drained.notify_waiters();
        }
    }
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == TransportState::Open {
            return Ok(());
        }
        let token = self.fresh_token().await?;
        bounded(
            self.config.read_timeout,
            "open connection",
            self.wire.connect(&token, None),
        )
        .await?;
        inner.state = TransportState::Open;
        info!(endpoint = %self.config.endpoint_host(), device = %self.config.device_id, "🚀 HTTPS transport opened");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == TransportState::Closed {
            return Ok(());
        }
        self.wire.close().await?;
        inner.state = TransportState::Closed;
        info!(hub = %self.config.hostname, "✅ HTTPS transport closed");
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
            let mut batch = BatchBody::new();
            inner
                .queues
                .stage_batch(|message| batch.try_add(message).unwrap_or(false));
        }
        if !inner.queues.has_in_progress() {
            return Ok(());
        }

        let payload = Self::build_payload(&inner.queues)?;
        let batched = inner.queues.in_progress_len();
        let token = self.fresh_token().await?;
        let status = bounded(
            self.config.read_timeout,
            "send event batch",
            self.wire.send(payload, &token),
        )
        .await?;

        debug!(batched, status = %status, "📦 Delivery round-trip resolved");
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
        TransportProtocol::Https
    }
}
