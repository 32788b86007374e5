//! # Device Client Facade
//!
//! The public entry point. A [`DeviceClient`] owns the parsed connection
//! configuration, selects and constructs the concrete transport for the
//! requested protocol, and runs the scheduler lifecycle around it. The
//! client buffers events while the hub is unreachable and resends them on
//! later ticks; completion callbacks fire in submission order once the
//! hub has answered.
//!
//! Wire clients and, for key-based credentials, token providers are
//! injected through the builder. Both are external collaborators; the
//! client never generates token signatures itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::auth::{StaticTokenProvider, TokenProvider};
use crate::config::{ClientConfig, ConnectionString, Credential};
use crate::error::{HublineError, Result};
use crate::message::Message;
use crate::scheduler::TransportScheduler;
use crate::transport::{
    AmqpTransport, CallbackContext, EventCallback, HttpsTransport, MessageCallback,
    MessageHandlerSlot, MqttTransport, Transport, TransportProtocol,
};
use crate::wire::WireClient;

/// Runtime options recognized by [`DeviceClient::set_option`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOption {
    /// Interval between polls for device-bound messages. HTTPS only, and
    /// only before the client is opened.
    MinimumPollingInterval(Duration),
    /// Trusted-certificate path for the connection. AMQP only, and only
    /// before the client is opened.
    CertificatePath(PathBuf),
    /// Validity window for requested authorization tokens. Any transport;
    /// applied to an open client with key-based credentials it
    /// transparently closes and reopens the transport so the next token
    /// request uses the new window on a fresh connection.
    SasTokenValiditySecs(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Open,
    Closed,
}

/// Builder wiring a connection string, a protocol, and the injected
/// collaborators into a [`DeviceClient`].
pub struct DeviceClientBuilder {
    connection_string: String,
    protocol: TransportProtocol,
    wire: Option<Arc<dyn WireClient>>,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl DeviceClientBuilder {
    pub fn new(connection_string: impl Into<String>, protocol: TransportProtocol) -> Self {
        Self {
            connection_string: connection_string.into(),
            protocol,
            wire: None,
            tokens: None,
        }
    }

    /// Injects the wire client for the chosen protocol.
    pub fn wire_client(mut self, wire: Arc<dyn WireClient>) -> Self {
        self.wire = Some(wire);
        self
    }

    /// Injects a token provider. Mandatory for key-based credentials;
    /// optional for signature credentials, which default to serving the
    /// signature verbatim.
    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn build(self) -> Result<DeviceClient> {
        let descriptor = ConnectionString::parse(&self.connection_string)?;
        let config = ClientConfig::for_protocol(descriptor, self.protocol);

        let wire = self.wire.ok_or_else(|| {
            HublineError::Configuration(format!(
                "a wire client for {} must be provided",
                self.protocol
            ))
        })?;

        let tokens = match (self.tokens, &config.credential) {
            (Some(tokens), _) => tokens,
            (None, Credential::SharedAccessSignature(signature)) => {
                Arc::new(StaticTokenProvider::new(signature.clone())) as Arc<dyn TokenProvider>
            }
            (None, Credential::SharedAccessKey(_)) => {
                return Err(HublineError::Configuration(
                    "key-based credentials require an injected token provider".to_string(),
                ));
            }
        };

        info!(
            hub = %config.hostname,
            device = %config.device_id,
            protocol = %self.protocol,
            "🔧 Device client configured"
        );

        Ok(DeviceClient {
            config,
            protocol: self.protocol,
            wire,
            tokens,
            handler: MessageHandlerSlot::new(),
            transport: None,
            scheduler: None,
            state: ClientState::Closed,
        })
    }
}

/// A device's connection to the hub: buffered event sending plus polled
/// command reception over the configured transport.
pub struct DeviceClient {
    config: ClientConfig,
    protocol: TransportProtocol,
    wire: Arc<dyn WireClient>,
    tokens: Arc<dyn TokenProvider>,
    handler: MessageHandlerSlot,
    transport: Option<Arc<dyn Transport>>,
    scheduler: Option<TransportScheduler>,
    state: ClientState,
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("config", &self.config)
            .field("protocol", &self.protocol)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl DeviceClient {
    pub fn builder(
        connection_string: impl Into<String>,
        protocol: TransportProtocol,
    ) -> DeviceClientBuilder {
        DeviceClientBuilder::new(connection_string, protocol)
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    pub fn is_open(&self) -> bool {
        self.state == ClientState::Open
    }

    fn make_transport(&self) -> Arc<dyn Transport> {
        let config = self.config.clone();
        let wire = Arc::clone(&self.wire);
        let tokens = Arc::clone(&self.tokens);
        let handler = self.handler.clone();
        match self.protocol {
            TransportProtocol::Https => Arc::new(HttpsTransport::new(config, wire, tokens, handler)),
            TransportProtocol::Amqps => {
                Arc::new(AmqpTransport::new(config, wire, tokens, handler, false))
            }
            TransportProtocol::AmqpsWs => {
                Arc::new(AmqpTransport::new(config, wire, tokens, handler, true))
            }
            TransportProtocol::Mqtt => Arc::new(MqttTransport::new(config, wire, tokens, handler)),
        }
    }

    /// Opens the transport and starts the periodic send and receive
    /// tasks. Does nothing if the client is already open.
    pub async fn open(&mut self) -> Result<()> {
        if self.state == ClientState::Open {
            return Ok(());
        }

        let transport = match self.transport.take() {
            Some(existing) => existing,
            None => self.make_transport(),
        };
        transport.open().await?;

        self.scheduler = Some(TransportScheduler::start(
            Arc::clone(&transport),
            self.config.send_period,
            self.config.receive_period,
        ));
        self.transport = Some(transport);
        self.state = ClientState::Open;
        Ok(())
    }

    /// Completes all outstanding deliveries and callbacks, then stops the
    /// scheduler and closes the transport. Does nothing if the client is
    /// already closed.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ClientState::Closed {
            return Ok(());
        }

        // The scheduler keeps ticking while we wait, so queued work keeps
        // flowing until every queue is empty.
        if let Some(transport) = &self.transport {
            transport.await_drain().await;
        }
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }
        if let Some(transport) = self.transport.take() {
            transport.close().await?;
        }
        self.state = ClientState::Closed;
        info!(hub = %self.config.hostname, "✅ Device client closed");
        Ok(())
    }

    /// Queues an event for asynchronous delivery. The callback, if any,
    /// fires with the hub's status once the delivery resolves.
    pub async fn send_event_async(
        &self,
        message: Message,
        callback: Option<Arc<dyn EventCallback>>,
        context: Option<CallbackContext>,
    ) -> Result<()> {
        let transport = self.open_transport("send an event")?;
        transport.add_message(message, callback, context).await
    }

    /// Registers the handler invoked for device-bound messages, or clears
    /// it. A context without a callback is rejected.
    pub fn set_message_callback(
        &self,
        callback: Option<Arc<dyn MessageCallback>>,
        context: Option<CallbackContext>,
    ) -> Result<()> {
        self.handler.set(callback, context)
    }

    /// Applies a runtime option, enforcing each option's transport and
    /// lifecycle restrictions.
    pub async fn set_option(&mut self, option: ClientOption) -> Result<()> {
        match option {
            ClientOption::MinimumPollingInterval(interval) => {
                if self.protocol != TransportProtocol::Https {
                    return Err(HublineError::Configuration(
                        "the minimum polling interval only applies to HTTPS".to_string(),
                    ));
                }
                if self.state == ClientState::Open {
                    return Err(HublineError::IllegalState(
                        "the minimum polling interval cannot change while the client is open"
                            .to_string(),
                    ));
                }
                self.config.receive_period = interval;
            }
            ClientOption::CertificatePath(path) => {
                if !matches!(
                    self.protocol,
                    TransportProtocol::Amqps | TransportProtocol::AmqpsWs
                ) {
                    return Err(HublineError::Configuration(
                        "the certificate path only applies to AMQP".to_string(),
                    ));
                }
                if self.state == ClientState::Open {
                    return Err(HublineError::IllegalState(
                        "the certificate path cannot change while the client is open".to_string(),
                    ));
                }
                self.config.certificate_path = Some(path);
            }
            ClientOption::SasTokenValiditySecs(secs) => {
                self.config.token_validity.set_secs(secs);
                debug!(valid_secs = secs, "Token validity window updated");
                if self.state == ClientState::Open && self.config.credential.is_key_based() {
                    self.reopen_transport().await?;
                }
            }
        }
        Ok(())
    }

    /// Cycles the open transport so the next token request authorizes a
    /// fresh connection. Queued work survives; the transport keeps its
    /// queues across close and open.
    async fn reopen_transport(&mut self) -> Result<()> {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }
        let transport = self.open_transport("reopen the transport")?;
        transport.close().await?;
        transport.open().await?;
        self.scheduler = Some(TransportScheduler::start(
            Arc::clone(&transport),
            self.config.send_period,
            self.config.receive_period,
        ));
        info!("🔄 Transport reopened with updated token validity");
        Ok(())
    }

    fn open_transport(&self, operation: &str) -> Result<Arc<dyn Transport>> {
        if self.state == ClientState::Closed {
            return Err(HublineError::IllegalState(format!(
                "cannot {operation} on a device client that is closed"
            )));
        }
        self.transport.as_ref().map(Arc::clone).ok_or_else(|| {
            HublineError::IllegalState(format!(
                "cannot {operation} before the device client is opened"
            ))
        })
    }
}
