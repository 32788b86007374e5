#![allow(clippy::doc_markdown)] // Allow technical terms like WebSockets, MQTT in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Hubline Device SDK
//!
//! Device-side client for the Hubline cloud messaging hub. A device sends
//! event messages to the hub and receives commands from it over one of
//! several interchangeable transports: HTTPS, AMQP, AMQP over WebSockets,
//! or MQTT.
//!
//! ## Architecture
//!
//! The core of the SDK is the transport buffering and delivery-lifecycle
//! engine. Outbound messages move through a three-stage pipeline inside
//! the transport: a **waiting** queue of accepted messages, an
//! **in-progress** stage holding the packet set of the current delivery
//! attempt, and a **callback** queue of resolved deliveries awaiting user
//! notification. A failed delivery leaves the in-progress stage untouched
//! so the next tick retries the identical set; the hub therefore sees
//! each accepted message at least once and never duplicated within a
//! round-trip. Inbound messages are polled one at a time and acknowledged
//! with the handler's complete/abandon/reject verdict.
//!
//! A periodic scheduler drives both directions on fixed-rate, never
//! overlapping ticks. HTTPS batches messages per request under the hub's
//! size ceiling; AMQP and MQTT deliver one message per tick at short
//! periods.
//!
//! ## Module Organization
//!
//! - [`client`] - Public facade: open/close lifecycle, event submission,
//!   message handler registration, runtime options
//! - [`transport`] - Transport contract and the three protocol engines
//! - [`scheduler`] - Fixed-rate send and receive task driver
//! - [`message`] - Message payload and validated property bag
//! - [`status`] - Closed set of hub delivery outcomes
//! - [`config`] - Connection-string parsing and client configuration
//! - [`auth`] - Token provider seam for per-call authorization
//! - [`wire`] - Wire client seam wrapping protocol plumbing
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hubline::{DeviceClient, HubStatusCode, Message, TransportProtocol};
//! # use hubline::CallbackContext;
//! # async fn example(wire: Arc<dyn hubline::WireClient>) -> hubline::Result<()> {
//! let mut client = DeviceClient::builder(
//!     "HostName=contoso.hubline.dev;DeviceId=thermostat-12;SharedAccessSignature=...",
//!     TransportProtocol::Mqtt,
//! )
//! .wire_client(wire)
//! .build()?;
//!
//! client.open().await?;
//!
//! let message = Message::from_text("21.5");
//! client
//!     .send_event_async(
//!         message,
//!         Some(Arc::new(|status: HubStatusCode, _: Option<&CallbackContext>| {
//!             println!("delivered: {status}");
//!         })),
//!         None,
//!     )
//!     .await?;
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod scheduler;
pub mod status;
pub mod transport;
pub mod wire;

pub use auth::{StaticTokenProvider, TokenProvider};
pub use client::{ClientOption, DeviceClient, DeviceClientBuilder};
pub use config::{ClientConfig, ConnectionString, Credential};
pub use error::{HublineError, Result};
pub use message::{Message, MessageProperty};
pub use status::HubStatusCode;
pub use transport::{
    CallbackContext, EventCallback, MessageCallback, MessageDisposition, Transport,
    TransportProtocol,
};
pub use wire::{InboundEnvelope, WireClient, WirePayload};
