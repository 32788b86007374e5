//! Inbound polling behavior: the no-handler no-op, the receive and
//! acknowledge pairing keyed by the delivery lock, and acknowledgment
//! failure handling.

mod common;

use std::sync::Arc;

use common::{envelope, MockWireClient};
use hubline::transport::{MessageHandlerSlot, MqttTransport};
use hubline::{
    CallbackContext, ClientConfig, ConnectionString, HubStatusCode, HublineError, Message,
    MessageCallback, MessageDisposition, StaticTokenProvider, Transport, TransportProtocol,
};
use parking_lot::Mutex;

const DESCRIPTOR: &str =
    "HostName=contoso.hubline.dev;DeviceId=thermostat-12;SharedAccessSignature=sig";

fn mqtt_transport(wire: Arc<MockWireClient>, handler: MessageHandlerSlot) -> MqttTransport {
    let config = ClientConfig::for_protocol(
        ConnectionString::parse(DESCRIPTOR).unwrap(),
        TransportProtocol::Mqtt,
    );
    MqttTransport::new(
        config,
        wire,
        Arc::new(StaticTokenProvider::new("sig")),
        handler,
    )
}

fn disposition_handler(
    disposition: MessageDisposition,
) -> (Arc<dyn MessageCallback>, Arc<Mutex<Vec<String>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let callback: Arc<dyn MessageCallback> =
        Arc::new(move |message: &Message, _: Option<&CallbackContext>| {
            sink.lock().push(message.body_as_text());
            disposition
        });
    (callback, received)
}

#[tokio::test]
async fn no_registered_handler_means_no_poll() {
    let wire = MockWireClient::new();
    let transport = mqtt_transport(Arc::clone(&wire), MessageHandlerSlot::new());
    transport.open().await.unwrap();

    transport.handle_message().await.unwrap();

    assert_eq!(wire.receive_calls(), 0);
}

#[tokio::test]
async fn abandon_is_acknowledged_once_with_the_recorded_lock() {
    let wire = MockWireClient::new();
    let handler = MessageHandlerSlot::new();
    let (callback, received) = disposition_handler(MessageDisposition::Abandon);
    handler.set(Some(callback), None).unwrap();

    let transport = mqtt_transport(Arc::clone(&wire), handler);
    transport.open().await.unwrap();

    wire.queue_receive(envelope(b"set-point", "lock-m1"));
    transport.handle_message().await.unwrap();

    assert_eq!(received.lock().clone(), vec!["set-point".to_string()]);
    assert_eq!(
        wire.acks(),
        vec![("lock-m1".to_string(), MessageDisposition::Abandon)]
    );

    // The lock is spent. Polls that find nothing acknowledge nothing.
    transport.handle_message().await.unwrap();
    transport.handle_message().await.unwrap();
    assert_eq!(wire.acks().len(), 1);
}

#[tokio::test]
async fn each_received_message_uses_its_own_lock() {
    let wire = MockWireClient::new();
    let handler = MessageHandlerSlot::new();
    let (callback, _) = disposition_handler(MessageDisposition::Complete);
    handler.set(Some(callback), None).unwrap();

    let transport = mqtt_transport(Arc::clone(&wire), handler);
    transport.open().await.unwrap();

    wire.queue_receive(envelope(b"one", "lock-1"));
    wire.queue_receive(envelope(b"two", "lock-2"));
    transport.handle_message().await.unwrap();
    transport.handle_message().await.unwrap();

    assert_eq!(
        wire.acks(),
        vec![
            ("lock-1".to_string(), MessageDisposition::Complete),
            ("lock-2".to_string(), MessageDisposition::Complete),
        ]
    );
}

#[tokio::test]
async fn non_ok_empty_acknowledgment_surfaces_as_protocol_error() {
    let wire = MockWireClient::new();
    let handler = MessageHandlerSlot::new();
    let (callback, _) = disposition_handler(MessageDisposition::Reject);
    handler.set(Some(callback), None).unwrap();

    let transport = mqtt_transport(Arc::clone(&wire), handler);
    transport.open().await.unwrap();

    wire.queue_receive(envelope(b"cmd", "lock-x"));
    wire.queue_ack_result(Ok(HubStatusCode::PreconditionFailed));

    let err = transport.handle_message().await.unwrap_err();
    assert!(matches!(err, HublineError::Protocol(_)));
}

#[tokio::test]
async fn unreachable_acknowledgment_surfaces_as_connectivity_error() {
    let wire = MockWireClient::new();
    let handler = MessageHandlerSlot::new();
    let (callback, _) = disposition_handler(MessageDisposition::Complete);
    handler.set(Some(callback), None).unwrap();

    let transport = mqtt_transport(Arc::clone(&wire), handler);
    transport.open().await.unwrap();

    wire.queue_receive(envelope(b"cmd", "lock-y"));
    wire.queue_ack_result(Err(HublineError::Connectivity("gone".to_string())));

    let err = transport.handle_message().await.unwrap_err();
    assert!(matches!(err, HublineError::Connectivity(_)));
}

#[tokio::test]
async fn panicking_message_handler_abandons_the_message() {
    let wire = MockWireClient::new();
    let handler = MessageHandlerSlot::new();
    let callback: Arc<dyn MessageCallback> =
        Arc::new(|_: &Message, _: Option<&CallbackContext>| -> MessageDisposition {
            panic!("handler bug")
        });
    handler.set(Some(callback), None).unwrap();

    let transport = mqtt_transport(Arc::clone(&wire), handler);
    transport.open().await.unwrap();

    wire.queue_receive(envelope(b"cmd", "lock-p"));
    transport.handle_message().await.unwrap();

    assert_eq!(
        wire.acks(),
        vec![("lock-p".to_string(), MessageDisposition::Abandon)]
    );
}

#[tokio::test]
async fn handler_can_be_cleared_again() {
    let wire = MockWireClient::new();
    let handler = MessageHandlerSlot::new();
    let (callback, _) = disposition_handler(MessageDisposition::Complete);
    handler.set(Some(callback), None).unwrap();

    let transport = mqtt_transport(Arc::clone(&wire), handler.clone());
    transport.open().await.unwrap();

    handler.set(None, None).unwrap();
    wire.queue_receive(envelope(b"ignored", "lock-z"));
    transport.handle_message().await.unwrap();

    assert_eq!(wire.receive_calls(), 0);
    assert!(wire.acks().is_empty());
}
