//! Property test: for any submission sequence, completion callbacks fire
//! in submission order once enough send and callback ticks have run,
//! regardless of how the messages split across batches.

mod common;

use std::sync::Arc;

use common::{MockWireClient, StatusLog};
use hubline::transport::{HttpsTransport, MessageHandlerSlot};
use hubline::{
    ClientConfig, ConnectionString, Message, StaticTokenProvider, Transport, TransportProtocol,
};
use proptest::prelude::*;

const DESCRIPTOR: &str =
    "HostName=contoso.hubline.dev;DeviceId=thermostat-12;SharedAccessSignature=sig";

fn https_transport(wire: Arc<MockWireClient>) -> HttpsTransport {
    let config = ClientConfig::for_protocol(
        ConnectionString::parse(DESCRIPTOR).unwrap(),
        TransportProtocol::Https,
    );
    HttpsTransport::new(
        config,
        wire,
        Arc::new(StaticTokenProvider::new("sig")),
        MessageHandlerSlot::new(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn callbacks_fire_in_submission_order(
        // Mixed sizes force different batch splits, including bodies big
        // enough that only a couple share a request.
        sizes in prop::collection::vec(1usize..120_000, 1..25),
        fail_first_send in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let wire = MockWireClient::new();
            let transport = https_transport(Arc::clone(&wire));
            transport.open().await.unwrap();

            let log = StatusLog::new();
            for (i, size) in sizes.iter().enumerate() {
                transport
                    .add_message(
                        Message::from_text(&"x".repeat(*size)),
                        Some(log.callback(&format!("{i}"))),
                        None,
                    )
                    .await
                    .unwrap();
            }

            if fail_first_send {
                wire.queue_send_failure();
            }

            // Tick until drained; a bounded tick count guards against a
            // stalled pipeline failing the property silently.
            let mut ticks = 0;
            while !transport.is_empty().await {
                let _ = transport.send_messages().await;
                transport.invoke_callbacks().await.unwrap();
                ticks += 1;
                assert!(ticks < 200, "pipeline failed to drain");
            }

            let expected: Vec<String> = (0..sizes.len()).map(|i| i.to_string()).collect();
            assert_eq!(log.labels(), expected);
        });
    }
}
