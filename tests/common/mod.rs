//! Shared test doubles: a programmable, recording wire client and small
//! callback helpers used across the integration suites.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use hubline::{
    CallbackContext, EventCallback, HubStatusCode, HublineError, InboundEnvelope,
    MessageDisposition, Result, WireClient, WirePayload,
};

/// One recorded outbound request.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub properties: Vec<(String, String)>,
    pub token: String,
}

#[derive(Default)]
struct MockState {
    connects: usize,
    connect_certificates: Vec<Option<PathBuf>>,
    closes: usize,
    sends: Vec<SentRequest>,
    send_results: VecDeque<Result<HubStatusCode>>,
    receive_calls: usize,
    receive_results: VecDeque<Result<Option<InboundEnvelope>>>,
    acks: Vec<(String, MessageDisposition)>,
    ack_results: VecDeque<Result<HubStatusCode>>,
}

/// Programmable wire client. Results are consumed in FIFO order; when no
/// result is queued the defaults apply: sends resolve `Ok`, receives find
/// nothing, acknowledgments answer `OkEmpty`.
#[derive(Default)]
pub struct MockWireClient {
    state: Mutex<MockState>,
}

impl MockWireClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_send_result(&self, result: Result<HubStatusCode>) {
        self.state.lock().send_results.push_back(result);
    }

    pub fn queue_send_failure(&self) {
        self.queue_send_result(Err(HublineError::Connectivity(
            "hub unreachable".to_string(),
        )));
    }

    pub fn queue_receive(&self, envelope: InboundEnvelope) {
        self.state
            .lock()
            .receive_results
            .push_back(Ok(Some(envelope)));
    }

    pub fn queue_receive_result(&self, result: Result<Option<InboundEnvelope>>) {
        self.state.lock().receive_results.push_back(result);
    }

    pub fn queue_ack_result(&self, result: Result<HubStatusCode>) {
        self.state.lock().ack_results.push_back(result);
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn connect_certificates(&self) -> Vec<Option<PathBuf>> {
        self.state.lock().connect_certificates.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn sends(&self) -> Vec<SentRequest> {
        self.state.lock().sends.clone()
    }

    pub fn receive_calls(&self) -> usize {
        self.state.lock().receive_calls
    }

    pub fn acks(&self) -> Vec<(String, MessageDisposition)> {
        self.state.lock().acks.clone()
    }
}

#[async_trait]
impl WireClient for MockWireClient {
    async fn connect(&self, _token: &str, certificate: Option<&Path>) -> Result<()> {
        let mut state = self.state.lock();
        state.connects += 1;
        state
            .connect_certificates
            .push(certificate.map(Path::to_path_buf));
        Ok(())
    }

    async fn send(&self, payload: WirePayload, token: &str) -> Result<HubStatusCode> {
        let mut state = self.state.lock();
        let result = state
            .send_results
            .pop_front()
            .unwrap_or(Ok(HubStatusCode::Ok));
        if result.is_ok() {
            state.sends.push(SentRequest {
                bytes: payload.bytes,
                content_type: payload.content_type.to_string(),
                properties: payload.properties,
                token: token.to_string(),
            });
        }
        result
    }

    async fn receive(
        &self,
        _lock_timeout_secs: u64,
        _token: &str,
    ) -> Result<Option<InboundEnvelope>> {
        let mut state = self.state.lock();
        state.receive_calls += 1;
        state.receive_results.pop_front().unwrap_or(Ok(None))
    }

    async fn acknowledge(
        &self,
        lock_token: &str,
        disposition: MessageDisposition,
        _token: &str,
    ) -> Result<HubStatusCode> {
        let mut state = self.state.lock();
        let result = state
            .ack_results
            .pop_front()
            .unwrap_or(Ok(HubStatusCode::OkEmpty));
        if result.is_ok() {
            state.acks.push((lock_token.to_string(), disposition));
        }
        result
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closes += 1;
        Ok(())
    }
}

/// Collects completion callback invocations in order.
#[derive(Default)]
pub struct StatusLog {
    entries: Arc<Mutex<Vec<(String, HubStatusCode)>>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A completion callback that records `(label, status)` on this log.
    pub fn callback(&self, label: &str) -> Arc<dyn EventCallback> {
        let entries = Arc::clone(&self.entries);
        let label = label.to_string();
        Arc::new(move |status: HubStatusCode, _: Option<&CallbackContext>| {
            entries.lock().push((label.clone(), status));
        })
    }

    pub fn entries(&self) -> Vec<(String, HubStatusCode)> {
        self.entries.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|(label, _)| label.clone())
            .collect()
    }
}

pub fn envelope(body: &[u8], lock_token: &str) -> InboundEnvelope {
    InboundEnvelope {
        body: body.to_vec(),
        properties: Vec::new(),
        lock_token: lock_token.to_string(),
        enqueued_at: None,
    }
}
