//! # Delivery Queues
//!
//! The three-stage outbound pipeline shared by every transport: messages
//! wait in submission order, move into the in-progress stage for one
//! delivery round-trip, and end as callback packets once the hub has
//! answered. A failed round-trip leaves the in-progress stage untouched,
//! so the next attempt retries the identical packet set and nothing is
//! skipped or duplicated.

use std::collections::VecDeque;

use tracing::trace;

use crate::status::HubStatusCode;
use crate::transport::{CallbackPacket, OutboundPacket};

#[derive(Debug, Default)]
pub(crate) struct DeliveryQueues {
    /// Accepted messages not yet picked up for delivery. FIFO.
    waiting: VecDeque<OutboundPacket>,
    /// The packet set of the current delivery attempt. Survives a failed
    /// attempt for retry.
    in_progress: VecDeque<OutboundPacket>,
    /// Resolved deliveries awaiting callback invocation.
    callbacks: VecDeque<CallbackPacket>,
}

impl DeliveryQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_waiting(&mut self, packet: OutboundPacket) {
        self.waiting.push_back(packet);
    }

    pub(crate) fn has_in_progress(&self) -> bool {
        !self.in_progress.is_empty()
    }

    /// Moves exactly one waiting packet into the in-progress stage.
    /// Returns the number of packets staged.
    pub(crate) fn stage_one(&mut self) -> usize {
        match self.waiting.pop_front() {
            Some(packet) => {
                self.in_progress.push_back(packet);
                1
            }
            None => 0,
        }
    }

    /// Moves waiting packets into the in-progress stage while `fits`
    /// accepts them, preserving order. If the very first candidate is
    /// rejected outright it is staged alone anyway; the transport sends
    /// it outside the batch format. Returns the number staged.
    pub(crate) fn stage_batch(
        &mut self,
        mut fits: impl FnMut(&crate::message::Message) -> bool,
    ) -> usize {
        let mut staged = 0;
        loop {
            let accepted = match self.waiting.front() {
                Some(packet) => fits(packet.message()),
                None => break,
            };
            if !accepted {
                break;
            }
            if let Some(packet) = self.waiting.pop_front() {
                self.in_progress.push_back(packet);
                staged += 1;
            }
        }

        if staged == 0 {
            staged = self.stage_one();
        }
        staged
    }

    pub(crate) fn in_progress(&self) -> impl Iterator<Item = &OutboundPacket> {
        self.in_progress.iter()
    }

    pub(crate) fn in_progress_len(&self) -> usize {
        self.in_progress.len()
    }

    /// Resolves the current delivery attempt: every in-progress packet
    /// becomes a callback packet tagged with the hub's status. Packets
    /// without a completion callback have nothing to notify and are
    /// dropped here.
    pub(crate) fn complete_in_progress(&mut self, status: HubStatusCode) {
        while let Some(packet) = self.in_progress.pop_front() {
            match packet.callback {
                Some(callback) => self.callbacks.push_back(CallbackPacket {
                    status,
                    callback,
                    context: packet.context,
                    id: packet.id,
                    queued_at: packet.queued_at,
                }),
                None => {
                    trace!(packet_id = %packet.id, status = %status, "Delivery resolved without a callback");
                }
            }
        }
    }

    /// Takes the whole callback queue in resolution order.
    pub(crate) fn take_callbacks(&mut self) -> VecDeque<CallbackPacket> {
        std::mem::take(&mut self.callbacks)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiting.is_empty() && self.in_progress.is_empty() && self.callbacks.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    #[cfg(test)]
    pub(crate) fn callbacks_len(&self) -> usize {
        self.callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::transport::{CallbackContext, EventCallback};
    use std::sync::Arc;

    fn packet(tag: &str) -> OutboundPacket {
        OutboundPacket::new(
            Message::from_text(tag),
            Some(Arc::new(|_: HubStatusCode, _: Option<&CallbackContext>| {})
                as Arc<dyn EventCallback>),
            None,
        )
    }

    fn packet_without_callback(tag: &str) -> OutboundPacket {
        OutboundPacket::new(Message::from_text(tag), None, None)
    }

    fn staged_bodies(queues: &DeliveryQueues) -> Vec<String> {
        queues
            .in_progress()
            .map(|p| p.message().body_as_text())
            .collect()
    }

    #[test]
    fn staging_preserves_submission_order() {
        let mut queues = DeliveryQueues::new();
        for tag in ["a", "b", "c"] {
            queues.push_waiting(packet(tag));
        }

        assert_eq!(queues.stage_batch(|_| true), 3);
        assert_eq!(staged_bodies(&queues), vec!["a", "b", "c"]);
        assert_eq!(queues.waiting_len(), 0);
    }

    #[test]
    fn stage_batch_stops_at_first_rejection() {
        let mut queues = DeliveryQueues::new();
        for tag in ["a", "b", "c"] {
            queues.push_waiting(packet(tag));
        }

        let mut accepted = 0;
        let staged = queues.stage_batch(|_| {
            accepted += 1;
            accepted <= 2
        });

        assert_eq!(staged, 2);
        assert_eq!(staged_bodies(&queues), vec!["a", "b"]);
        assert_eq!(queues.waiting_len(), 1);
    }

    #[test]
    fn oversize_first_candidate_is_staged_alone() {
        let mut queues = DeliveryQueues::new();
        queues.push_waiting(packet("too-big"));
        queues.push_waiting(packet("next"));

        let staged = queues.stage_batch(|_| false);

        assert_eq!(staged, 1);
        assert_eq!(staged_bodies(&queues), vec!["too-big"]);
        assert_eq!(queues.waiting_len(), 1);
    }

    #[test]
    fn stage_one_moves_a_single_packet() {
        let mut queues = DeliveryQueues::new();
        queues.push_waiting(packet("a"));
        queues.push_waiting(packet("b"));

        assert_eq!(queues.stage_one(), 1);
        assert_eq!(staged_bodies(&queues), vec!["a"]);
        assert_eq!(queues.stage_one(), 1);
        assert_eq!(queues.stage_one(), 0);
    }

    #[test]
    fn completion_tags_every_packet_with_the_status() {
        let mut queues = DeliveryQueues::new();
        queues.push_waiting(packet("a"));
        queues.push_waiting(packet("b"));
        queues.stage_batch(|_| true);

        queues.complete_in_progress(HubStatusCode::Throttled);

        assert!(!queues.has_in_progress());
        let callbacks = queues.take_callbacks();
        assert_eq!(callbacks.len(), 2);
        assert!(callbacks.iter().all(|p| p.status == HubStatusCode::Throttled));
    }

    #[test]
    fn packets_without_callbacks_are_dropped_on_completion() {
        let mut queues = DeliveryQueues::new();
        queues.push_waiting(packet("with"));
        queues.push_waiting(packet_without_callback("without"));
        queues.stage_batch(|_| true);

        queues.complete_in_progress(HubStatusCode::Ok);

        assert_eq!(queues.callbacks_len(), 1);
    }

    #[test]
    fn is_empty_tracks_all_three_stages() {
        let mut queues = DeliveryQueues::new();
        assert!(queues.is_empty());

        queues.push_waiting(packet("a"));
        assert!(!queues.is_empty());

        queues.stage_one();
        assert!(!queues.is_empty());

        queues.complete_in_progress(HubStatusCode::Ok);
        assert!(!queues.is_empty());

        queues.take_callbacks();
        assert!(queues.is_empty());
    }
}
