//! Reliable, ordered channel
//!
//! Messages are split into fragments, each sent in its own packet with a
//! [`FragmentHeader`]. A fragment whose packet is reported lost is queued
//! again and goes out under a fresh sequence number; the controller never
//! resends by itself. The receiver reassembles messages, drops duplicates
//! by message id and delivers in message id order.
//!
//! Delivery waits for gaps, but not forever: when complete messages have
//! been held behind a missing one for `reorder_stall_timeout`, the missing
//! ids are skipped and the held messages delivered. A skipped message that
//! completes later is still delivered, once.

use super::{ChannelCore, ChannelError, ChannelKind, ChannelState, MessageChannel};
use crate::config::ChannelConfig;
use crate::controller::{ControllerEvent, PacketController};
use crate::fragment::{fragment_count, split_message, FragmentHeader};
use crate::packet::ACK_BITFIELD_BITS;
use crate::sequence::{SeqNumber, HALF_SEQ_SPACE};
use crate::transceiver::PacketTransceiver;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

/// Received fragments past which an ack is sent without waiting for `update`
const ACK_EAGERLY_AFTER: u32 = ACK_BITFIELD_BITS as u32 / 2;

/// Skipped ids further behind the delivery point than this are forgotten
const SKIPPED_HORIZON: i16 = (HALF_SEQ_SPACE / 2) as i16;

/// Reliable delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReliableStats {
    /// Messages accepted by `send_message`
    pub messages_sent: u64,
    /// Messages whose every fragment was acked
    pub messages_acked: u64,
    /// Messages handed to the application
    pub messages_delivered: u64,
    /// Fragments queued again after their packet was lost
    pub fragments_resent: u64,
    /// Fragments dropped because their message was already delivered or
    /// the fragment was already held
    pub duplicates_dropped: u64,
    /// Times delivery skipped past a missing message
    pub stall_releases: u64,
}

impl ReliableStats {
    /// Add another channel's counters to these
    pub fn accumulate(&mut self, other: &ReliableStats) {
        self.messages_sent += other.messages_sent;
        self.messages_acked += other.messages_acked;
        self.messages_delivered += other.messages_delivered;
        self.fragments_resent += other.fragments_resent;
        self.duplicates_dropped += other.duplicates_dropped;
        self.stall_releases += other.stall_releases;
    }
}

/// Fragment of an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FragmentRef {
    message_id: SeqNumber,
    index: u8,
}

/// Outgoing message not yet fully acked
struct PendingMessage {
    fragments: Vec<Bytes>,
    acked: Vec<bool>,
    unacked: usize,
}

/// Incoming message being reassembled or waiting for its turn
struct IncomingMessage {
    from: SocketAddr,
    fragments: Vec<Option<Bytes>>,
    received: usize,
}

impl IncomingMessage {
    fn new(from: SocketAddr, count: u8) -> Self {
        IncomingMessage {
            from,
            fragments: vec![None; count as usize],
            received: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.fragments.len()
    }

    fn assemble(self) -> (SocketAddr, Bytes) {
        if self.fragments.len() == 1 {
            let message = self.fragments.into_iter().flatten().next().unwrap_or_default();
            return (self.from, message);
        }
        let len = self.fragments.iter().flatten().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(len);
        for fragment in self.fragments.into_iter().flatten() {
            buf.extend_from_slice(&fragment);
        }
        (self.from, buf.freeze())
    }
}

/// Reliable, ordered message channel
pub struct ReliableOrderedChannel {
    core: ChannelCore,
    /// Id given to the next outgoing message
    next_message_id: SeqNumber,
    pending: HashMap<SeqNumber, PendingMessage>,
    /// Fragments waiting for room in flight, resends at the front
    send_queue: VecDeque<FragmentRef>,
    /// Packet sequence -> fragment it carried
    in_flight: HashMap<SeqNumber, FragmentRef>,
    /// Id of the next message to deliver in order
    next_delivery_id: SeqNumber,
    incoming: HashMap<SeqNumber, IncomingMessage>,
    /// Ids passed over by a stall release and not yet delivered
    skipped: HashSet<SeqNumber>,
    /// When complete messages started waiting behind a gap
    stalled_since: Option<Duration>,
    /// Data received since we last sent anything
    unacked_receipts: u32,
    stats: ReliableStats,
}

impl ReliableOrderedChannel {
    pub fn new(channel_id: u8, config: ChannelConfig) -> Self {
        ReliableOrderedChannel {
            core: ChannelCore::new(channel_id, config),
            next_message_id: SeqNumber::new(0),
            pending: HashMap::new(),
            send_queue: VecDeque::new(),
            in_flight: HashMap::new(),
            next_delivery_id: SeqNumber::new(0),
            incoming: HashMap::new(),
            skipped: HashSet::new(),
            stalled_since: None,
            unacked_receipts: 0,
            stats: ReliableStats::default(),
        }
    }

    pub fn stats(&self) -> &ReliableStats {
        &self.stats
    }

    /// Messages sent but not yet fully acked
    pub fn pending_messages(&self) -> usize {
        self.pending.len()
    }

    /// Fragments whose packet is awaiting an ack
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Fragments waiting to be sent
    pub fn queued_fragments(&self) -> usize {
        self.send_queue.len()
    }

    /// Id of the next message to deliver
    pub fn next_delivery_id(&self) -> SeqNumber {
        self.next_delivery_id
    }

    /// Send queued fragments while there is room in flight
    fn flush(&mut self, transceiver: &mut dyn PacketTransceiver) {
        while self.in_flight.len() < self.core.config.max_in_flight {
            let Some(fragment) = self.send_queue.pop_front() else {
                break;
            };
            let Some(payload) = self.pending.get(&fragment.message_id).and_then(|message| {
                let index = fragment.index as usize;
                (!message.acked[index]).then(|| message.fragments[index].clone())
            }) else {
                continue;
            };

            match self.core.transmit(&payload, transceiver) {
                Ok(sequence) => {
                    self.in_flight.insert(sequence, fragment);
                    self.unacked_receipts = 0;
                }
                Err(e) => {
                    tracing::warn!(
                        channel = %self.core.config.name,
                        message_id = %fragment.message_id,
                        error = %e,
                        "failed to send fragment"
                    );
                }
            }
            self.drain_delivery_events();
        }
    }

    /// Apply ack and loss events to the in-flight fragments
    fn drain_delivery_events(&mut self) {
        while let Some(event) = self.core.controller.poll_event() {
            match event {
                ControllerEvent::Acked { sequence } => self.on_fragment_acked(sequence),
                ControllerEvent::Lost { sequence } => self.on_fragment_lost(sequence),
                ControllerEvent::Processed { sequence, .. } => {
                    tracing::trace!(channel = %self.core.config.name, %sequence, "unexpected processed event");
                }
            }
        }
    }

    fn on_fragment_acked(&mut self, sequence: SeqNumber) {
        let Some(fragment) = self.in_flight.remove(&sequence) else {
            return;
        };
        let Some(message) = self.pending.get_mut(&fragment.message_id) else {
            return;
        };
        let index = fragment.index as usize;
        if message.acked[index] {
            return;
        }
        message.acked[index] = true;
        message.unacked -= 1;
        if message.unacked == 0 {
            self.pending.remove(&fragment.message_id);
            self.stats.messages_acked += 1;
            tracing::trace!(channel = %self.core.config.name, message_id = %fragment.message_id, "message acked");
        }
    }

    fn on_fragment_lost(&mut self, sequence: SeqNumber) {
        let Some(fragment) = self.in_flight.remove(&sequence) else {
            return;
        };
        let still_needed = self
            .pending
            .get(&fragment.message_id)
            .map_or(false, |message| !message.acked[fragment.index as usize]);
        if still_needed {
            tracing::debug!(
                channel = %self.core.config.name,
                %sequence,
                message_id = %fragment.message_id,
                index = fragment.index,
                "resending lost fragment"
            );
            self.stats.fragments_resent += 1;
            self.send_queue.push_front(fragment);
        }
    }

    /// Handle one decoded packet payload from the peer
    fn on_fragment_received(&mut self, from: SocketAddr, payload: Bytes) {
        // Empty payloads are ack-only packets
        if payload.is_empty() {
            return;
        }
        self.unacked_receipts += 1;

        let (header, chunk) = match FragmentHeader::decode(&payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(channel = %self.core.config.name, error = %e, "discarding malformed fragment");
                return;
            }
        };
        if header.count > self.core.config.max_fragments {
            tracing::debug!(
                channel = %self.core.config.name,
                count = header.count,
                max = self.core.config.max_fragments,
                "discarding fragment of oversize message"
            );
            return;
        }

        let id = header.message_id;
        if id.lt(self.next_delivery_id) && !self.skipped.contains(&id) {
            self.stats.duplicates_dropped += 1;
            tracing::trace!(channel = %self.core.config.name, message_id = %id, "dropping delivered message");
            return;
        }

        let message = self
            .incoming
            .entry(id)
            .or_insert_with(|| IncomingMessage::new(from, header.count));
        if message.fragments.len() != header.count as usize {
            tracing::debug!(channel = %self.core.config.name, message_id = %id, "fragment count mismatch");
            return;
        }
        let slot = &mut message.fragments[header.index as usize];
        if slot.is_some() {
            self.stats.duplicates_dropped += 1;
            return;
        }
        *slot = Some(chunk);
        message.received += 1;
    }

    /// Deliver every message that may go out now
    fn deliver_ready(&mut self, transceiver: &mut dyn PacketTransceiver) {
        let completed_skips: Vec<SeqNumber> = self
            .skipped
            .iter()
            .copied()
            .filter(|id| self.incoming.get(id).map_or(false, IncomingMessage::is_complete))
            .collect();
        for id in completed_skips {
            self.skipped.remove(&id);
            self.deliver(id, transceiver);
        }

        let start = self.next_delivery_id;
        while self
            .incoming
            .get(&self.next_delivery_id)
            .map_or(false, IncomingMessage::is_complete)
        {
            let id = self.next_delivery_id;
            self.next_delivery_id.increment();
            self.skipped.remove(&id);
            self.deliver(id, transceiver);
        }

        // The stall bound runs from when the current gap became the one
        // holding delivery up
        let now = self.core.controller.time();
        if self.first_held().is_none() {
            self.stalled_since = None;
        } else if self.next_delivery_id != start {
            self.stalled_since = Some(now);
        } else {
            self.stalled_since.get_or_insert(now);
        }
    }

    fn deliver(&mut self, id: SeqNumber, transceiver: &mut dyn PacketTransceiver) {
        if let Some(message) = self.incoming.remove(&id) {
            let (from, bytes) = message.assemble();
            self.stats.messages_delivered += 1;
            tracing::trace!(channel = %self.core.config.name, message_id = %id, len = bytes.len(), "delivering message");
            transceiver.receive_packet(from, bytes);
        }
    }

    /// Oldest complete message held behind a gap
    fn first_held(&self) -> Option<SeqNumber> {
        let next = self.next_delivery_id;
        self.incoming
            .iter()
            .filter(|&(&id, message)| id.gt(next) && message.is_complete())
            .map(|(&id, _)| id)
            .min_by_key(|&id| next.distance_to(id))
    }

    /// Skip past missing messages that have held up delivery too long
    fn release_stalled(&mut self, transceiver: &mut dyn PacketTransceiver) {
        let Some(since) = self.stalled_since else {
            return;
        };
        let now = self.core.controller.time();
        if now.saturating_sub(since) < self.core.config.reorder_stall_timeout {
            return;
        }
        let Some(target) = self.first_held() else {
            self.stalled_since = None;
            return;
        };

        let mut id = self.next_delivery_id;
        while id != target {
            self.skipped.insert(id);
            id.increment();
        }
        tracing::warn!(
            channel = %self.core.config.name,
            from = %self.next_delivery_id,
            to = %target,
            "delivery stalled, skipping missing messages"
        );
        self.stats.stall_releases += 1;
        self.next_delivery_id = target;
        self.stalled_since = None;
        self.deliver_ready(transceiver);
    }

    /// Forget skipped ids far behind the delivery point
    fn prune_skipped(&mut self) {
        let next = self.next_delivery_id;
        let incoming = &mut self.incoming;
        self.skipped.retain(|id| {
            let keep = id.distance_to(next) < SKIPPED_HORIZON;
            if !keep {
                incoming.remove(id);
            }
            keep
        });
    }

    fn send_ack(&mut self, transceiver: &mut dyn PacketTransceiver) {
        let ack = self.core.controller.send_ack(self.core.channel_id);
        transceiver.send_packet(ack.bytes);
        self.unacked_receipts = 0;
        self.drain_delivery_events();
    }
}

impl MessageChannel for ReliableOrderedChannel {
    fn channel_id(&self) -> u8 {
        self.core.channel_id
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::ReliableOrdered
    }

    fn state(&self) -> ChannelState {
        self.core.state
    }

    fn open(&mut self) {
        self.core.open();
    }

    fn send_message(
        &mut self,
        message: Bytes,
        transceiver: &mut dyn PacketTransceiver,
    ) -> Result<(), ChannelError> {
        self.core.ensure_active()?;

        let max = self.core.config.max_message_size();
        if message.len() > max {
            return Err(ChannelError::MessageTooLarge {
                size: message.len(),
                max,
            });
        }
        if self.pending.len() >= self.core.config.max_pending_messages {
            return Err(ChannelError::QueueFull(self.pending.len()));
        }

        let message_id = self.next_message_id;
        self.next_message_id.increment();

        let fragment_size = self.core.config.fragment_size();
        let fragments = split_message(message_id, &message, fragment_size);
        debug_assert_eq!(fragments.len(), fragment_count(message.len(), fragment_size));

        self.send_queue
            .extend((0..fragments.len()).map(|index| FragmentRef {
                message_id,
                index: index as u8,
            }));
        self.pending.insert(
            message_id,
            PendingMessage {
                acked: vec![false; fragments.len()],
                unacked: fragments.len(),
                fragments,
            },
        );
        self.stats.messages_sent += 1;

        self.flush(transceiver);
        Ok(())
    }

    fn on_message_received(
        &mut self,
        from: SocketAddr,
        datagram: &[u8],
        transceiver: &mut dyn PacketTransceiver,
    ) {
        if !self.core.accept(datagram) {
            return;
        }
        while let Some(event) = self.core.controller.poll_event() {
            match event {
                ControllerEvent::Processed { payload, .. } => {
                    self.on_fragment_received(from, payload)
                }
                ControllerEvent::Acked { sequence } => self.on_fragment_acked(sequence),
                ControllerEvent::Lost { sequence } => self.on_fragment_lost(sequence),
            }
        }
        self.deliver_ready(transceiver);

        self.flush(transceiver);
        if self.unacked_receipts >= ACK_EAGERLY_AFTER {
            self.send_ack(transceiver);
        }
    }

    fn update(&mut self, delta: Duration, transceiver: &mut dyn PacketTransceiver) {
        self.core.controller.update(delta);
        self.drain_delivery_events();

        self.release_stalled(transceiver);
        self.prune_skipped();

        self.flush(transceiver);
        if self.unacked_receipts > 0 && self.core.state == ChannelState::Active {
            self.send_ack(transceiver);
        }
    }

    fn reset(&mut self) {
        self.core.reset();
        self.next_message_id = SeqNumber::new(0);
        self.pending.clear();
        self.send_queue.clear();
        self.in_flight.clear();
        self.next_delivery_id = SeqNumber::new(0);
        self.incoming.clear();
        self.skipped.clear();
        self.stalled_since = None;
        self.unacked_receipts = 0;
        self.stats = ReliableStats::default();
    }

    fn controller(&self) -> &PacketController {
        &self.core.controller
    }
}
