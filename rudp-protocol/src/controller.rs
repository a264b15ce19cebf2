//! Packet controller
//!
//! The reliability engine shared by every channel variant. It stamps
//! outgoing packets with sequence and ack fields, keeps the send and receive
//! [`AckWindow`]s, turns the peer's ack bitfields into per-sequence ack
//! events, and reports packets whose ack never arrived.
//!
//! The controller never calls back into its owner. Everything it learns is
//! queued as a [`ControllerEvent`] and drained with
//! [`PacketController::poll_event`] after each call.

use crate::config::ChannelConfig;
use crate::packet::{Packet, PacketError, PacketHeader};
use crate::rtt::RttEstimator;
use crate::sequence::SeqNumber;
use crate::window::{AckWindow, ReceivedPacket, SentPacket};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::time::Duration;

/// Something the controller learned while sending, receiving or ticking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// The peer acknowledged one of our packets (reported once per sequence)
    Acked { sequence: SeqNumber },
    /// One of our packets went unacknowledged past the resend timeout, or
    /// was evicted from the send window before its ack arrived
    Lost { sequence: SeqNumber },
    /// A datagram from the peer was decoded
    Processed {
        sequence: SeqNumber,
        /// The receive window already held this sequence
        duplicate: bool,
        payload: Bytes,
    },
}

/// An encoded packet ready for the transceiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPacket {
    pub sequence: SeqNumber,
    pub bytes: Bytes,
}

/// Controller statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Total packets sent
    pub packets_sent: u64,
    /// Total packets received (duplicates included, stale and invalid excluded)
    pub packets_received: u64,
    /// Packets the peer acknowledged
    pub packets_acked: u64,
    /// Packets written off as lost
    pub packets_lost: u64,
    /// Received packets that were already in the receive window
    pub packets_duplicate: u64,
    /// Received packets older than the receive window
    pub packets_stale: u64,
    /// Datagrams that failed to decode
    pub packets_invalid: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
}

impl ControllerStats {
    /// Add another controller's counters to these
    pub fn accumulate(&mut self, other: &ControllerStats) {
        self.packets_sent += other.packets_sent;
        self.packets_received += other.packets_received;
        self.packets_acked += other.packets_acked;
        self.packets_lost += other.packets_lost;
        self.packets_duplicate += other.packets_duplicate;
        self.packets_stale += other.packets_stale;
        self.packets_invalid += other.packets_invalid;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
    }
}

/// Receive range of the session before the last reset
///
/// Sequences in `[low, horizon)` were valid for the old session and are
/// rejected until the new session's sequences reach `low` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResetFence {
    low: SeqNumber,
    horizon: SeqNumber,
}

impl ResetFence {
    fn contains(&self, sequence: SeqNumber) -> bool {
        sequence.ge(self.low) && sequence.lt(self.horizon)
    }

    /// True once a sequence accepted after the reset has come round to the
    /// fenced range, so the old session's packets can no longer be in flight
    fn is_passed_by(&self, sequence: SeqNumber) -> bool {
        sequence.next().ge(self.low)
    }
}

/// Reliability engine for one channel
pub struct PacketController {
    name: String,
    max_packet_size: usize,
    min_resend_timeout: Duration,
    max_resend_timeout: Duration,
    packet_loss_smoothing_factor: f32,
    /// Clock advanced by `update`
    time: Duration,
    /// Next sequence to assign
    local_sequence: SeqNumber,
    /// Newest sequence received from the peer
    remote_sequence: SeqNumber,
    sent_packets: AckWindow<SentPacket>,
    received_packets: AckWindow<ReceivedPacket>,
    rtt: RttEstimator,
    packet_loss: f32,
    stats: ControllerStats,
    events: VecDeque<ControllerEvent>,
    reset_fence: Option<ResetFence>,
}

impl PacketController {
    /// Create a new controller
    pub fn new(config: &ChannelConfig) -> Self {
        PacketController {
            name: config.name.clone(),
            max_packet_size: config.max_packet_size,
            min_resend_timeout: config.min_resend_timeout,
            max_resend_timeout: config.max_resend_timeout,
            packet_loss_smoothing_factor: config.packet_loss_smoothing_factor,
            time: Duration::ZERO,
            local_sequence: SeqNumber::new(0),
            remote_sequence: SeqNumber::new(0),
            sent_packets: AckWindow::with_capacity(config.sent_packets_window),
            received_packets: AckWindow::with_capacity(config.received_packets_window),
            rtt: RttEstimator::new(),
            packet_loss: 0.0,
            stats: ControllerStats::default(),
            events: VecDeque::new(),
            reset_fence: None,
        }
    }

    /// Stamp and encode a packet carrying `payload`
    ///
    /// Fails only when the payload exceeds the maximum packet size; splitting
    /// larger messages is the calling channel's job.
    pub fn send_packet(
        &mut self,
        channel_id: u8,
        payload: &[u8],
    ) -> Result<OutgoingPacket, PacketError> {
        if payload.len() > self.max_packet_size {
            return Err(PacketError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_packet_size,
            });
        }

        let sequence = self.local_sequence;
        let header = PacketHeader::new(
            sequence,
            self.remote_sequence,
            self.received_packets
                .generate_ack_bitfield(self.remote_sequence),
            channel_id,
        );

        let mut buf = BytesMut::with_capacity(crate::packet::HEADER_SIZE + payload.len());
        header.to_bytes(&mut buf);
        buf.extend_from_slice(payload);
        let bytes = buf.freeze();

        self.claim_slot(sequence);
        self.sent_packets
            .insert(sequence, SentPacket::new(self.time, bytes.len()));
        self.local_sequence.increment();

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;

        tracing::trace!(
            channel = %self.name,
            %sequence,
            ack = %header.ack_sequence,
            ack_bits = header.ack_bitfield,
            "sent packet"
        );

        Ok(OutgoingPacket { sequence, bytes })
    }

    /// Stamp and encode an ack-only packet
    ///
    /// The packet consumes a sequence number so the peer records it, but it
    /// is not tracked in the send window: nobody waits for its ack.
    pub fn send_ack(&mut self, channel_id: u8) -> OutgoingPacket {
        let sequence = self.local_sequence;
        let header = PacketHeader::new(
            sequence,
            self.remote_sequence,
            self.received_packets
                .generate_ack_bitfield(self.remote_sequence),
            channel_id,
        );
        let mut buf = BytesMut::with_capacity(crate::packet::HEADER_SIZE);
        header.to_bytes(&mut buf);
        let bytes = buf.freeze();

        self.claim_slot(sequence);
        self.local_sequence.increment();
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;

        tracing::trace!(channel = %self.name, %sequence, ack = %header.ack_sequence, "sent ack");
        OutgoingPacket { sequence, bytes }
    }

    /// Clear the send slot `sequence` maps to before it is reused
    ///
    /// An entry still waiting there will never be acked now, so it is
    /// reported lost.
    fn claim_slot(&mut self, sequence: SeqNumber) {
        let evicted = match self.sent_packets.occupant(sequence) {
            Some((evicted, entry)) if evicted != sequence => {
                if entry.is_outstanding() {
                    tracing::trace!(channel = %self.name, %evicted, "send window evicted unacked packet");
                    self.stats.packets_lost += 1;
                    self.events
                        .push_back(ControllerEvent::Lost { sequence: evicted });
                }
                evicted
            }
            _ => return,
        };
        self.sent_packets.remove(evicted);
    }

    /// Process a datagram from the peer
    ///
    /// Malformed datagrams are rejected before any state changes. Packets
    /// older than the receive window are dropped silently. Everything else
    /// updates the receive window, acknowledges our packets named in its
    /// header, and queues a `Processed` event.
    pub fn on_packet_received(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        let packet = match Packet::from_bytes(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.packets_invalid += 1;
                tracing::debug!(channel = %self.name, error = %e, "discarding malformed packet");
                return Err(e);
            }
        };
        if packet.payload.len() > self.max_packet_size {
            self.stats.packets_invalid += 1;
            let err = PacketError::PayloadTooLarge {
                size: packet.payload.len(),
                max: self.max_packet_size,
            };
            tracing::debug!(channel = %self.name, error = %err, "discarding oversize packet");
            return Err(err);
        }

        let header = packet.header;
        let sequence = header.sequence;

        if self.received_packets.is_stale(sequence) {
            self.stats.packets_stale += 1;
            tracing::trace!(channel = %self.name, %sequence, "discarding stale packet");
            return Ok(());
        }
        if let Some(fence) = self.reset_fence {
            if fence.contains(sequence) {
                self.stats.packets_stale += 1;
                tracing::trace!(channel = %self.name, %sequence, "discarding pre-reset packet");
                return Ok(());
            }
            if fence.is_passed_by(sequence) {
                tracing::debug!(channel = %self.name, %sequence, "reset fence lifted");
                self.reset_fence = None;
            }
        }

        let duplicate = self.received_packets.exists(sequence);
        if sequence.gt(self.remote_sequence) {
            self.remote_sequence = sequence;
        }
        self.received_packets.insert(
            sequence,
            ReceivedPacket {
                time: self.time,
                size: bytes.len(),
            },
        );

        self.stats.packets_received += 1;
        self.stats.bytes_received += bytes.len() as u64;

        for acked in header.acked_sequences() {
            if let Some(entry) = self.sent_packets.ack(acked) {
                self.rtt.update(self.time.saturating_sub(entry.time));
                self.stats.packets_acked += 1;
                self.events
                    .push_back(ControllerEvent::Acked { sequence: acked });
            }
        }

        if duplicate {
            self.stats.packets_duplicate += 1;
        }
        tracing::trace!(channel = %self.name, %sequence, duplicate, "received packet");

        self.events.push_back(ControllerEvent::Processed {
            sequence,
            duplicate,
            payload: packet.payload,
        });
        Ok(())
    }

    /// Advance the controller clock
    ///
    /// Outstanding packets older than the resend timeout are reported lost,
    /// oldest first, and the packet loss estimate is refreshed.
    pub fn update(&mut self, delta: Duration) {
        self.time += delta;
        let timeout = self.resend_timeout();
        let now = self.time;

        let mut aged = 0u32;
        let mut unacked = 0u32;
        let mut expired = Vec::new();
        for (sequence, entry) in self.sent_packets.iter_recent() {
            if now.saturating_sub(entry.time) < timeout {
                continue;
            }
            aged += 1;
            if !entry.acked {
                unacked += 1;
                if !entry.lost {
                    expired.push(sequence);
                }
            }
        }

        for sequence in expired.into_iter().rev() {
            if let Some(entry) = self.sent_packets.get_mut(sequence) {
                entry.lost = true;
            }
            self.stats.packets_lost += 1;
            tracing::trace!(channel = %self.name, %sequence, ?timeout, "ack timeout");
            self.events.push_back(ControllerEvent::Lost { sequence });
        }

        if aged > 0 {
            let sample = unacked as f32 / aged as f32;
            self.packet_loss += (sample - self.packet_loss) * self.packet_loss_smoothing_factor;
        }
    }

    /// Forget all sequence state, as if freshly created
    ///
    /// Sequences the old receive window covered stay fenced off afterwards,
    /// so a delayed packet from before the reset is never taken for a new
    /// one.
    pub fn reset(&mut self) {
        if !self.received_packets.is_empty() {
            let horizon = self.received_packets.sequence();
            self.reset_fence = Some(ResetFence {
                low: horizon - self.received_packets.capacity(),
                horizon,
            });
        }
        self.time = Duration::ZERO;
        self.local_sequence = SeqNumber::new(0);
        self.remote_sequence = SeqNumber::new(0);
        self.sent_packets.reset();
        self.received_packets.reset();
        self.rtt.reset();
        self.packet_loss = 0.0;
        self.stats = ControllerStats::default();
        self.events.clear();
    }

    /// Take the next queued event
    pub fn poll_event(&mut self) -> Option<ControllerEvent> {
        self.events.pop_front()
    }

    /// Next sequence number to be assigned
    pub fn local_sequence(&self) -> SeqNumber {
        self.local_sequence
    }

    /// Newest sequence number received from the peer
    pub fn remote_sequence(&self) -> SeqNumber {
        self.remote_sequence
    }

    /// Ack bitfield that the next outgoing packet will carry
    pub fn ack_bitfield(&self) -> u32 {
        self.received_packets
            .generate_ack_bitfield(self.remote_sequence)
    }

    /// Controller clock
    pub fn time(&self) -> Duration {
        self.time
    }

    /// Smoothed round-trip time
    pub fn rtt(&self) -> Duration {
        self.rtt.srtt()
    }

    /// Current resend timeout
    pub fn resend_timeout(&self) -> Duration {
        self.rtt
            .clamped_rto(self.min_resend_timeout, self.max_resend_timeout)
    }

    /// Smoothed fraction of packets lost (0.0 to 1.0)
    pub fn packet_loss(&self) -> f32 {
        self.packet_loss
    }

    /// Largest payload a single packet may carry
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn sent_packets(&self) -> &AckWindow<SentPacket> {
        &self.sent_packets
    }

    pub fn received_packets(&self) -> &AckWindow<ReceivedPacket> {
        &self.received_packets
    }
}
