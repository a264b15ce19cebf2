//! Message channels
//!
//! A channel owns one [`PacketController`] and applies a delivery policy on
//! top of it. Three variants exist:
//!
//! - [`UnreliableUnorderedChannel`]: every decoded payload is delivered,
//!   duplicates included.
//! - [`UnreliableOrderedChannel`]: payloads older than the newest delivered
//!   one are dropped.
//! - [`ReliableOrderedChannel`]: messages are fragmented, resent until acked,
//!   deduplicated and delivered in send order.
//!
//! Channels are `Idle` until opened. Sending on an idle channel fails, and
//! datagrams arriving for an idle channel are dropped.

mod reliable_ordered;
mod unreliable_ordered;
mod unreliable_unordered;

pub use reliable_ordered::{ReliableOrderedChannel, ReliableStats};
pub use unreliable_ordered::UnreliableOrderedChannel;
pub use unreliable_unordered::UnreliableUnorderedChannel;

use crate::config::ChannelConfig;
use crate::controller::PacketController;
use crate::packet::PacketError;
use crate::sequence::SeqNumber;
use crate::transceiver::PacketTransceiver;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Created or reset, not yet carrying traffic
    #[default]
    Idle,
    /// Opened, sending and receiving
    Active,
}

/// Delivery policy of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    UnreliableUnordered,
    UnreliableOrdered,
    ReliableOrdered,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::UnreliableUnordered => "unreliable-unordered",
            ChannelKind::UnreliableOrdered => "unreliable-ordered",
            ChannelKind::ReliableOrdered => "reliable-ordered",
        };
        f.write_str(name)
    }
}

impl FromStr for ChannelKind {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unreliable-unordered" | "unreliable" => Ok(ChannelKind::UnreliableUnordered),
            "unreliable-ordered" | "sequenced" => Ok(ChannelKind::UnreliableOrdered),
            "reliable-ordered" | "reliable" => Ok(ChannelKind::ReliableOrdered),
            other => Err(ChannelError::UnknownKind(other.to_string())),
        }
    }
}

/// Channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel {0} is not active")]
    NotActive(u8),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Send queue full: {0} messages pending")]
    QueueFull(usize),

    #[error("No channel with id {0}")]
    UnknownChannel(u8),

    #[error("Too many channels: {0} (channel ids are 8 bits)")]
    TooManyChannels(usize),

    #[error("Unknown channel kind: {0}")]
    UnknownKind(String),
}

/// Common interface of the channel variants
pub trait MessageChannel {
    /// Id carried in the header of every packet this channel sends
    fn channel_id(&self) -> u8;

    fn kind(&self) -> ChannelKind;

    fn state(&self) -> ChannelState;

    /// Move the channel to `Active`
    fn open(&mut self);

    /// Send an application message
    fn send_message(
        &mut self,
        message: Bytes,
        transceiver: &mut dyn PacketTransceiver,
    ) -> Result<(), ChannelError>;

    /// Feed a datagram addressed to this channel
    ///
    /// Messages that clear the delivery policy are handed to
    /// `transceiver.receive_packet`.
    fn on_message_received(
        &mut self,
        from: SocketAddr,
        datagram: &[u8],
        transceiver: &mut dyn PacketTransceiver,
    );

    /// Advance the channel clock by `delta`
    fn update(&mut self, delta: Duration, transceiver: &mut dyn PacketTransceiver);

    /// Drop all sequence and delivery state and return to `Idle`
    fn reset(&mut self);

    fn controller(&self) -> &PacketController;
}

/// State every variant carries
pub(crate) struct ChannelCore {
    pub(crate) channel_id: u8,
    pub(crate) state: ChannelState,
    pub(crate) config: ChannelConfig,
    pub(crate) controller: PacketController,
}

impl ChannelCore {
    pub(crate) fn new(channel_id: u8, config: ChannelConfig) -> Self {
        ChannelCore {
            channel_id,
            state: ChannelState::Idle,
            controller: PacketController::new(&config),
            config,
        }
    }

    pub(crate) fn open(&mut self) {
        if self.state != ChannelState::Active {
            tracing::debug!(channel = %self.config.name, id = self.channel_id, "channel opened");
        }
        self.state = ChannelState::Active;
    }

    pub(crate) fn reset(&mut self) {
        self.controller.reset();
        self.state = ChannelState::Idle;
    }

    pub(crate) fn ensure_active(&self) -> Result<(), ChannelError> {
        match self.state {
            ChannelState::Active => Ok(()),
            ChannelState::Idle => Err(ChannelError::NotActive(self.channel_id)),
        }
    }

    /// Stamp `payload` and hand it to the transceiver
    pub(crate) fn transmit(
        &mut self,
        payload: &[u8],
        transceiver: &mut dyn PacketTransceiver,
    ) -> Result<SeqNumber, ChannelError> {
        let packet = self.controller.send_packet(self.channel_id, payload)?;
        transceiver.send_packet(packet.bytes);
        Ok(packet.sequence)
    }

    /// Run a datagram through the controller
    ///
    /// Returns false when the datagram was dropped before reaching it.
    pub(crate) fn accept(&mut self, datagram: &[u8]) -> bool {
        if self.state != ChannelState::Active {
            tracing::trace!(channel = %self.config.name, "dropping datagram for idle channel");
            return false;
        }
        self.controller.on_packet_received(datagram).is_ok()
    }
}

/// A channel of any kind
pub enum Channel {
    UnreliableUnordered(UnreliableUnorderedChannel),
    UnreliableOrdered(UnreliableOrderedChannel),
    ReliableOrdered(ReliableOrderedChannel),
}

impl Channel {
    /// Create an idle channel of the given kind
    pub fn new(kind: ChannelKind, channel_id: u8, config: ChannelConfig) -> Self {
        match kind {
            ChannelKind::UnreliableUnordered => {
                Channel::UnreliableUnordered(UnreliableUnorderedChannel::new(channel_id, config))
            }
            ChannelKind::UnreliableOrdered => {
                Channel::UnreliableOrdered(UnreliableOrderedChannel::new(channel_id, config))
            }
            ChannelKind::ReliableOrdered => {
                Channel::ReliableOrdered(ReliableOrderedChannel::new(channel_id, config))
            }
        }
    }

    /// Reliable delivery counters, for reliable channels
    pub fn reliable_stats(&self) -> Option<&ReliableStats> {
        match self {
            Channel::ReliableOrdered(channel) => Some(channel.stats()),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn MessageChannel {
        match self {
            Channel::UnreliableUnordered(channel) => channel,
            Channel::UnreliableOrdered(channel) => channel,
            Channel::ReliableOrdered(channel) => channel,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn MessageChannel {
        match self {
            Channel::UnreliableUnordered(channel) => channel,
            Channel::UnreliableOrdered(channel) => channel,
            Channel::ReliableOrdered(channel) => channel,
        }
    }
}

impl MessageChannel for Channel {
    fn channel_id(&self) -> u8 {
        self.inner().channel_id()
    }

    fn kind(&self) -> ChannelKind {
        self.inner().kind()
    }

    fn state(&self) -> ChannelState {
        self.inner().state()
    }

    fn open(&mut self) {
        self.inner_mut().open()
    }

    fn send_message(
        &mut self,
        message: Bytes,
        transceiver: &mut dyn PacketTransceiver,
    ) -> Result<(), ChannelError> {
        self.inner_mut().send_message(message, transceiver)
    }

    fn on_message_received(
        &mut self,
        from: SocketAddr,
        datagram: &[u8],
        transceiver: &mut dyn PacketTransceiver,
    ) {
        self.inner_mut()
            .on_message_received(from, datagram, transceiver)
    }

    fn update(&mut self, delta: Duration, transceiver: &mut dyn PacketTransceiver) {
        self.inner_mut().update(delta, transceiver)
    }

    fn reset(&mut self) {
        self.inner_mut().reset()
    }

    fn controller(&self) -> &PacketController {
        self.inner().controller()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transceiver::BufferedTransceiver;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "reliable".parse::<ChannelKind>().unwrap(),
            ChannelKind::ReliableOrdered
        );
        assert_eq!(
            ChannelKind::UnreliableOrdered.to_string().parse::<ChannelKind>().unwrap(),
            ChannelKind::UnreliableOrdered
        );
        assert!(matches!(
            "bogus".parse::<ChannelKind>(),
            Err(ChannelError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_idle_channel_rejects_send() {
        for kind in [
            ChannelKind::UnreliableUnordered,
            ChannelKind::UnreliableOrdered,
            ChannelKind::ReliableOrdered,
        ] {
            let mut channel = Channel::new(kind, 3, ChannelConfig::named("idle"));
            let mut tx = BufferedTransceiver::new();

            assert_eq!(channel.state(), ChannelState::Idle);
            assert!(matches!(
                channel.send_message(Bytes::from_static(b"x"), &mut tx),
                Err(ChannelError::NotActive(3))
            ));
            assert_eq!(tx.outbound_len(), 0);

            channel.open();
            assert_eq!(channel.state(), ChannelState::Active);
            assert_eq!(channel.kind(), kind);
            channel.send_message(Bytes::from_static(b"x"), &mut tx).unwrap();
            assert_eq!(tx.outbound_len(), 1);

            channel.reset();
            assert_eq!(channel.state(), ChannelState::Idle);
        }
    }

    #[test]
    fn test_idle_channel_drops_inbound() {
        let mut sender = Channel::new(ChannelKind::UnreliableUnordered, 0, ChannelConfig::default());
        let mut receiver = Channel::new(ChannelKind::UnreliableUnordered, 0, ChannelConfig::default());
        let mut tx = BufferedTransceiver::new();
        let from: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        sender.open();
        sender.send_message(Bytes::from_static(b"hi"), &mut tx).unwrap();
        let packet = tx.pop_outbound().unwrap();

        receiver.on_message_received(from, &packet, &mut tx);
        assert_eq!(tx.delivered_len(), 0);
        assert_eq!(receiver.controller().stats().packets_received, 0);
    }
}
