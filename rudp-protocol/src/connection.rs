//! Channel multiplexing for one peer
//!
//! A connection owns a fixed set of channels, numbered by their position,
//! and routes inbound datagrams to them by the channel id in the packet
//! header. There is no handshake: both peers are expected to create the
//! same channel list.

use crate::channel::{Channel, ChannelError, ChannelKind, ChannelState, MessageChannel, ReliableStats};
use crate::config::ChannelConfig;
use crate::controller::ControllerStats;
use crate::packet::peek_channel_id;
use crate::transceiver::PacketTransceiver;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;

/// Most channels one connection can carry (channel ids are a `u8`)
pub const MAX_CHANNELS: usize = u8::MAX as usize + 1;

/// Connection statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Packet counters summed over every channel
    pub packets: ControllerStats,
    /// Reliable delivery counters summed over the reliable channels
    pub reliable: ReliableStats,
    /// Datagrams naming a channel id we do not have
    pub unknown_channel: u64,
    /// Datagrams too short to carry a header
    pub invalid: u64,
    /// Datagrams from an address other than the peer
    pub foreign: u64,
    /// Largest smoothed RTT over the channels that measured one
    pub rtt: Duration,
    /// Largest smoothed packet loss over the channels
    pub packet_loss: f32,
}

/// A fixed set of channels to one peer
pub struct Connection {
    remote_addr: SocketAddr,
    channels: Vec<Channel>,
    unknown_channel: u64,
    invalid: u64,
    foreign: u64,
}

impl Connection {
    /// Create a connection with one channel per entry, in id order
    pub fn new(
        remote_addr: SocketAddr,
        channels: impl IntoIterator<Item = (ChannelKind, ChannelConfig)>,
    ) -> Result<Self, ChannelError> {
        let channels: Vec<_> = channels.into_iter().collect();
        if channels.len() > MAX_CHANNELS {
            return Err(ChannelError::TooManyChannels(channels.len()));
        }

        let channels = channels
            .into_iter()
            .enumerate()
            .map(|(id, (kind, config))| Channel::new(kind, id as u8, config))
            .collect();

        Ok(Connection {
            remote_addr,
            channels,
            unknown_channel: 0,
            invalid: 0,
            foreign: 0,
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Open every channel
    pub fn open(&mut self) {
        for channel in &mut self.channels {
            channel.open();
        }
        tracing::info!(remote = %self.remote_addr, channels = self.channels.len(), "connection open");
    }

    /// True once every channel is active
    pub fn is_open(&self) -> bool {
        !self.channels.is_empty()
            && self
                .channels
                .iter()
                .all(|channel| channel.state() == ChannelState::Active)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, channel_id: u8) -> Option<&Channel> {
        self.channels.get(channel_id as usize)
    }

    pub fn channel_mut(&mut self, channel_id: u8) -> Option<&mut Channel> {
        self.channels.get_mut(channel_id as usize)
    }

    /// Send a message on one channel
    pub fn send(
        &mut self,
        channel_id: u8,
        message: Bytes,
        transceiver: &mut dyn PacketTransceiver,
    ) -> Result<(), ChannelError> {
        self.channel_mut(channel_id)
            .ok_or(ChannelError::UnknownChannel(channel_id))?
            .send_message(message, transceiver)
    }

    /// Route an inbound datagram to its channel
    pub fn on_datagram(
        &mut self,
        from: SocketAddr,
        datagram: &[u8],
        transceiver: &mut dyn PacketTransceiver,
    ) {
        if from != self.remote_addr {
            self.foreign += 1;
            tracing::debug!(%from, remote = %self.remote_addr, "dropping datagram from unknown address");
            return;
        }

        let channel_id = match peek_channel_id(datagram) {
            Ok(id) => id,
            Err(e) => {
                self.invalid += 1;
                tracing::debug!(%from, error = %e, "dropping malformed datagram");
                return;
            }
        };

        match self.channels.get_mut(channel_id as usize) {
            Some(channel) => channel.on_message_received(from, datagram, transceiver),
            None => {
                self.unknown_channel += 1;
                tracing::debug!(%from, channel_id, "dropping datagram for unknown channel");
            }
        }
    }

    /// Advance every channel's clock
    pub fn update(&mut self, delta: Duration, transceiver: &mut dyn PacketTransceiver) {
        for channel in &mut self.channels {
            channel.update(delta, transceiver);
        }
    }

    /// Reset every channel to `Idle` and clear the connection counters
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
        self.unknown_channel = 0;
        self.invalid = 0;
        self.foreign = 0;
        tracing::info!(remote = %self.remote_addr, "connection reset");
    }

    /// Statistics aggregated over every channel
    pub fn stats(&self) -> ConnectionStats {
        let mut stats = ConnectionStats {
            unknown_channel: self.unknown_channel,
            invalid: self.invalid,
            foreign: self.foreign,
            ..ConnectionStats::default()
        };

        for channel in &self.channels {
            let controller = channel.controller();
            stats.packets.accumulate(controller.stats());
            if let Some(reliable) = channel.reliable_stats() {
                stats.reliable.accumulate(reliable);
            }
            if controller.stats().packets_acked > 0 {
                stats.rtt = stats.rtt.max(controller.rtt());
            }
            stats.packet_loss = stats.packet_loss.max(controller.packet_loss());
        }

        stats
    }
}
