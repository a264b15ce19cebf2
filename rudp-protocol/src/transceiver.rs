//! Boundary between the channels and the datagram transport
//!
//! Channels never touch sockets. Outbound packets are handed to a
//! [`PacketTransceiver`], and messages that clear a channel's delivery
//! policy are handed back to it for the application.

use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;

/// Datagram transport as seen by a channel
pub trait PacketTransceiver {
    /// Hand an encoded packet to the transport
    ///
    /// Must not block. The transport may drop the packet silently.
    fn send_packet(&mut self, packet: Bytes);

    /// Deliver a message that cleared a channel's ordering policy
    fn receive_packet(&mut self, from: SocketAddr, message: Bytes);
}

/// In-memory transceiver that queues traffic in both directions
///
/// Used by simulations and tests: outbound packets are collected for the
/// caller to route (or drop), delivered messages are collected for the
/// application to read.
#[derive(Debug, Default)]
pub struct BufferedTransceiver {
    outbound: VecDeque<Bytes>,
    delivered: VecDeque<(SocketAddr, Bytes)>,
}

impl BufferedTransceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest outbound packet
    pub fn pop_outbound(&mut self) -> Option<Bytes> {
        self.outbound.pop_front()
    }

    /// Take every outbound packet, oldest first
    pub fn drain_outbound(&mut self) -> Vec<Bytes> {
        self.outbound.drain(..).collect()
    }

    /// Take the oldest delivered message
    pub fn pop_delivered(&mut self) -> Option<(SocketAddr, Bytes)> {
        self.delivered.pop_front()
    }

    /// Take every delivered message payload, oldest first
    pub fn drain_delivered(&mut self) -> Vec<Bytes> {
        self.delivered.drain(..).map(|(_, message)| message).collect()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn delivered_len(&self) -> usize {
        self.delivered.len()
    }
}

impl PacketTransceiver for BufferedTransceiver {
    fn send_packet(&mut self, packet: Bytes) {
        self.outbound.push_back(packet);
    }

    fn receive_packet(&mut self, from: SocketAddr, message: Bytes) {
        self.delivered.push_back((from, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_transceiver() {
        let mut tx = BufferedTransceiver::new();
        tx.send_packet(Bytes::from_static(b"a"));
        tx.send_packet(Bytes::from_static(b"b"));
        tx.receive_packet("127.0.0.1:9000".parse().unwrap(), Bytes::from_static(b"m"));

        assert_eq!(tx.outbound_len(), 2);
        assert_eq!(tx.pop_outbound().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(tx.drain_outbound(), vec![Bytes::from_static(b"b")]);
        assert_eq!(tx.drain_delivered(), vec![Bytes::from_static(b"m")]);
        assert_eq!(tx.delivered_len(), 0);
    }
}
