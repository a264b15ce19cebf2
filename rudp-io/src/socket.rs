//! UDP socket wrapper and socket-backed transceiver
//!
//! The socket is configured through `socket2` (address reuse, buffer sizes,
//! blocking mode) and then used as a plain `std` UDP socket.

use bytes::Bytes;
use rudp_protocol::PacketTransceiver;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,
}

impl SocketError {
    /// The operation would have blocked (or timed out) on a non-ready socket
    pub fn is_would_block(&self) -> bool {
        matches!(self, SocketError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
    }
}

/// UDP socket carrying rudp datagrams
#[derive(Debug)]
pub struct DatagramSocket {
    inner: UdpSocket,
}

impl DatagramSocket {
    /// Create a non-blocking socket bound to the given address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        tracing::debug!(%addr, "bound datagram socket");
        Ok(DatagramSocket {
            inner: socket.into(),
        })
    }

    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_send_buffer_size(size)?;
        Ok(())
    }

    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        SockRef::from(&self.inner).set_recv_buffer_size(size)?;
        Ok(())
    }

    pub fn send_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(SockRef::from(&self.inner).send_buffer_size()?)
    }

    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(SockRef::from(&self.inner).recv_buffer_size()?)
    }

    /// Switch between non-blocking and blocking mode
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), SocketError> {
        self.inner.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// Bound blocking reads (`None` blocks forever)
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SocketError> {
        self.inner.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }

    /// Send one datagram
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    /// Receive one datagram
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        Ok(self.inner.recv_from(buf)?)
    }

    /// Receive one datagram if one is ready
    ///
    /// Returns `Ok(None)` instead of a would-block error.
    pub fn try_recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        match self.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.is_would_block() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Try to clone the socket
    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(DatagramSocket {
            inner: self.inner.try_clone()?,
        })
    }
}

/// Transceiver counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransceiverStats {
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    /// Datagrams the socket refused (dropped, as the transport may)
    pub send_failures: u64,
    pub messages_delivered: u64,
}

/// [`PacketTransceiver`] that writes packets to one remote address
///
/// Outbound packets go straight to the socket; a send that would block or
/// fails is logged and dropped. Delivered messages are queued for the
/// application.
pub struct UdpTransceiver {
    socket: Arc<DatagramSocket>,
    remote_addr: SocketAddr,
    delivered: VecDeque<(SocketAddr, Bytes)>,
    stats: TransceiverStats,
}

impl UdpTransceiver {
    pub fn new(socket: Arc<DatagramSocket>, remote_addr: SocketAddr) -> Self {
        UdpTransceiver {
            socket,
            remote_addr,
            delivered: VecDeque::new(),
            stats: TransceiverStats::default(),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn socket(&self) -> &Arc<DatagramSocket> {
        &self.socket
    }

    /// Take the oldest delivered message
    pub fn pop_delivered(&mut self) -> Option<(SocketAddr, Bytes)> {
        self.delivered.pop_front()
    }

    pub fn stats(&self) -> &TransceiverStats {
        &self.stats
    }
}

impl PacketTransceiver for UdpTransceiver {
    fn send_packet(&mut self, packet: Bytes) {
        match self.socket.send_to(&packet, self.remote_addr) {
            Ok(n) => {
                self.stats.datagrams_sent += 1;
                self.stats.bytes_sent += n as u64;
            }
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::warn!(remote = %self.remote_addr, error = %e, "dropping outbound datagram");
            }
        }
    }

    fn receive_packet(&mut self, from: SocketAddr, message: Bytes) {
        self.stats.messages_delivered += 1;
        self.delivered.push_back((from, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_socket_creation() {
        let socket = DatagramSocket::bind(localhost()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.port() > 0);
    }

    #[test]
    fn test_socket_buffer_sizes() {
        let socket = DatagramSocket::bind(localhost()).unwrap();
        socket.set_send_buffer_size(262144).unwrap();
        socket.set_recv_buffer_size(262144).unwrap();

        // The OS may round these
        assert!(socket.send_buffer_size().unwrap() > 0);
        assert!(socket.recv_buffer_size().unwrap() > 0);
    }

    #[test]
    fn test_try_recv_when_empty() {
        let socket = DatagramSocket::bind(localhost()).unwrap();
        let mut buf = [0u8; 64];
        assert!(socket.try_recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_transceiver_sends_to_remote() {
        let sender = Arc::new(DatagramSocket::bind(localhost()).unwrap());
        let receiver = DatagramSocket::bind(localhost()).unwrap();
        let mut transceiver = UdpTransceiver::new(sender, receiver.local_addr().unwrap());

        transceiver.send_packet(Bytes::from_static(b"datagram"));
        assert_eq!(transceiver.stats().datagrams_sent, 1);

        let mut buf = [0u8; 64];
        for _ in 0..50 {
            if let Some((n, _)) = receiver.try_recv_from(&mut buf).unwrap() {
                assert_eq!(&buf[..n], b"datagram");
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("Failed to receive datagram");
    }

    #[test]
    fn test_transceiver_queues_deliveries() {
        let socket = Arc::new(DatagramSocket::bind(localhost()).unwrap());
        let remote = socket.local_addr().unwrap();
        let mut transceiver = UdpTransceiver::new(socket, remote);

        transceiver.receive_packet(remote, Bytes::from_static(b"hello"));
        assert_eq!(
            transceiver.pop_delivered(),
            Some((remote, Bytes::from_static(b"hello")))
        );
        assert!(transceiver.pop_delivered().is_none());
    }
}
