//! rudp - reliable messaging over UDP
//!
//! High-level API: per-channel delivery guarantees (unreliable-unordered,
//! unreliable-ordered, reliable-ordered) multiplexed over one datagram
//! connection.

pub use rudp_io as io;
pub use rudp_protocol as protocol;

// Re-export commonly used types
pub use io::{DatagramSocket, UdpTransceiver};
pub use protocol::{
    BufferedTransceiver, Channel, ChannelConfig, ChannelError, ChannelKind, Connection,
    MessageChannel, PacketTransceiver, SeqNumber,
};
