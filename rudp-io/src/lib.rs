//! rudp I/O
//!
//! UDP socket wrapper and the socket-backed [`PacketTransceiver`], plus the
//! clock helpers that turn wall time into `update` deltas.
//!
//! [`PacketTransceiver`]: rudp_protocol::PacketTransceiver

pub mod socket;
pub mod time;

pub use socket::{DatagramSocket, SocketError, TransceiverStats, UdpTransceiver};
pub use time::{DeltaClock, Timer};
