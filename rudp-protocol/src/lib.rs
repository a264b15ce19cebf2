//! Reliable messaging over datagrams
//!
//! This crate implements the transport-independent core of rudp: wrap-safe
//! sequence numbers, ack windows encoded as bitfields, the per-channel
//! packet controller, and the three message channel variants
//! (unreliable-unordered, unreliable-ordered, reliable-ordered) multiplexed
//! over one connection. Sockets live in `rudp-io`.

pub mod channel;
pub mod config;
pub mod connection;
pub mod controller;
pub mod fragment;
pub mod packet;
pub mod rtt;
pub mod sequence;
pub mod transceiver;
pub mod window;

pub use channel::{
    Channel, ChannelError, ChannelKind, ChannelState, MessageChannel, ReliableOrderedChannel,
    ReliableStats, UnreliableOrderedChannel, UnreliableUnorderedChannel,
};
pub use config::ChannelConfig;
pub use connection::{Connection, ConnectionStats};
pub use controller::{ControllerEvent, ControllerStats, OutgoingPacket, PacketController};
pub use fragment::FragmentHeader;
pub use packet::{Packet, PacketError, PacketHeader};
pub use rtt::RttEstimator;
pub use sequence::SeqNumber;
pub use transceiver::{BufferedTransceiver, PacketTransceiver};
pub use window::AckWindow;
