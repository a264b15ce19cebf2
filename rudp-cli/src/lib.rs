//! rudp CLI Library
//!
//! Shared functionality for rudp command-line tools.

pub mod config;
pub mod link;
pub mod stats;

pub use config::{ChannelEntry, Config, ConfigError, KindConfig, PeerConfig, SoakConfig};
pub use link::{LinkProfile, LossyLink};
pub use stats::{display_connection_stats, display_compact_stats, format_bytes, format_rtt};
