//! Configuration file support for rudp CLI tools

use rudp_protocol::{ChannelConfig, ChannelKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Delivery policy as written in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KindConfig {
    UnreliableUnordered,
    UnreliableOrdered,
    ReliableOrdered,
}

impl From<KindConfig> for ChannelKind {
    fn from(kind: KindConfig) -> Self {
        match kind {
            KindConfig::UnreliableUnordered => ChannelKind::UnreliableUnordered,
            KindConfig::UnreliableOrdered => ChannelKind::UnreliableOrdered,
            KindConfig::ReliableOrdered => ChannelKind::ReliableOrdered,
        }
    }
}

/// One channel of a connection
///
/// Unset tunables take the library defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Channel name (used in logs)
    pub name: String,
    /// Delivery policy
    pub kind: KindConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_packet_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_packets_window: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_packets_window: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_resend_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_resend_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reorder_stall_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fragments: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pending_messages: Option<usize>,
}

impl ChannelEntry {
    /// Entry with every tunable left at its default
    pub fn new(name: impl Into<String>, kind: KindConfig) -> Self {
        ChannelEntry {
            name: name.into(),
            kind,
            max_packet_size: None,
            sent_packets_window: None,
            received_packets_window: None,
            min_resend_timeout_ms: None,
            max_resend_timeout_ms: None,
            reorder_stall_timeout_ms: None,
            max_fragments: None,
            max_in_flight: None,
            max_pending_messages: None,
        }
    }

    /// Build and validate the channel configuration
    pub fn channel_config(&self) -> Result<ChannelConfig, ConfigError> {
        let defaults = ChannelConfig::named(self.name.clone());
        let millis = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };

        let config = ChannelConfig {
            max_packet_size: self.max_packet_size.unwrap_or(defaults.max_packet_size),
            sent_packets_window: self
                .sent_packets_window
                .unwrap_or(defaults.sent_packets_window),
            received_packets_window: self
                .received_packets_window
                .unwrap_or(defaults.received_packets_window),
            min_resend_timeout: millis(self.min_resend_timeout_ms, defaults.min_resend_timeout),
            max_resend_timeout: millis(self.max_resend_timeout_ms, defaults.max_resend_timeout),
            reorder_stall_timeout: millis(
                self.reorder_stall_timeout_ms,
                defaults.reorder_stall_timeout,
            ),
            max_fragments: self.max_fragments.unwrap_or(defaults.max_fragments),
            max_in_flight: self.max_in_flight.unwrap_or(defaults.max_in_flight),
            max_pending_messages: self
                .max_pending_messages
                .unwrap_or(defaults.max_pending_messages),
            ..defaults
        };

        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &ChannelConfig) -> Result<(), ConfigError> {
    let invalid = |reason: String| {
        Err(ConfigError::Invalid(format!(
            "channel '{}': {}",
            config.name, reason
        )))
    };

    for window in [config.sent_packets_window, config.received_packets_window] {
        if window == 0 || window > 0x8000 {
            return invalid(format!("window capacity {} not in 1..=32768", window));
        }
    }
    if config.max_packet_size <= rudp_protocol::fragment::FRAGMENT_HEADER_SIZE {
        return invalid(format!("max_packet_size {} too small", config.max_packet_size));
    }
    if config.min_resend_timeout > config.max_resend_timeout {
        return invalid("min_resend_timeout exceeds max_resend_timeout".to_string());
    }
    if config.max_fragments == 0 {
        return invalid("max_fragments must be at least 1".to_string());
    }
    if config.max_in_flight == 0 || config.max_in_flight >= config.sent_packets_window as usize {
        return invalid(format!(
            "max_in_flight {} must be in 1..{}",
            config.max_in_flight, config.sent_packets_window
        ));
    }
    Ok(())
}

fn default_channels() -> Vec<ChannelEntry> {
    vec![
        ChannelEntry::new("events", KindConfig::UnreliableUnordered),
        ChannelEntry::new("state", KindConfig::UnreliableOrdered),
        ChannelEntry::new("chat", KindConfig::ReliableOrdered),
    ]
}

/// Peer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Local bind address
    pub bind: SocketAddr,
    /// Remote peer address
    pub remote: SocketAddr,
    /// Channel used for stdin lines
    #[serde(default = "default_send_channel")]
    pub send_channel: u8,
    /// Update tick in milliseconds
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u64,
    /// Statistics interval in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    /// Channels, in id order; both peers must agree
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelEntry>,
}

fn default_send_channel() -> u8 {
    2
}

fn default_update_interval() -> u64 {
    10
}

fn default_stats_interval() -> u64 {
    5
}

impl PeerConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.max(1))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Channel kinds and configurations, validated
    pub fn channel_configs(&self) -> Result<Vec<(ChannelKind, ChannelConfig)>, ConfigError> {
        channel_list(&self.channels)
    }
}

/// Soak test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoakConfig {
    /// Messages to send
    #[serde(default = "default_messages")]
    pub messages: u64,
    /// Bytes per message
    #[serde(default = "default_message_size")]
    pub message_size: usize,
    /// Messages sent per tick
    #[serde(default = "default_burst")]
    pub burst: u64,
    /// Simulated tick in milliseconds
    #[serde(default = "default_update_interval")]
    pub tick_ms: u64,
    /// Ticks to keep running after the last send
    #[serde(default = "default_drain_ticks")]
    pub drain_ticks: u64,
    /// Drop every Nth datagram (0 = never)
    #[serde(default)]
    pub drop_every: u64,
    /// Duplicate every Nth datagram (0 = never)
    #[serde(default)]
    pub duplicate_every: u64,
    /// Swap every Nth datagram with the next one (0 = never)
    #[serde(default)]
    pub swap_every: u64,
    /// Channel under test
    pub channel: ChannelEntry,
}

fn default_messages() -> u64 {
    1000
}

fn default_message_size() -> usize {
    256
}

fn default_burst() -> u64 {
    4
}

fn default_drain_ticks() -> u64 {
    500
}

impl SoakConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Combined configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soak: Option<SoakConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Example peer configuration
    pub fn example_peer() -> Self {
        Config {
            peer: Some(PeerConfig {
                bind: SocketAddr::from(([0, 0, 0, 0], 9000)),
                remote: SocketAddr::from(([127, 0, 0, 1], 9001)),
                send_channel: default_send_channel(),
                update_interval_ms: default_update_interval(),
                stats_interval_secs: default_stats_interval(),
                channels: default_channels(),
            }),
            soak: None,
        }
    }

    /// Example soak configuration
    pub fn example_soak() -> Self {
        Config {
            peer: None,
            soak: Some(SoakConfig {
                messages: default_messages(),
                message_size: 3000,
                burst: default_burst(),
                tick_ms: default_update_interval(),
                drain_ticks: default_drain_ticks(),
                drop_every: 5,
                duplicate_every: 7,
                swap_every: 3,
                channel: ChannelEntry::new("soak", KindConfig::ReliableOrdered),
            }),
        }
    }
}

fn channel_list(entries: &[ChannelEntry]) -> Result<Vec<(ChannelKind, ChannelConfig)>, ConfigError> {
    if entries.is_empty() {
        return Err(ConfigError::Invalid("at least one channel is required".to_string()));
    }
    entries
        .iter()
        .map(|entry| Ok((entry.kind.into(), entry.channel_config()?)))
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_configs() {
        let peer = Config::example_peer().peer.unwrap();
        let channels = peer.channel_configs().unwrap();
        assert_eq!(channels.len(), 3);
        assert_eq!(channels[2].0, ChannelKind::ReliableOrdered);

        let soak = Config::example_soak().soak.unwrap();
        assert!(soak.channel.channel_config().is_ok());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = Config::example_peer();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        let peer = parsed.peer.unwrap();
        assert_eq!(peer.channels.len(), 3);
        assert_eq!(peer.channels[1].kind, KindConfig::UnreliableOrdered);
    }

    #[test]
    fn test_minimal_peer_file() {
        let parsed: Config = toml::from_str(
            r#"
            [peer]
            bind = "0.0.0.0:9000"
            remote = "127.0.0.1:9001"

            [[peer.channels]]
            name = "chat"
            kind = "reliable-ordered"
            min_resend_timeout_ms = 50
            "#,
        )
        .unwrap();

        let peer = parsed.peer.unwrap();
        assert_eq!(peer.update_interval(), Duration::from_millis(10));
        let channels = peer.channel_configs().unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].1.min_resend_timeout, Duration::from_millis(50));
        assert_eq!(channels[0].1.name, "chat");
    }

    #[test]
    fn test_invalid_tunables_rejected() {
        let mut entry = ChannelEntry::new("bad", KindConfig::ReliableOrdered);
        entry.max_in_flight = Some(256);
        assert!(matches!(entry.channel_config(), Err(ConfigError::Invalid(_))));

        let mut entry = ChannelEntry::new("bad", KindConfig::UnreliableOrdered);
        entry.min_resend_timeout_ms = Some(5000);
        entry.max_resend_timeout_ms = Some(100);
        assert!(entry.channel_config().is_err());

        let mut entry = ChannelEntry::new("bad", KindConfig::UnreliableUnordered);
        entry.sent_packets_window = Some(0);
        assert!(entry.channel_config().is_err());
    }
}
