//! Per-channel tunables

use crate::fragment::FRAGMENT_HEADER_SIZE;
use crate::packet::MAX_PAYLOAD_SIZE;
use std::time::Duration;

/// Channel configuration
///
/// The resend timeout is the controller's RTO (SRTT + 4 * RTTVAR) clamped to
/// `[min_resend_timeout, max_resend_timeout]`. The reorder stall bound is how
/// long the reliable channel holds complete messages behind a gap before
/// delivering them out of order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Human readable channel name (used in logs)
    pub name: String,
    /// Largest payload a single packet may carry
    pub max_packet_size: usize,
    /// Capacity of the send-side ack window
    pub sent_packets_window: u16,
    /// Capacity of the receive-side ack window
    pub received_packets_window: u16,
    /// Lower bound for the resend timeout
    pub min_resend_timeout: Duration,
    /// Upper bound for the resend timeout
    pub max_resend_timeout: Duration,
    /// Smoothing factor for the packet loss estimate
    pub packet_loss_smoothing_factor: f32,
    /// How long complete messages may wait behind a gap
    pub reorder_stall_timeout: Duration,
    /// Maximum fragments per reliable message
    pub max_fragments: u8,
    /// Maximum reliable fragments awaiting acknowledgment
    pub max_in_flight: usize,
    /// Maximum reliable messages queued or awaiting acknowledgment
    pub max_pending_messages: usize,
}

impl ChannelConfig {
    /// Configuration with defaults and a name
    pub fn named(name: impl Into<String>) -> Self {
        ChannelConfig {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Payload bytes carried by one reliable fragment
    pub fn fragment_size(&self) -> usize {
        self.max_packet_size.saturating_sub(FRAGMENT_HEADER_SIZE)
    }

    /// Largest message the reliable channel accepts
    pub fn max_message_size(&self) -> usize {
        self.fragment_size() * self.max_fragments as usize
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            name: "channel".to_string(),
            max_packet_size: MAX_PAYLOAD_SIZE,
            sent_packets_window: 256,
            received_packets_window: 256,
            min_resend_timeout: Duration::from_millis(100),
            max_resend_timeout: Duration::from_secs(2),
            packet_loss_smoothing_factor: 0.1,
            reorder_stall_timeout: Duration::from_secs(1),
            max_fragments: 16,
            max_in_flight: 128,
            max_pending_messages: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::named("state");
        assert_eq!(config.name, "state");
        assert!(config.max_in_flight < config.sent_packets_window as usize);
        assert_eq!(config.fragment_size(), MAX_PAYLOAD_SIZE - FRAGMENT_HEADER_SIZE);
        assert_eq!(config.max_message_size(), config.fragment_size() * 16);
    }
}
