//! Fire-and-forget channel: every decoded payload is delivered

use super::{ChannelCore, ChannelError, ChannelKind, ChannelState, MessageChannel};
use crate::config::ChannelConfig;
use crate::controller::{ControllerEvent, PacketController};
use crate::transceiver::PacketTransceiver;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;

/// Unreliable, unordered channel
///
/// Messages go out in one packet each and are never resent. Duplicates and
/// reordered packets reach the application as they arrive.
pub struct UnreliableUnorderedChannel {
    core: ChannelCore,
}

impl UnreliableUnorderedChannel {
    pub fn new(channel_id: u8, config: ChannelConfig) -> Self {
        UnreliableUnorderedChannel {
            core: ChannelCore::new(channel_id, config),
        }
    }

    /// Discard ack and loss events; nothing here is resent
    fn discard_events(&mut self) {
        while let Some(event) = self.core.controller.poll_event() {
            if let ControllerEvent::Lost { sequence } = event {
                tracing::trace!(channel = %self.core.config.name, %sequence, "unreliable packet lost");
            }
        }
    }
}

impl MessageChannel for UnreliableUnorderedChannel {
    fn channel_id(&self) -> u8 {
        self.core.channel_id
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::UnreliableUnordered
    }

    fn state(&self) -> ChannelState {
        self.core.state
    }

    fn open(&mut self) {
        self.core.open();
    }

    fn send_message(
        &mut self,
        message: Bytes,
        transceiver: &mut dyn PacketTransceiver,
    ) -> Result<(), ChannelError> {
        self.core.ensure_active()?;
        self.core.transmit(&message, transceiver)?;
        self.discard_events();
        Ok(())
    }

    fn on_message_received(
        &mut self,
        from: SocketAddr,
        datagram: &[u8],
        transceiver: &mut dyn PacketTransceiver,
    ) {
        if !self.core.accept(datagram) {
            return;
        }
        while let Some(event) = self.core.controller.poll_event() {
            if let ControllerEvent::Processed { payload, .. } = event {
                transceiver.receive_packet(from, payload);
            }
        }
    }

    fn update(&mut self, delta: Duration, _transceiver: &mut dyn PacketTransceiver) {
        self.core.controller.update(delta);
        self.discard_events();
    }

    fn reset(&mut self) {
        self.core.reset();
    }

    fn controller(&self) -> &PacketController {
        &self.core.controller
    }
}
