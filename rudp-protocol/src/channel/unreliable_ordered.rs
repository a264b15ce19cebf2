//! Sequenced channel: late packets are dropped

use super::{ChannelCore, ChannelError, ChannelKind, ChannelState, MessageChannel};
use crate::config::ChannelConfig;
use crate::controller::{ControllerEvent, PacketController};
use crate::sequence::SeqNumber;
use crate::transceiver::PacketTransceiver;
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;

/// Unreliable, ordered channel
///
/// A payload is delivered only when its sequence is at or past the next
/// expected one; anything older (including duplicates) is dropped. Arrival
/// order 5, 3, 7, 6 delivers 5 then 7.
pub struct UnreliableOrderedChannel {
    core: ChannelCore,
    /// Lowest sequence still deliverable
    next_sequence: SeqNumber,
    dropped: u64,
}

impl UnreliableOrderedChannel {
    pub fn new(channel_id: u8, config: ChannelConfig) -> Self {
        UnreliableOrderedChannel {
            core: ChannelCore::new(channel_id, config),
            next_sequence: SeqNumber::new(0),
            dropped: 0,
        }
    }

    /// Lowest sequence that would still be delivered
    pub fn next_sequence(&self) -> SeqNumber {
        self.next_sequence
    }

    /// Payloads dropped for arriving late
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn discard_events(&mut self) {
        while self.core.controller.poll_event().is_some() {}
    }
}

impl MessageChannel for UnreliableOrderedChannel {
    fn channel_id(&self) -> u8 {
        self.core.channel_id
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::UnreliableOrdered
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
            let ControllerEvent::Processed {
                sequence, payload, ..
            } = event
            else {
                continue;
            };

            if sequence == self.next_sequence || sequence.gt(self.next_sequence) {
                self.next_sequence = sequence.next();
                transceiver.receive_packet(from, payload);
            } else {
                self.dropped += 1;
                tracing::trace!(
                    channel = %self.core.config.name,
                    %sequence,
                    expected = %self.next_sequence,
                    "dropping late packet"
                );
            }
        }
    }

    fn update(&mut self, delta: Duration, _transceiver: &mut dyn PacketTransceiver) {
        self.core.controller.update(delta);
        self.discard_events();
    }

    fn reset(&mut self) {
        self.core.reset();
        self.next_sequence = SeqNumber::new(0);
        self.dropped = 0;
    }

    fn controller(&self) -> &PacketController {
        &self.core.controller
    }
}
