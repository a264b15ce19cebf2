//! Property-based tests for sequence math, headers and ack bitfields
//!
//! These run across the whole 16-bit sequence space, so wraparound is
//! exercised on every run rather than in a handful of hand-picked cases.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rudp_protocol::packet::{Packet, PacketHeader, ACK_BITFIELD_BITS, HEADER_SIZE};
use rudp_protocol::sequence::{sequence_greater_than, sequence_less_than, HALF_SEQ_SPACE};
use rudp_protocol::{AckWindow, SeqNumber};

// Strategies

fn seq_number_strategy() -> impl Strategy<Value = SeqNumber> {
    any::<u16>().prop_map(SeqNumber::new)
}

fn header_strategy() -> impl Strategy<Value = PacketHeader> {
    (
        seq_number_strategy(),
        seq_number_strategy(),
        any::<u32>(),
        any::<u8>(),
    )
        .prop_map(|(sequence, ack_sequence, ack_bitfield, channel_id)| {
            PacketHeader::new(sequence, ack_sequence, ack_bitfield, channel_id)
        })
}

fn small_payload_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..=256).prop_map(Bytes::from)
}

/// Walk a fresh window forward to `base` without leaving entries behind
fn advance_to(window: &mut AckWindow<()>, base: SeqNumber) {
    let mut sequence = SeqNumber::new(0);
    while sequence != base {
        let remaining = base.as_raw() - sequence.as_raw();
        sequence += remaining.min(128);
        window.insert(sequence, ());
        window.remove(sequence);
    }
}

// Property tests

proptest! {
    #[test]
    fn prop_greater_than_is_antisymmetric(a in any::<u16>(), b in any::<u16>()) {
        if a == b {
            prop_assert!(!sequence_greater_than(a, b));
        } else {
            prop_assert_ne!(sequence_greater_than(a, b), sequence_greater_than(b, a));
        }
    }

    #[test]
    fn prop_successor_is_newer(x in any::<u16>()) {
        prop_assert!(sequence_greater_than(x.wrapping_add(1), x));
        prop_assert!(sequence_less_than(x, x.wrapping_add(1)));
    }

    #[test]
    fn prop_less_than_mirrors_greater_than(a in any::<u16>(), b in any::<u16>()) {
        prop_assert_eq!(sequence_less_than(a, b), sequence_greater_than(b, a));
    }

    #[test]
    fn prop_distance_within_half_space(
        start in seq_number_strategy(),
        offset in 1u16..HALF_SEQ_SPACE,
    ) {
        let ahead = start + offset;
        prop_assert!(ahead.gt(start));
        prop_assert!(start.lt(ahead));
        prop_assert_eq!(start.distance_to(ahead), offset as i16);
        prop_assert_eq!(ahead.distance_to(start), -(offset as i16));
    }

    #[test]
    fn prop_header_roundtrip(header in header_strategy()) {
        let mut buf = BytesMut::new();
        header.to_bytes(&mut buf);
        prop_assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = PacketHeader::from_bytes(&buf).unwrap();
        prop_assert_eq!(decoded, header);
    }

    #[test]
    fn prop_packet_roundtrip(
        header in header_strategy(),
        payload in small_payload_strategy(),
    ) {
        let packet = Packet::new(header, payload.clone());
        let serialized = packet.to_bytes();
        prop_assert_eq!(serialized.len(), HEADER_SIZE + payload.len());

        let decoded = Packet::from_bytes(&serialized).unwrap();
        prop_assert_eq!(decoded.header, header);
        prop_assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn prop_truncated_header_rejected(bytes in prop::collection::vec(any::<u8>(), 0..HEADER_SIZE)) {
        prop_assert!(PacketHeader::from_bytes(&bytes).is_err());
        prop_assert!(Packet::from_bytes(&bytes).is_err());
    }

    #[test]
    fn prop_acked_sequences_match_bitfield(header in header_strategy()) {
        let acked: Vec<SeqNumber> = header.acked_sequences().collect();
        prop_assert_eq!(acked.len() as u32, header.ack_bitfield.count_ones());
        for sequence in acked {
            let back = sequence.distance_to(header.ack_sequence);
            prop_assert!((0..ACK_BITFIELD_BITS as i16).contains(&back));
            prop_assert!(header.ack_bitfield & (1 << back) != 0);
        }
    }

    #[test]
    fn prop_bitfield_reflects_window(
        base in seq_number_strategy(),
        received in prop::collection::btree_set(0u16..ACK_BITFIELD_BITS, 0..32),
    ) {
        let mut window: AckWindow<()> = AckWindow::with_capacity(256);
        advance_to(&mut window, base);
        for &back in &received {
            window.insert(base - back, ());
        }

        let bitfield = window.generate_ack_bitfield(base);
        for bit in 0..ACK_BITFIELD_BITS {
            prop_assert_eq!(bitfield & (1 << bit) != 0, received.contains(&bit));
        }
    }
}
