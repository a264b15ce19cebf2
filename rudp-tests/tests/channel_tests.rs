//! End-to-end tests for acknowledgment, ordering and reliable delivery
//!
//! Peers are joined in memory through `BufferedTransceiver`s; the tests
//! route (or drop) the outbound datagrams by hand.

use bytes::Bytes;
use rudp::{
    BufferedTransceiver, ChannelConfig, ChannelError, ChannelKind, Connection, MessageChannel,
};
use rudp_protocol::packet::{Packet, PacketHeader};
use rudp_protocol::{ControllerEvent, PacketController, SeqNumber, UnreliableOrderedChannel};
use std::net::SocketAddr;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(10);

fn addr_a() -> SocketAddr {
    "10.0.0.1:4000".parse().unwrap()
}

fn addr_b() -> SocketAddr {
    "10.0.0.2:4000".parse().unwrap()
}

fn controller(name: &str) -> PacketController {
    PacketController::new(&ChannelConfig::named(name))
}

fn drain(controller: &mut PacketController) -> Vec<ControllerEvent> {
    std::iter::from_fn(|| controller.poll_event()).collect()
}

fn acked(events: &[ControllerEvent]) -> Vec<u16> {
    let mut acked: Vec<u16> = events
        .iter()
        .filter_map(|event| match event {
            ControllerEvent::Acked { sequence } => Some(sequence.as_raw()),
            _ => None,
        })
        .collect();
    acked.sort_unstable();
    acked
}

/// Encoded packet with a hand-picked sequence and no acks
fn raw_packet(sequence: u16, channel_id: u8, payload: &[u8]) -> Bytes {
    let header = PacketHeader::new(SeqNumber::new(sequence), SeqNumber::new(0), 0, channel_id);
    Packet::new(header, Bytes::copy_from_slice(payload))
        .to_bytes()
        .freeze()
}

#[test]
fn test_single_reply_acknowledges_every_packet() {
    let mut a = controller("a");
    let mut b = controller("b");

    for i in 0..5u8 {
        let packet = a.send_packet(0, &[i]).unwrap();
        b.on_packet_received(&packet.bytes).unwrap();
    }
    let reply = b.send_packet(0, b"reply").unwrap();
    a.on_packet_received(&reply.bytes).unwrap();

    assert_eq!(acked(&drain(&mut a)), vec![0, 1, 2, 3, 4]);
    assert_eq!(a.stats().packets_acked, 5);
}

#[test]
fn test_gap_shows_in_ack_bitfield() {
    let mut a = controller("a");
    let mut b = controller("b");

    for _ in 0..=11 {
        let packet = a.send_packet(0, b"x").unwrap();
        if packet.sequence == SeqNumber::new(9) || packet.sequence == SeqNumber::new(11) {
            b.on_packet_received(&packet.bytes).unwrap();
        }
    }

    assert_eq!(b.remote_sequence(), SeqNumber::new(11));
    let bitfield = b.ack_bitfield();
    assert_ne!(bitfield & 1, 0);
    assert_eq!(bitfield & (1 << 1), 0);
    assert_ne!(bitfield & (1 << 2), 0);
    assert_eq!(bitfield, 0b101);

    // The reply acks 9 and 11 only; 10 is reported lost once it times out
    let reply = b.send_packet(0, b"").unwrap();
    a.on_packet_received(&reply.bytes).unwrap();
    assert_eq!(acked(&drain(&mut a)), vec![9, 11]);

    a.update(Duration::from_secs(5));
    let lost: Vec<u16> = drain(&mut a)
        .into_iter()
        .filter_map(|event| match event {
            ControllerEvent::Lost { sequence } => Some(sequence.as_raw()),
            _ => None,
        })
        .collect();
    assert!(lost.contains(&10));
    assert!(!lost.contains(&9));
    assert!(!lost.contains(&11));
}

#[test]
fn test_ordered_unreliable_drops_late_arrivals() {
    let mut channel = UnreliableOrderedChannel::new(0, ChannelConfig::named("ordered"));
    channel.open();
    let mut tx = BufferedTransceiver::new();

    for sequence in [5u16, 3, 7, 6] {
        let payload = [sequence as u8];
        channel.on_message_received(addr_a(), &raw_packet(sequence, 0, &payload), &mut tx);
    }

    assert_eq!(
        tx.drain_delivered(),
        vec![Bytes::from(vec![5u8]), Bytes::from(vec![7u8])]
    );
    assert_eq!(channel.dropped(), 2);
}

#[test]
fn test_reset_is_idempotent() {
    let mut a = controller("a");
    let mut b = controller("b");
    for _ in 0..20 {
        let packet = a.send_packet(0, b"payload").unwrap();
        b.on_packet_received(&packet.bytes).unwrap();
    }
    a.update(Duration::from_millis(250));

    a.reset();
    let local = a.local_sequence();
    let remote = a.remote_sequence();
    let stats = a.stats().clone();
    a.reset();

    assert_eq!(a.local_sequence(), local);
    assert_eq!(a.remote_sequence(), remote);
    assert_eq!(a.stats(), &stats);
    assert_eq!(a.local_sequence(), SeqNumber::new(0));
    assert!(a.sent_packets().is_empty());
    assert!(a.received_packets().is_empty());
    assert_eq!(a.poll_event(), None);
}

#[test]
fn test_reset_forgets_pre_reset_sequences() {
    let mut b = controller("b");

    // Walk the receive window up to 40000
    for step in 1..=400u16 {
        b.on_packet_received(&raw_packet(step * 100, 0, b"")).unwrap();
    }
    assert_eq!(b.remote_sequence(), SeqNumber::new(40000));
    drain(&mut b);

    b.reset();
    b.on_packet_received(&raw_packet(40000, 0, b"late")).unwrap();

    assert_eq!(b.stats().packets_stale, 1);
    assert_eq!(b.stats().packets_received, 0);
    assert_eq!(b.remote_sequence(), SeqNumber::new(0));
    assert_eq!(b.poll_event(), None);
}

#[test]
fn test_reset_rejects_low_pre_reset_sequences() {
    let mut channel = UnreliableOrderedChannel::new(0, ChannelConfig::named("ordered"));
    channel.open();
    let mut tx = BufferedTransceiver::new();
    for sequence in 0..=20u16 {
        channel.on_message_received(addr_a(), &raw_packet(sequence, 0, b"old"), &mut tx);
    }
    assert_eq!(tx.drain_delivered().len(), 21);

    channel.reset();
    channel.open();
    channel.on_message_received(addr_a(), &raw_packet(15, 0, b"old"), &mut tx);

    assert_eq!(tx.delivered_len(), 0);
    assert_eq!(channel.controller().stats().packets_stale, 1);
    assert_eq!(channel.controller().remote_sequence(), SeqNumber::new(0));
    assert_eq!(channel.next_sequence(), SeqNumber::new(0));

    // The new session resumes delivery once it is past the old window
    for sequence in 21..=23u16 {
        channel.on_message_received(addr_a(), &raw_packet(sequence, 0, b"new"), &mut tx);
    }
    assert_eq!(tx.drain_delivered().len(), 3);
    assert_eq!(channel.next_sequence(), SeqNumber::new(24));
}

#[test]
fn test_acks_survive_sequence_wraparound() {
    const PACKETS: u32 = 70_000;
    let mut a = controller("a");
    let mut b = controller("b");

    for i in 0..PACKETS {
        let packet = a.send_packet(0, b"data").unwrap();
        b.on_packet_received(&packet.bytes).unwrap();
        if i % 8 == 7 {
            let reply = b.send_packet(0, b"").unwrap();
            a.on_packet_received(&reply.bytes).unwrap();
        }
        drain(&mut a);
        drain(&mut b);
    }
    let reply = b.send_packet(0, b"").unwrap();
    a.on_packet_received(&reply.bytes).unwrap();

    assert_eq!(a.local_sequence(), SeqNumber::new((PACKETS % 65_536) as u16));
    assert_eq!(a.stats().packets_acked, PACKETS as u64);
    assert_eq!(a.stats().packets_lost, 0);
    assert_eq!(b.stats().packets_stale, 0);
    assert_eq!(b.stats().packets_duplicate, 0);
}

#[test]
fn test_reset_ignores_acks_for_pre_reset_packets() {
    let mut a = controller("a");
    let mut b = controller("b");
    for _ in 0..3 {
        let packet = a.send_packet(0, b"before").unwrap();
        b.on_packet_received(&packet.bytes).unwrap();
    }

    a.reset();
    let reply = b.send_packet(0, b"ack").unwrap();
    a.on_packet_received(&reply.bytes).unwrap();

    let events = drain(&mut a);
    assert!(acked(&events).is_empty());
    assert_eq!(a.stats().packets_acked, 0);
    assert!(matches!(events.as_slice(), [ControllerEvent::Processed { .. }]));
}

/// Two connections joined in memory, A's datagrams filtered by `drop`
struct Pair {
    a: Connection,
    b: Connection,
    a_tx: BufferedTransceiver,
    b_tx: BufferedTransceiver,
    sent_by_a: usize,
}

impl Pair {
    fn new(channels: &[ChannelKind]) -> Self {
        let configs = || {
            channels
                .iter()
                .map(|&kind| (kind, ChannelConfig::named(kind.to_string())))
                .collect::<Vec<_>>()
        };
        let mut a = Connection::new(addr_b(), configs()).unwrap();
        let mut b = Connection::new(addr_a(), configs()).unwrap();
        a.open();
        b.open();
        Pair {
            a,
            b,
            a_tx: BufferedTransceiver::new(),
            b_tx: BufferedTransceiver::new(),
            sent_by_a: 0,
        }
    }

    fn tick(&mut self, drop: &dyn Fn(usize) -> bool) {
        self.a.update(TICK, &mut self.a_tx);
        self.b.update(TICK, &mut self.b_tx);
        for datagram in self.a_tx.drain_outbound() {
            let n = self.sent_by_a;
            self.sent_by_a += 1;
            if !drop(n) {
                self.b.on_datagram(addr_a(), &datagram, &mut self.b_tx);
            }
        }
        for datagram in self.b_tx.drain_outbound() {
            self.a.on_datagram(addr_b(), &datagram, &mut self.a_tx);
        }
    }
}

#[test]
fn test_reliable_first_transmission_dropped() {
    let mut pair = Pair::new(&[ChannelKind::ReliableOrdered]);
    pair.a
        .send(0, Bytes::from_static(b"must arrive"), &mut pair.a_tx)
        .unwrap();

    let drop_first = |n: usize| n == 0;
    pair.tick(&drop_first);
    assert_eq!(pair.b_tx.delivered_len(), 0);

    for _ in 0..100 {
        pair.tick(&drop_first);
    }

    assert_eq!(
        pair.b_tx.drain_delivered(),
        vec![Bytes::from_static(b"must arrive")]
    );
    let a_stats = pair.a.stats();
    assert!(a_stats.reliable.fragments_resent >= 1);
    assert_eq!(a_stats.reliable.messages_acked, 1);
    assert_eq!(pair.b.stats().reliable.messages_delivered, 1);
}

#[test]
fn test_connection_carries_every_channel_kind() {
    let kinds = [
        ChannelKind::UnreliableUnordered,
        ChannelKind::UnreliableOrdered,
        ChannelKind::ReliableOrdered,
    ];
    let mut pair = Pair::new(&kinds);

    for i in 0..20u8 {
        for channel_id in 0..3u8 {
            pair.a
                .send(channel_id, Bytes::from(vec![channel_id, i]), &mut pair.a_tx)
                .unwrap();
        }
    }

    // Scattered loss on the first sends only
    let lossy = |n: usize| n < 60 && (n.wrapping_mul(2_654_435_761) >> 16) % 4 == 0;
    for _ in 0..200 {
        pair.tick(&lossy);
    }

    let mut per_channel: [Vec<u8>; 3] = Default::default();
    while let Some((from, message)) = pair.b_tx.pop_delivered() {
        assert_eq!(from, addr_a());
        per_channel[message[0] as usize].push(message[1]);
    }

    let [unordered, ordered, reliable] = per_channel;
    assert!(unordered.iter().all(|&i| i < 20));
    assert!(ordered.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(reliable, (0..20u8).collect::<Vec<_>>());
    assert_eq!(pair.a.stats().reliable.messages_acked, 20);
}

#[test]
fn test_reset_connection_refuses_sends_until_reopened() {
    let mut pair = Pair::new(&[ChannelKind::ReliableOrdered]);
    pair.a.reset();
    pair.a.reset();

    assert!(!pair.a.is_open());
    assert!(matches!(
        pair.a.send(0, Bytes::from_static(b"x"), &mut pair.a_tx),
        Err(ChannelError::NotActive(0))
    ));

    pair.a.open();
    pair.a
        .send(0, Bytes::from_static(b"again"), &mut pair.a_tx)
        .unwrap();
    for _ in 0..5 {
        pair.tick(&|_| false);
    }
    assert_eq!(pair.b_tx.drain_delivered(), vec![Bytes::from_static(b"again")]);
}

#[test]
fn test_foreign_and_unknown_channel_datagrams_counted() {
    let mut pair = Pair::new(&[ChannelKind::UnreliableUnordered]);
    let stranger: SocketAddr = "10.0.0.99:4000".parse().unwrap();

    pair.b
        .on_datagram(stranger, &raw_packet(0, 0, b"hi"), &mut pair.b_tx);
    pair.b
        .on_datagram(addr_a(), &raw_packet(0, 7, b"hi"), &mut pair.b_tx);
    pair.b.on_datagram(addr_a(), &[1, 2, 3], &mut pair.b_tx);

    let stats = pair.b.stats();
    assert_eq!(stats.foreign, 1);
    assert_eq!(stats.unknown_channel, 1);
    assert_eq!(stats.invalid, 1);
    assert_eq!(pair.b_tx.delivered_len(), 0);
}
