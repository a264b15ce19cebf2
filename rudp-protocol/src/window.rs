//! Sliding acknowledgment windows
//!
//! An [`AckWindow`] is a fixed arena of slots indexed by `sequence mod
//! capacity`. Each slot is tagged with the sequence it currently represents,
//! so a slot left over from an earlier lap of the sequence space is detected
//! with a plain equality check and never mistaken for a live entry.

use crate::packet::ACK_BITFIELD_BITS;
use crate::sequence::SeqNumber;
use std::time::Duration;

/// Send-side window entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPacket {
    /// Controller clock when the packet was sent
    pub time: Duration,
    /// Encoded packet size in bytes
    pub size: usize,
    /// An ack for this sequence has been processed
    pub acked: bool,
    /// A loss has already been reported for this sequence
    pub lost: bool,
}

impl SentPacket {
    pub fn new(time: Duration, size: usize) -> Self {
        SentPacket {
            time,
            size,
            acked: false,
            lost: false,
        }
    }

    /// Neither acknowledged nor written off
    pub fn is_outstanding(&self) -> bool {
        !self.acked && !self.lost
    }
}

/// Receive-side window entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// Controller clock when the packet arrived
    pub time: Duration,
    /// Encoded packet size in bytes
    pub size: usize,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    sequence: SeqNumber,
    entry: T,
}

/// Fixed-capacity record of the most recent sequence numbers
pub struct AckWindow<T> {
    /// One past the newest sequence inserted
    sequence: SeqNumber,
    slots: Box<[Option<Slot<T>>]>,
}

impl<T> AckWindow<T> {
    /// Create a window tracking `capacity` sequence numbers
    ///
    /// # Panics
    /// Panics if capacity is zero or exceeds half the sequence space
    pub fn with_capacity(capacity: u16) -> Self {
        assert!(
            capacity > 0 && capacity <= crate::sequence::HALF_SEQ_SPACE,
            "window capacity {} out of range",
            capacity
        );
        AckWindow {
            sequence: SeqNumber::new(0),
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    #[inline]
    fn index(&self, sequence: SeqNumber) -> usize {
        sequence.as_raw() as usize % self.slots.len()
    }

    /// Number of slots
    pub fn capacity(&self) -> u16 {
        self.slots.len() as u16
    }

    /// One past the newest sequence inserted
    pub fn sequence(&self) -> SeqNumber {
        self.sequence
    }

    /// True when `sequence` has fallen behind the window horizon
    pub fn is_stale(&self, sequence: SeqNumber) -> bool {
        sequence.lt(self.sequence - self.capacity())
    }

    /// Record an entry for `sequence`, overwriting whatever held its slot
    ///
    /// Returns `None` without storing anything when the sequence is older
    /// than the window horizon.
    pub fn insert(&mut self, sequence: SeqNumber, entry: T) -> Option<&mut T> {
        if self.is_stale(sequence) {
            return None;
        }
        if sequence.next().gt(self.sequence) {
            self.sequence = sequence.next();
        }
        let idx = self.index(sequence);
        let slot = self.slots[idx].insert(Slot { sequence, entry });
        Some(&mut slot.entry)
    }

    /// True iff the slot for `sequence` holds exactly that sequence
    pub fn exists(&self, sequence: SeqNumber) -> bool {
        matches!(&self.slots[self.index(sequence)], Some(slot) if slot.sequence == sequence)
    }

    /// Get the entry for `sequence`
    pub fn get(&self, sequence: SeqNumber) -> Option<&T> {
        match &self.slots[self.index(sequence)] {
            Some(slot) if slot.sequence == sequence => Some(&slot.entry),
            _ => None,
        }
    }

    /// Get the entry for `sequence` mutably
    pub fn get_mut(&mut self, sequence: SeqNumber) -> Option<&mut T> {
        let idx = self.index(sequence);
        match &mut self.slots[idx] {
            Some(slot) if slot.sequence == sequence => Some(&mut slot.entry),
            _ => None,
        }
    }

    /// Whatever currently occupies the slot `sequence` maps to
    ///
    /// Used before an insert to see which older entry is about to be evicted.
    pub fn occupant(&self, sequence: SeqNumber) -> Option<(SeqNumber, &T)> {
        self.slots[self.index(sequence)]
            .as_ref()
            .map(|slot| (slot.sequence, &slot.entry))
    }

    /// Remove and return the entry for `sequence`
    pub fn remove(&mut self, sequence: SeqNumber) -> Option<T> {
        let idx = self.index(sequence);
        match &self.slots[idx] {
            Some(slot) if slot.sequence == sequence => self.slots[idx].take().map(|s| s.entry),
            _ => None,
        }
    }

    /// Bitfield of the 32 sequences ending at `base`
    ///
    /// Bit i is set when `base - i` is present in the window.
    pub fn generate_ack_bitfield(&self, base: SeqNumber) -> u32 {
        let mut bitfield = 0u32;
        for i in 0..ACK_BITFIELD_BITS {
            if self.exists(base - i) {
                bitfield |= 1 << i;
            }
        }
        bitfield
    }

    /// Iterate over the tracked entries, newest first
    pub fn iter_recent(&self) -> impl Iterator<Item = (SeqNumber, &T)> + '_ {
        let newest = self.sequence - 1;
        (0..self.capacity()).filter_map(move |back| {
            let sequence = newest - back;
            self.get(sequence).map(|entry| (sequence, entry))
        })
    }

    /// Drop every entry and rewind to sequence zero
    pub fn reset(&mut self) {
        self.sequence = SeqNumber::new(0);
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_none())
    }
}

impl AckWindow<SentPacket> {
    /// Mark `sequence` acknowledged
    ///
    /// Returns the entry when this call newly acked it, `None` for duplicate
    /// or stale acks.
    pub fn ack(&mut self, sequence: SeqNumber) -> Option<SentPacket> {
        let entry = self.get_mut(sequence)?;
        if entry.acked {
            return None;
        }
        entry.acked = true;
        Some(*entry)
    }
}
