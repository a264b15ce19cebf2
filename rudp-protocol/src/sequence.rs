//! Sequence Number Handling
//!
//! Packets are numbered with 16-bit sequence numbers that wrap modulo 65536.
//! Ordering is circular: `a` is newer than `b` when the forward distance from
//! `b` to `a` falls in the first half of the space. This keeps comparisons
//! correct across the wrap boundary for up to 32767 outstanding packets.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Half of the 16-bit sequence space
pub const HALF_SEQ_SPACE: u16 = 0x8000;

/// Circular "newer than" test over the 16-bit sequence space.
///
/// Returns true iff `(a - b) mod 65536` lies in `(0, 32768)`. At exactly half
/// the space apart the numerically larger value wins, so that for any
/// `a != b` exactly one of `sequence_greater_than(a, b)` and
/// `sequence_greater_than(b, a)` holds.
#[inline]
pub fn sequence_greater_than(a: u16, b: u16) -> bool {
    let diff = a.wrapping_sub(b);
    diff != 0 && (diff < HALF_SEQ_SPACE || (diff == HALF_SEQ_SPACE && a > b))
}

/// Circular "older than" test, the mirror of [`sequence_greater_than`].
#[inline]
pub fn sequence_less_than(a: u16, b: u16) -> bool {
    sequence_greater_than(b, a)
}

/// Signed distance from `b` to `a` in the circular space (`a - b`).
#[inline]
pub fn circular_distance(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

/// Sequence number with 16-bit wraparound semantics
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct SeqNumber(u16);

impl SeqNumber {
    /// Create a new sequence number
    #[inline]
    pub const fn new(value: u16) -> Self {
        SeqNumber(value)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u16 {
        self.0
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber(self.0.wrapping_add(1))
    }

    /// Signed distance from this sequence number to another
    ///
    /// Positive values mean `other` is ahead of `self`, negative means
    /// `other` is behind.
    #[inline]
    pub fn distance_to(self, other: SeqNumber) -> i16 {
        circular_distance(other.0, self.0)
    }

    /// Check if this sequence number is older than another
    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        sequence_less_than(self.0, other.0)
    }

    /// Check if this sequence number is older than or equal to another
    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self == other || self.lt(other)
    }

    /// Check if this sequence number is newer than another
    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        sequence_greater_than(self.0, other.0)
    }

    /// Check if this sequence number is newer than or equal to another
    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self == other || self.gt(other)
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SeqNumber {
    fn from(value: u16) -> Self {
        SeqNumber(value)
    }
}

impl From<SeqNumber> for u16 {
    fn from(seq: SeqNumber) -> u16 {
        seq.0
    }
}

impl Add<u16> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u16) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u16> for SeqNumber {
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<u16> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u16) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u16> for SeqNumber {
    fn sub_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_sub(rhs);
    }
}

impl Sub for SeqNumber {
    type Output = i16;

    /// Signed distance between two sequence numbers
    fn sub(self, rhs: SeqNumber) -> i16 {
        rhs.distance_to(self)
    }
}
