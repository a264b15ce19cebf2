//! Reliable message fragments
//!
//! The reliable channel prefixes every packet payload with a small header
//! naming the application message it belongs to and its position within
//! that message. Messages too large for one packet are split into up to
//! `max_fragments` fragments.

use crate::packet::PacketError;
use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fragment header in bytes
pub const FRAGMENT_HEADER_SIZE: usize = 4;

/// Fragment header (message id, fragment index, fragment count)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub message_id: SeqNumber,
    pub index: u8,
    pub count: u8,
}

impl FragmentHeader {
    /// Parse a fragment from a packet payload
    pub fn decode(payload: &Bytes) -> Result<(FragmentHeader, Bytes), PacketError> {
        if payload.len() < FRAGMENT_HEADER_SIZE {
            return Err(PacketError::InsufficientData {
                expected: FRAGMENT_HEADER_SIZE,
                actual: payload.len(),
            });
        }

        let mut buf = &payload[..FRAGMENT_HEADER_SIZE];
        let header = FragmentHeader {
            message_id: SeqNumber::new(buf.get_u16()),
            index: buf.get_u8(),
            count: buf.get_u8(),
        };
        if header.count == 0 {
            return Err(PacketError::MalformedFragment("zero fragment count"));
        }
        if header.index >= header.count {
            return Err(PacketError::MalformedFragment("fragment index out of range"));
        }

        Ok((header, payload.slice(FRAGMENT_HEADER_SIZE..)))
    }

    /// Prefix `chunk` with this header
    pub fn encode(&self, chunk: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAGMENT_HEADER_SIZE + chunk.len());
        buf.put_u16(self.message_id.as_raw());
        buf.put_u8(self.index);
        buf.put_u8(self.count);
        buf.put_slice(chunk);
        buf.freeze()
    }
}

/// Split `message` into encoded fragments of at most `fragment_size` bytes
///
/// An empty message still produces one (empty) fragment. The caller checks
/// that the fragment count fits in a `u8`.
pub fn split_message(message_id: SeqNumber, message: &[u8], fragment_size: usize) -> Vec<Bytes> {
    let count = fragment_count(message.len(), fragment_size);
    if message.is_empty() {
        let header = FragmentHeader {
            message_id,
            index: 0,
            count: 1,
        };
        return vec![header.encode(&[])];
    }

    message
        .chunks(fragment_size.max(1))
        .enumerate()
        .map(|(index, chunk)| {
            FragmentHeader {
                message_id,
                index: index as u8,
                count: count as u8,
            }
            .encode(chunk)
        })
        .collect()
}

/// Number of fragments needed for a message of `len` bytes
pub fn fragment_count(len: usize, fragment_size: usize) -> usize {
    if len == 0 {
        1
    } else {
        (len + fragment_size.max(1) - 1) / fragment_size.max(1)
    }
}
