//! Packet Structures and Serialization
//!
//! Every datagram carries a fixed 9-byte header followed by an opaque payload.
//! The header piggy-backs acknowledgment state for the peer: the newest
//! sequence seen from it plus a 32-bit bitfield covering the sequences just
//! below. All fields are in network byte order.
//!
//! ```text
//!  0               16              32                              64       72
//!  +---------------+---------------+-------------------------------+--------+----
//!  |   sequence    | ack_sequence  |         ack_bitfield          | chan id| payload
//!  +---------------+---------------+-------------------------------+--------+----
//! ```

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the packet header in bytes
pub const HEADER_SIZE: usize = 9;

/// Default maximum payload size (fits a 1500 byte MTU with IP/UDP headers)
pub const MAX_PAYLOAD_SIZE: usize = 1200;

/// Number of sequences covered by the ack bitfield
pub const ACK_BITFIELD_BITS: u16 = 32;

/// Packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Sequence number assigned by the sender
    pub sequence: SeqNumber,
    /// Newest sequence number the sender has received from its peer
    pub ack_sequence: SeqNumber,
    /// Bit i set means `ack_sequence - i` was received
    pub ack_bitfield: u32,
    /// Logical channel the payload belongs to
    pub channel_id: u8,
}

impl PacketHeader {
    /// Create a new packet header
    pub fn new(
        sequence: SeqNumber,
        ack_sequence: SeqNumber,
        ack_bitfield: u32,
        channel_id: u8,
    ) -> Self {
        PacketHeader {
            sequence,
            ack_sequence,
            ack_bitfield,
            channel_id,
        }
    }

    /// Parse header from bytes (network byte order)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        Ok(PacketHeader {
            sequence: SeqNumber::new(buf.get_u16()),
            ack_sequence: SeqNumber::new(buf.get_u16()),
            ack_bitfield: buf.get_u32(),
            channel_id: buf.get_u8(),
        })
    }

    /// Serialize header to bytes (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u16(self.sequence.as_raw());
        buf.put_u16(self.ack_sequence.as_raw());
        buf.put_u32(self.ack_bitfield);
        buf.put_u8(self.channel_id);
    }

    /// Iterate over every sequence number this header acknowledges
    pub fn acked_sequences(&self) -> impl Iterator<Item = SeqNumber> + '_ {
        (0..ACK_BITFIELD_BITS)
            .filter(move |bit| self.ack_bitfield & (1 << bit) != 0)
            .map(move |bit| self.ack_sequence - bit)
    }
}

/// A header plus its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header
    pub header: PacketHeader,
    /// Payload data
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet
    pub fn new(header: PacketHeader, payload: Bytes) -> Self {
        Packet { header, payload }
    }

    /// Get the sequence number
    pub fn sequence(&self) -> SeqNumber {
        self.header.sequence
    }

    /// Get the channel id
    pub fn channel_id(&self) -> u8 {
        self.header.channel_id
    }

    /// Total size of the packet (header + payload)
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse a packet from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::from_bytes(bytes)?;
        let payload = Bytes::copy_from_slice(&bytes[HEADER_SIZE..]);
        Ok(Packet { header, payload })
    }
}

/// Read the channel id of an encoded packet without decoding the rest
pub fn peek_channel_id(bytes: &[u8]) -> Result<u8, PacketError> {
    if bytes.len() < HEADER_SIZE {
        return Err(PacketError::InsufficientData {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }
    Ok(bytes[HEADER_SIZE - 1])
}

/// Packet parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Malformed fragment header: {0}")]
    MalformedFragment(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_serialization() {
        let header = PacketHeader::new(SeqNumber::new(1000), SeqNumber::new(77), 0xDEAD_BEEF, 3);
        let packet = Packet::new(header, Bytes::from_static(b"position update"));

        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 15);

        let decoded = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_header_byte_order() {
        let header = PacketHeader::new(SeqNumber::new(0x0102), SeqNumber::new(0x0304), 0x0506_0708, 9);
        let mut buf = BytesMut::new();
        header.to_bytes(&mut buf);
        assert_eq!(&buf[..], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_truncated_header() {
        let err = Packet::from_bytes(&[0u8; 5]).unwrap_err();
        assert_eq!(
            err,
            PacketError::InsufficientData {
                expected: HEADER_SIZE,
                actual: 5
            }
        );
        assert!(peek_channel_id(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_empty_payload() {
        let header = PacketHeader::new(SeqNumber::new(1), SeqNumber::new(0), 0, 0);
        let bytes = Packet::new(header, Bytes::new()).to_bytes();
        let decoded = Packet::from_bytes(&bytes).unwrap();
        assert!(decoded.payload.is_empty());
        assert_eq!(peek_channel_id(&bytes).unwrap(), 0);
    }

    #[test]
    fn test_acked_sequences() {
        let header = PacketHeader::new(SeqNumber::new(0), SeqNumber::new(1), 0b1011, 0);
        let acked: Vec<u16> = header.acked_sequences().map(SeqNumber::as_raw).collect();
        assert_eq!(acked, vec![1, 0, u16::MAX - 1]);
    }
}
