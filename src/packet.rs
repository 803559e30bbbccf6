//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here.  This is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Flags     |         Payload Length        |   Reserved    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.
//! seq(4) + ack(4) + flags(1) + payload_len(2) + reserved(1)
//!
//! The reserved byte is written as zero on encode and ignored on decode.
//! Data segments carry `payload_len` bytes of application payload; server
//! cumulative ACKs carry an 8-byte big-endian `f64` timestamp (informational
//! only, never parsed by the client).

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 0b0000_0001;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b0000_0010;
    /// Finish.  Sender has no more data to send.
    pub const FIN: u8 = 0b0000_0100;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_FLAGS: usize = 8;
const OFF_PAYLOAD_LEN: usize = 9;
const OFF_RESERVED: usize = 11;

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Packet::encode`] converts to big-endian
/// on the wire and [`Packet::decode`] converts back.  The on-wire
/// `payload_len` field is computed from the actual payload on encode and
/// validated against the remaining buffer bytes on decode, so it is not
/// stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sequence number: the byte offset of this segment in the sender's
    /// stream.
    pub seq: u32,
    /// Acknowledgement number: the next byte offset the receiver expects.
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The `payload_len` field is computed from the actual payload; the
    /// reserved byte is always written as zero.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.len();
        let mut buf = vec![0u8; HEADER_LEN + payload_len];

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_FLAGS] = self.header.flags;
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());
        buf[OFF_RESERVED] = 0;

        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`], or
    /// - the `payload_len` field disagrees with `buf.len()`.
    ///
    /// A length disagreement rejects the whole datagram rather than padding
    /// or truncating the payload; the caller drops it like any other
    /// malformed input.  No other validation happens here: flag combinations
    /// and the inbound reserved byte are the caller's responsibility.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let seq = u32::from_be_bytes(buf[OFF_SEQ..OFF_SEQ + 4].try_into().unwrap());
        let ack = u32::from_be_bytes(buf[OFF_ACK..OFF_ACK + 4].try_into().unwrap());
        let flags = buf[OFF_FLAGS];
        let payload_len =
            u16::from_be_bytes(buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2].try_into().unwrap());

        if buf.len() != HEADER_LEN + payload_len as usize {
            return Err(PacketError::LengthMismatch);
        }

        Ok(Packet {
            header: Header { seq, ack, flags },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    /// `payload_len` field does not match the actual remaining bytes.
    #[error("payload_len field does not match remaining bytes")]
    LengthMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet(seq: u32, ack: u32, flags: u8, payload: &[u8]) -> Packet {
        Packet {
            header: Header { seq, ack, flags },
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = make_packet(42, 0, flags::SYN, b"hello");
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.header.seq, pkt.header.seq);
        assert_eq!(decoded.header.ack, pkt.header.ack);
        assert_eq!(decoded.header.flags, pkt.header.flags);
        assert_eq!(decoded.payload, pkt.payload);
    }

    #[test]
    fn encode_sets_correct_payload_len() {
        let pkt = make_packet(1, 2, flags::ACK, b"world");
        let bytes = pkt.encode();
        let len_field = u16::from_be_bytes([bytes[OFF_PAYLOAD_LEN], bytes[OFF_PAYLOAD_LEN + 1]]);
        assert_eq!(len_field, pkt.payload.len() as u16);
    }

    #[test]
    fn reserved_byte_is_zero_on_wire() {
        let bytes = make_packet(7, 9, flags::SYN | flags::ACK, b"x").encode();
        assert_eq!(bytes[OFF_RESERVED], 0);
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::BufferTooShort));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::BufferTooShort)
        );
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = make_packet(0, 0, 0, b"data").encode();
        bytes.pop(); // payload_len still claims 4 bytes, but buf is one short
        assert_eq!(Packet::decode(&bytes), Err(PacketError::LengthMismatch));
    }

    #[test]
    fn decode_trailing_junk_returns_error() {
        let mut bytes = make_packet(0, 0, 0, b"data").encode();
        bytes.push(0xab); // one byte more than payload_len declares
        assert_eq!(Packet::decode(&bytes), Err(PacketError::LengthMismatch));
    }

    #[test]
    fn decode_ignores_nonzero_reserved_byte() {
        let mut bytes = make_packet(3, 4, flags::ACK, b"").encode();
        bytes[OFF_RESERVED] = 0xff;
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.header.seq, 3);
        assert_eq!(decoded.header.ack, 4);
    }

    #[test]
    fn syn_flag_is_set_correctly() {
        let bytes = make_packet(0, 0, flags::SYN, b"").encode();
        assert_eq!(bytes[OFF_FLAGS] & flags::SYN, flags::SYN);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let pkt = make_packet(0, 1000, flags::ACK, b"");
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.payload, Vec::<u8>::new());
    }

    #[test]
    fn header_len_constant_is_correct() {
        // seq(4) + ack(4) + flags(1) + payload_len(2) + reserved(1) = 12
        assert_eq!(HEADER_LEN, 12);
    }

    #[test]
    fn encoded_length_equals_header_plus_payload() {
        let payload = b"exactly twelve!";
        let bytes = make_packet(0, 0, 0, payload).encode();
        assert_eq!(bytes.len(), HEADER_LEN + payload.len());
    }

    #[test]
    fn multiple_flag_bits() {
        let f = flags::SYN | flags::ACK;
        let bytes = make_packet(1, 2, f, b"").encode();
        assert_eq!(bytes[OFF_FLAGS], f);
    }

    #[test]
    fn fin_ack_combination() {
        let f = flags::FIN | flags::ACK;
        let decoded = Packet::decode(&make_packet(9, 10, f, b"").encode()).unwrap();
        assert_eq!(decoded.header.flags, f);
    }

    #[test]
    fn seq_ack_big_endian_on_wire() {
        let bytes = make_packet(0x0102_0304, 0x0506_0708, 0, b"").encode();
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_ACK..OFF_ACK + 4], &[0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn timestamp_payload_roundtrip() {
        // Server ACKs carry 8 bytes of big-endian f64 seconds.
        let stamp = 1_700_000_000.25_f64;
        let pkt = make_packet(0, 2481, flags::ACK, &stamp.to_be_bytes());
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.payload.len(), 8);
        let got = f64::from_be_bytes(decoded.payload[..8].try_into().unwrap());
        assert_eq!(got, stamp);
    }
}
