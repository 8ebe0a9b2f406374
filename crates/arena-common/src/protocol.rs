// protocol.rs — UDP packet framing
//
// An application id and revision byte precede the sequence number so a
// datagram from an unrelated protocol sharing the same port is rejected
// outright rather than mis-parsed as garbage messages.

use crate::codec::{Reader, Writer};
use crate::error::CoreError;

pub const APPLICATION_ID: u32 = 0xF611_37C5;
pub const PROTOCOL_REVISION: u8 = 1;
pub const HEADER_SIZE: usize = 8;
pub const MAX_PACKET_SIZE: usize = 512;

bitflags::bitflags! {
    #[derive(Default)]
    pub struct PacketFlags: u8 {
        const NONE = 0;
        /// Set when an `AckBlock` immediately follows the header, before
        /// the message stream. A peer's first outbound packet (nothing
        /// received yet to ack) omits it.
        const HAS_ACK = 1 << 0;
    }
}

/// Piggybacked reliable-channel ack, written right after the header when
/// `PacketFlags::HAS_ACK` is set — the peer uses the ack + bitfield to
/// free reliable messages from its retransmit queue. The fixed 8-byte
/// header has no room for this, so it rides in the body ahead of the
/// application message stream instead of widening the header (see
/// DESIGN.md open-question note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckBlock {
    pub ack: u16,
    pub bitfield: u32,
}

impl AckBlock {
    pub const ENCODED_SIZE: usize = 6;

    pub fn encode(self, w: &mut Writer) {
        w.write_u16(self.ack);
        w.write_u32(self.bitfield);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, crate::error::Overflow> {
        let ack = r.read_u16()?;
        let bitfield = r.read_u32()?;
        Ok(AckBlock { ack, bitfield })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    pub sequence: u16,
}

impl PacketHeader {
    pub fn encode(self, out: &mut Vec<u8>) {
        let mut w = Writer::new(out);
        w.write_u32(APPLICATION_ID);
        w.write_u8(PROTOCOL_REVISION);
        w.write_u8(self.flags.bits);
        w.write_u16(self.sequence);
    }

    /// Returns `Ok(None)` for a packet with the wrong application id or
    /// revision — silently dropped, not an error the caller needs to log.
    pub fn decode(data: &[u8]) -> Result<Option<(PacketHeader, &[u8])>, CoreError> {
        let mut r = Reader::new(data);
        let app_id = r.read_u32().map_err(|_| CoreError::Malformed("packet shorter than header".into()))?;
        let revision = r.read_u8().map_err(|_| CoreError::Malformed("packet shorter than header".into()))?;
        let flags_bits = r.read_u8().map_err(|_| CoreError::Malformed("packet shorter than header".into()))?;
        let sequence = r.read_u16().map_err(|_| CoreError::Malformed("packet shorter than header".into()))?;

        if app_id != APPLICATION_ID || revision != PROTOCOL_REVISION {
            return Ok(None);
        }
        let flags = PacketFlags::from_bits_truncate(flags_bits);
        let body = &data[HEADER_SIZE..];
        Ok(Some((PacketHeader { flags, sequence }, body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = PacketHeader { flags: PacketFlags::NONE, sequence: 1234 };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        buf.extend_from_slice(b"payload");

        let (decoded, body) = PacketHeader::decode(&buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert_eq!(body, b"payload");
    }

    #[test]
    fn wrong_application_id_is_silently_dropped() {
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf);
        w.write_u32(0xDEAD_BEEF);
        w.write_u8(PROTOCOL_REVISION);
        w.write_u8(0);
        w.write_u16(0);

        assert!(PacketHeader::decode(&buf).unwrap().is_none());
    }

    #[test]
    fn wrong_revision_is_silently_dropped() {
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf);
        w.write_u32(APPLICATION_ID);
        w.write_u8(99);
        w.write_u8(0);
        w.write_u16(0);

        assert!(PacketHeader::decode(&buf).unwrap().is_none());
    }

    #[test]
    fn short_packet_is_malformed() {
        let buf = [0u8; 3];
        assert!(PacketHeader::decode(&buf).is_err());
    }

    #[test]
    fn ack_block_round_trips() {
        let block = AckBlock { ack: 500, bitfield: 0xABCD_1234 };
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf);
        block.encode(&mut w);
        let mut r = Reader::new(&buf);
        assert_eq!(AckBlock::decode(&mut r).unwrap(), block);
    }
}
