// net.rs — packet assembly/parsing glue between `protocol`, `message` and
// the actual socket owned by `arena-server`/`arena-client`.
//
// This is the non-blocking, single-socket path: one side builds a
// header-plus-payload datagram, the other tears it back down and feeds
// the payload to its message dispatcher. The tick thread owns the
// socket directly rather than handing receive off to a background I/O
// thread.

use crate::codec::{Reader, Writer};
use crate::error::CoreError;
use crate::message::{Decoded, Message};
use crate::protocol::{AckBlock, PacketFlags, PacketHeader, HEADER_SIZE, MAX_PACKET_SIZE};

/// Builds one outbound datagram: header, an optional piggybacked ack, and
/// as many `messages` as fit under `MAX_PACKET_SIZE`. Returns the messages
/// that didn't fit so the caller can carry them over to a follow-up
/// packet (large state is split across many EntityUpdate messages).
pub fn build_packet<'m>(sequence: u16, ack: Option<AckBlock>, messages: &'m [Message]) -> (Vec<u8>, &'m [Message]) {
    let mut flags = PacketFlags::NONE;
    if ack.is_some() {
        flags |= PacketFlags::HAS_ACK;
    }
    let mut out = Vec::with_capacity(MAX_PACKET_SIZE);
    PacketHeader { flags, sequence }.encode(&mut out);
    if let Some(block) = ack {
        let mut w = Writer::new(&mut out);
        block.encode(&mut w);
    }

    let mut included = 0;
    for msg in messages {
        let mut candidate = Vec::new();
        msg.encode(&mut candidate);
        if out.len() + candidate.len() > MAX_PACKET_SIZE {
            break;
        }
        out.extend_from_slice(&candidate);
        included += 1;
    }
    (out, &messages[included..])
}

/// One parsed inbound datagram: the header, an optional ack (for the
/// caller's `Channel::acknowledge`), and every message that decoded
/// cleanly before the stream ran out or hit something malformed.
pub struct ParsedPacket {
    pub header: PacketHeader,
    pub ack: Option<AckBlock>,
    pub messages: Vec<Message>,
}

/// Parses one inbound datagram. Returns `Ok(None)` for a packet with the
/// wrong application id/revision (silently dropped) or one whose ack
/// block itself doesn't fit (truncated before any application data —
/// also silently dropped, since there's nothing attributable to log).
/// A `Malformed` application message aborts the whole packet; any
/// messages decoded before that point are discarded with it.
pub fn parse_packet(data: &[u8]) -> Result<Option<ParsedPacket>, CoreError> {
    let Some((header, body)) = PacketHeader::decode(data)? else {
        return Ok(None);
    };

    let mut r = Reader::new(body);
    let ack = if header.flags.contains(PacketFlags::HAS_ACK) {
        match AckBlock::decode(&mut r) {
            Ok(block) => Some(block),
            Err(_) => return Ok(None),
        }
    } else {
        None
    };

    let mut messages = Vec::new();
    loop {
        match Message::decode(&mut r)? {
            Decoded::Message(msg) => messages.push(msg),
            Decoded::Truncated => break,
        }
    }

    Ok(Some(ParsedPacket { header, ack, messages }))
}

pub const fn max_body_size() -> usize {
    MAX_PACKET_SIZE - HEADER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NetworkId;

    #[test]
    fn round_trips_header_ack_and_messages() {
        let messages = vec![Message::Disconnect, Message::ClientLeave { identity: NetworkId { generation: 1, slot: 2 } }];
        let (packet, leftover) = build_packet(7, Some(AckBlock { ack: 3, bitfield: 0xF }), &messages);
        assert!(leftover.is_empty());

        let parsed = parse_packet(&packet).unwrap().unwrap();
        assert_eq!(parsed.header.sequence, 7);
        assert_eq!(parsed.ack, Some(AckBlock { ack: 3, bitfield: 0xF }));
        assert_eq!(parsed.messages, messages);
    }

    #[test]
    fn no_ack_block_when_none_supplied() {
        let messages = vec![Message::Disconnect];
        let (packet, _) = build_packet(1, None, &messages);
        let parsed = parse_packet(&packet).unwrap().unwrap();
        assert_eq!(parsed.ack, None);
        assert_eq!(parsed.messages, messages);
    }

    #[test]
    fn messages_that_overflow_max_packet_size_carry_over() {
        let long_name = "x".repeat(60);
        let messages: Vec<Message> = (0..20)
            .map(|_| Message::Connect { player_name: long_name.clone() })
            .collect();
        let (packet, leftover) = build_packet(0, None, &messages);
        assert!(packet.len() <= MAX_PACKET_SIZE);
        assert!(!leftover.is_empty());
    }

    #[test]
    fn wrong_application_id_parses_to_none() {
        let mut buf = vec![0xDE, 0xAD, 0xBE, 0xEF, 1, 0, 0, 0];
        buf.extend_from_slice(&[0u8; 4]);
        assert!(parse_packet(&buf).unwrap().is_none());
    }
}
