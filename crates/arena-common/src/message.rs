// message.rs — application message framing
//
// Each message is `variant-tag(u8) + payload`, payloads self-describing
// via the bounded-string rules in `codec.rs`. Messages flow both
// directions over one channel pair, so the tag space is unified rather
// than split by sender/receiver direction.

use crate::codec::{LengthPrefix, Reader, Writer};
use crate::entity::{CollectibleKind, DirtyFlags, EntityVariant, InputSnapshot, WeaponKind};
use crate::error::CoreError;
use crate::identity::NetworkId;
use crate::math::Vec2;

pub const MAX_NAME_LEN: usize = 64;
pub const MAX_CHAT_LEN: usize = 200;
pub const MAX_SERVER_NAME_LEN: usize = 32;

const KNOWN_TAGS: [u8; 14] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13];

/// Outcome of decoding one message out of a packet's message stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(Message),
    /// Not enough bytes remained for another message — the normal way a
    /// packet's message stream ends. Earlier `Decoded::Message`
    /// values already read from the same stream stay valid.
    Truncated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Connect { player_name: String },
    Disconnect,
    Reject { reason: String },
    ClientJoin { identity: NetworkId, player_name: String },
    ClientLeave { identity: NetworkId },
    PlayerName { identity: NetworkId, name: String },
    PlayerKill { killer: NetworkId, victim: NetworkId },
    Chat { identity: NetworkId, text: String },
    Input { sequence: u16, snapshot: InputSnapshot },
    EntityAdd { network_id: NetworkId, variant: EntityVariant, position: Vec2, orientation: f32, health: Option<i16> },
    EntityRemove { network_id: NetworkId },
    EntityUpdate {
        network_id: NetworkId,
        dirty: DirtyFlags,
        position: Vec2,
        orientation: f32,
        velocity: Vec2,
        health: Option<i16>,
    },
    ServerFull,
    Discovery { server_name: String, player_count: u8, max_players: u8, port: u16 },
}

fn tag(msg: &Message) -> u8 {
    match msg {
        Message::Connect { .. } => 0,
        Message::Disconnect => 1,
        Message::Reject { .. } => 2,
        Message::ClientJoin { .. } => 3,
        Message::ClientLeave { .. } => 4,
        Message::PlayerName { .. } => 5,
        Message::PlayerKill { .. } => 6,
        Message::Chat { .. } => 7,
        Message::Input { .. } => 8,
        Message::EntityAdd { .. } => 9,
        Message::EntityRemove { .. } => 10,
        Message::EntityUpdate { .. } => 11,
        Message::ServerFull => 12,
        Message::Discovery { .. } => 13,
    }
}

fn write_identity(w: &mut Writer, id: NetworkId) {
    w.write_u8(id.generation);
    w.write_u8(id.slot);
}

fn read_identity(r: &mut Reader) -> Result<NetworkId, crate::error::Overflow> {
    let generation = r.read_u8()?;
    let slot = r.read_u8()?;
    Ok(NetworkId { generation, slot })
}

fn write_variant(w: &mut Writer, variant: EntityVariant) {
    match variant {
        EntityVariant::None => w.write_u8(0),
        EntityVariant::Avatar => w.write_u8(1),
        EntityVariant::Bullet => w.write_u8(2),
        EntityVariant::Rocket => w.write_u8(3),
        EntityVariant::Mine => w.write_u8(4),
        EntityVariant::Shockwave => w.write_u8(5),
        EntityVariant::Collectible(kind) => {
            w.write_u8(6);
            write_collectible_kind(w, kind);
        }
        EntityVariant::Weapon(kind) => {
            w.write_u8(7);
            write_weapon_kind(w, kind);
        }
    }
}

fn read_variant(r: &mut Reader) -> Result<EntityVariant, crate::error::Overflow> {
    Ok(match r.read_u8()? {
        0 => EntityVariant::None,
        1 => EntityVariant::Avatar,
        2 => EntityVariant::Bullet,
        3 => EntityVariant::Rocket,
        4 => EntityVariant::Mine,
        5 => EntityVariant::Shockwave,
        6 => EntityVariant::Collectible(read_collectible_kind(r)?),
        7 => EntityVariant::Weapon(read_weapon_kind(r)?),
        _ => return Err(crate::error::Overflow),
    })
}

fn write_collectible_kind(w: &mut Writer, kind: CollectibleKind) {
    w.write_u8(match kind {
        CollectibleKind::Health => 0,
        CollectibleKind::Regeneration => 1,
        CollectibleKind::QuadDamage => 2,
        CollectibleKind::Invisibility => 3,
        CollectibleKind::Armor => 4,
    });
}

fn read_collectible_kind(r: &mut Reader) -> Result<CollectibleKind, crate::error::Overflow> {
    Ok(match r.read_u8()? {
        0 => CollectibleKind::Health,
        1 => CollectibleKind::Regeneration,
        2 => CollectibleKind::QuadDamage,
        3 => CollectibleKind::Invisibility,
        4 => CollectibleKind::Armor,
        _ => return Err(crate::error::Overflow),
    })
}

fn write_weapon_kind(w: &mut Writer, kind: WeaponKind) {
    w.write_u8(match kind {
        WeaponKind::MiniGun => 0,
        WeaponKind::RocketLauncher => 1,
    });
}

fn read_weapon_kind(r: &mut Reader) -> Result<WeaponKind, crate::error::Overflow> {
    Ok(match r.read_u8()? {
        0 => WeaponKind::MiniGun,
        1 => WeaponKind::RocketLauncher,
        _ => return Err(crate::error::Overflow),
    })
}

fn write_vec2(w: &mut Writer, v: Vec2) {
    w.write_f32(v[0]);
    w.write_f32(v[1]);
}

fn read_vec2(r: &mut Reader) -> Result<Vec2, crate::error::Overflow> {
    Ok([r.read_f32()?, r.read_f32()?])
}

impl Message {
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut w = Writer::new(out);
        w.write_u8(tag(self));
        match self {
            Message::Connect { player_name } => {
                w.write_bounded_string(player_name, MAX_NAME_LEN, LengthPrefix::U8);
            }
            Message::Disconnect | Message::ServerFull => {}
            Message::Reject { reason } => {
                w.write_bounded_string(reason, MAX_CHAT_LEN, LengthPrefix::U8);
            }
            Message::ClientJoin { identity, player_name } => {
                write_identity(&mut w, *identity);
                w.write_bounded_string(player_name, MAX_NAME_LEN, LengthPrefix::U8);
            }
            Message::ClientLeave { identity } => write_identity(&mut w, *identity),
            Message::PlayerName { identity, name } => {
                write_identity(&mut w, *identity);
                w.write_bounded_string(name, MAX_NAME_LEN, LengthPrefix::U8);
            }
            Message::PlayerKill { killer, victim } => {
                write_identity(&mut w, *killer);
                write_identity(&mut w, *victim);
            }
            Message::Chat { identity, text } => {
                write_identity(&mut w, *identity);
                w.write_bounded_string(text, MAX_CHAT_LEN, LengthPrefix::U16);
            }
            Message::Input { sequence, snapshot } => {
                w.write_u16(*sequence);
                write_vec2(&mut w, snapshot.movement);
                w.write_f32(snapshot.aim_angle);
                w.write_bool(snapshot.fire_primary);
                w.write_bool(snapshot.fire_secondary);
            }
            Message::EntityAdd { network_id, variant, position, orientation, health } => {
                write_identity(&mut w, *network_id);
                write_variant(&mut w, *variant);
                write_vec2(&mut w, *position);
                w.write_f32(*orientation);
                w.write_bool(health.is_some());
                if let Some(h) = health {
                    w.write_i16(*h);
                }
            }
            Message::EntityRemove { network_id } => write_identity(&mut w, *network_id),
            Message::EntityUpdate { network_id, dirty, position, orientation, velocity, health } => {
                write_identity(&mut w, *network_id);
                w.write_u16(dirty.bits);
                write_vec2(&mut w, *position);
                w.write_f32(*orientation);
                write_vec2(&mut w, *velocity);
                w.write_bool(health.is_some());
                if let Some(h) = health {
                    w.write_i16(*h);
                }
            }
            Message::Discovery { server_name, player_count, max_players, port } => {
                w.write_bounded_string(server_name, MAX_SERVER_NAME_LEN, LengthPrefix::U8);
                w.write_u8(*player_count);
                w.write_u8(*max_players);
                w.write_u16(*port);
            }
        }
    }

    /// Parses one message from `r`. These are two different conditions: a
    /// short read at the tail of a packet is clean `Decoded::Truncated`
    /// (stop parsing, keep whatever decoded before it), while an
    /// unrecognized tag is `Malformed` (the whole packet is bad — the
    /// caller should discard it and count it against the connection's
    /// error threshold).
    pub fn decode(r: &mut Reader) -> Result<Decoded, CoreError> {
        if !r.can_read(1) {
            return Ok(Decoded::Truncated);
        }
        match r.try_read(Self::decode_inner) {
            Ok(msg) => Ok(Decoded::Message(msg)),
            Err(crate::error::Overflow) => {
                // Cursor was rolled back by `try_read`; re-peek just the
                // tag (guaranteed to succeed, `can_read(1)` checked above)
                // to tell a short payload apart from a bad tag.
                let tag = r.try_read(|r| r.read_u8()).expect("can_read(1) checked above");
                if KNOWN_TAGS.contains(&tag) {
                    Ok(Decoded::Truncated)
                } else {
                    Err(CoreError::Malformed(format!("unrecognized message tag {tag}")))
                }
            }
        }
    }

    fn decode_inner(r: &mut Reader) -> Result<Message, crate::error::Overflow> {
        let tag = r.read_u8()?;
        Ok(match tag {
            0 => Message::Connect { player_name: r.read_bounded_string(LengthPrefix::U8)? },
            1 => Message::Disconnect,
            2 => Message::Reject { reason: r.read_bounded_string(LengthPrefix::U8)? },
            3 => Message::ClientJoin {
                identity: read_identity(r)?,
                player_name: r.read_bounded_string(LengthPrefix::U8)?,
            },
            4 => Message::ClientLeave { identity: read_identity(r)? },
            5 => Message::PlayerName { identity: read_identity(r)?, name: r.read_bounded_string(LengthPrefix::U8)? },
            6 => Message::PlayerKill { killer: read_identity(r)?, victim: read_identity(r)? },
            7 => Message::Chat { identity: read_identity(r)?, text: r.read_bounded_string(LengthPrefix::U16)? },
            8 => {
                let sequence = r.read_u16()?;
                let movement = read_vec2(r)?;
                let aim_angle = r.read_f32()?;
                let fire_primary = r.read_bool()?;
                let fire_secondary = r.read_bool()?;
                Message::Input { sequence, snapshot: InputSnapshot { movement, aim_angle, fire_primary, fire_secondary } }
            }
            9 => {
                let network_id = read_identity(r)?;
                let variant = read_variant(r)?;
                let position = read_vec2(r)?;
                let orientation = r.read_f32()?;
                let health = if r.read_bool()? { Some(r.read_i16()?) } else { None };
                Message::EntityAdd { network_id, variant, position, orientation, health }
            }
            10 => Message::EntityRemove { network_id: read_identity(r)? },
            11 => {
                let network_id = read_identity(r)?;
                let dirty = DirtyFlags::from_bits_truncate(r.read_u16()?);
                let position = read_vec2(r)?;
                let orientation = r.read_f32()?;
                let velocity = read_vec2(r)?;
                let health = if r.read_bool()? { Some(r.read_i16()?) } else { None };
                Message::EntityUpdate { network_id, dirty, position, orientation, velocity, health }
            }
            12 => Message::ServerFull,
            13 => {
                let server_name = r.read_bounded_string(LengthPrefix::U8)?;
                let player_count = r.read_u8()?;
                let max_players = r.read_u8()?;
                let port = r.read_u16()?;
                Message::Discovery { server_name, player_count, max_players, port }
            }
            _ => return Err(crate::error::Overflow),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let mut buf = Vec::new();
        msg.encode(&mut buf);
        let mut r = Reader::new(&buf);
        assert_eq!(Message::decode(&mut r).unwrap(), Decoded::Message(msg));
    }

    #[test]
    fn connect_round_trips() {
        round_trip(Message::Connect { player_name: "Alice".into() });
    }

    #[test]
    fn entity_add_round_trips_with_health() {
        round_trip(Message::EntityAdd {
            network_id: NetworkId { generation: 1, slot: 2 },
            variant: EntityVariant::Avatar,
            position: [1.0, 2.0],
            orientation: 0.5,
            health: Some(100),
        });
    }

    #[test]
    fn entity_add_round_trips_without_health() {
        round_trip(Message::EntityAdd {
            network_id: NetworkId { generation: 0, slot: 5 },
            variant: EntityVariant::Collectible(CollectibleKind::QuadDamage),
            position: [0.0, 0.0],
            orientation: 0.0,
            health: None,
        });
    }

    #[test]
    fn entity_update_round_trips() {
        round_trip(Message::EntityUpdate {
            network_id: NetworkId { generation: 3, slot: 7 },
            dirty: DirtyFlags::TRANSFORM | DirtyFlags::HEALTH,
            position: [10.0, -5.0],
            orientation: 1.2,
            velocity: [1.0, 0.0],
            health: Some(50),
        });
    }

    #[test]
    fn input_round_trips() {
        round_trip(Message::Input {
            sequence: 42,
            snapshot: InputSnapshot { movement: [0.5, -0.5], aim_angle: 1.0, fire_primary: true, fire_secondary: false },
        });
    }

    #[test]
    fn discovery_round_trips() {
        round_trip(Message::Discovery { server_name: "S".into(), player_count: 2, max_players: 8, port: 32455 });
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let buf = [255u8];
        let mut r = Reader::new(&buf);
        assert!(matches!(Message::decode(&mut r), Err(CoreError::Malformed(_))));
    }

    #[test]
    fn truncated_message_does_not_commit_partial_read() {
        // Tag 6 (PlayerKill) declares two identities but the buffer only
        // has one byte of the first — decode must report a clean
        // truncation (not an error) and leave nothing committed for the
        // caller's packet-stream loop to choke on.
        let buf = [6u8, 1];
        let mut r = Reader::new(&buf);
        assert_eq!(Message::decode(&mut r).unwrap(), Decoded::Truncated);
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn empty_stream_is_truncated_not_an_error() {
        let buf: [u8; 0] = [];
        let mut r = Reader::new(&buf);
        assert_eq!(Message::decode(&mut r).unwrap(), Decoded::Truncated);
    }
}
