// session.rs — client-mode orchestration
//
// Mirror image of arena-server's session.rs: instead of owning the
// authoritative `Simulation` and a listen socket, a client-mode session
// owns the `Mirror` and a single `NetClient` peer connection. Roster/
// scoreboard bookkeeping is rebuilt from whatever the wire actually
// announces (`PlayerName`/`PlayerKill`) rather than read off a snapshot
// message, since the join snapshot this server emits carries only
// entity state, not a full roster (see DESIGN.md).

use std::collections::HashMap;
use std::net::SocketAddr;

use arena_common::identity::NetworkId;
use arena_common::math::Vec2;
use arena_common::message::Message;

use crate::mirror::Mirror;
use crate::net_client::{NetClient, ServerEvent};

/// What the client knows about one player, accumulated from `PlayerName`
/// and `PlayerKill` broadcasts rather than a roster snapshot.
#[derive(Debug, Clone, Default)]
pub struct RosterEntry {
    pub display_name: String,
    pub kills: u32,
    pub deaths: u32,
}

pub struct ChatLine {
    pub identity: NetworkId,
    pub text: String,
}

/// Caps retained chat history so a long session doesn't grow this
/// unboundedly; the HUD only ever shows the most recent handful anyway.
const MAX_CHAT_HISTORY: usize = 50;

pub struct ClientSession {
    pub net: NetClient,
    pub mirror: Mirror,
    pub roster: HashMap<NetworkId, RosterEntry>,
    pub identity: Option<NetworkId>,
    pub chat_log: Vec<ChatLine>,
    pending_input_sequence: u16,
}

impl ClientSession {
    pub fn connect(server_addr: SocketAddr, player_name: String, now: f32) -> Result<Self, arena_common::error::CoreError> {
        let mut net = NetClient::connect(server_addr, now)?;
        net.send(now, &[Message::Connect { player_name }], &[])?;
        Ok(Self {
            net,
            mirror: Mirror::new(),
            roster: HashMap::new(),
            identity: None,
            chat_log: Vec::new(),
            pending_input_sequence: 0,
        })
    }

    /// Polls the socket and folds every server event into the mirror/
    /// roster. Returns `true` once `Accepted` has been seen (the UI layer
    /// can use this to leave a "connecting" screen).
    pub fn poll(&mut self, now: f32) -> bool {
        let mut accepted = self.identity.is_some();
        for event in self.net.poll(now) {
            match event {
                ServerEvent::Accepted { identity, player_name } => {
                    self.identity = Some(identity);
                    self.roster.entry(identity).or_default().display_name = player_name;
                    accepted = true;
                }
                ServerEvent::Rejected { reason } => {
                    tracing::warn!(reason, "server rejected connection");
                }
                ServerEvent::ServerFull => {
                    tracing::warn!("server full");
                }
                ServerEvent::PlayerName { identity, name } => {
                    self.roster.entry(identity).or_default().display_name = name;
                }
                ServerEvent::ClientLeave { identity } => {
                    self.roster.remove(&identity);
                }
                ServerEvent::PlayerKill { killer, victim } => {
                    if killer != victim {
                        self.roster.entry(killer).or_default().kills += 1;
                    }
                    self.roster.entry(victim).or_default().deaths += 1;
                }
                ServerEvent::Chat { identity, text } => {
                    self.chat_log.push(ChatLine { identity, text });
                    if self.chat_log.len() > MAX_CHAT_HISTORY {
                        self.chat_log.remove(0);
                    }
                }
                ServerEvent::EntityAdd { network_id, variant, position, orientation, health } => {
                    self.mirror.apply_add(network_id, variant, position, orientation, health, now);
                }
                ServerEvent::EntityRemove { network_id } => {
                    self.mirror.apply_remove(network_id);
                }
                ServerEvent::EntityUpdate { network_id, position, orientation, health, .. } => {
                    self.mirror.apply_update(network_id, position, orientation, health, now);
                }
            }
        }
        self.net.tick(now);
        accepted
    }

    /// Sends this frame's input snapshot unreliably — a dropped input
    /// packet just means one tick's worth of stale movement, superseded
    /// by the next send.
    pub fn send_input(&mut self, now: f32, movement: Vec2, aim_angle: f32, fire_primary: bool, fire_secondary: bool) {
        let sequence = self.pending_input_sequence;
        self.pending_input_sequence = self.pending_input_sequence.wrapping_add(1);
        let snapshot = arena_common::entity::InputSnapshot { movement, aim_angle, fire_primary, fire_secondary };
        let _ = self.net.send(now, &[], &[Message::Input { sequence, snapshot }]);
    }

    pub fn send_chat(&mut self, now: f32, text: String) -> Result<(), arena_common::error::CoreError> {
        self.net.send(now, &[Message::Chat { identity: NetworkId::NONE, text }], &[])
    }

    /// Kills/deaths per known player, highest kills first — same ordering
    /// as the server's `Session::scoreboard`.
    pub fn scoreboard(&self) -> Vec<(NetworkId, RosterEntry)> {
        let mut rows: Vec<(NetworkId, RosterEntry)> = self.roster.iter().map(|(id, e)| (*id, e.clone())).collect();
        rows.sort_by(|a, b| b.1.kills.cmp(&a.1.kills).then(a.1.deaths.cmp(&b.1.deaths)));
        rows
    }

    pub fn disconnect(&mut self, now: f32) {
        let _ = self.net.send(now, &[Message::Disconnect], &[]);
        self.net.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_sends_initial_connect_message() {
        // Bind a throwaway "server" socket just to give `connect` a valid
        // address to target; nothing needs to actually receive it here.
        let sink = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = sink.local_addr().unwrap();
        let session = ClientSession::connect(addr, "Alice".into(), 0.0).unwrap();
        assert!(session.identity.is_none());
    }
}
