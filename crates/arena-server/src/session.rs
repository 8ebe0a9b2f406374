// session.rs — server-mode orchestration
//
// The roster (`players: HashMap<NetworkId, Player>`) is keyed by the
// same generational `NetworkId` the simulation already hands out, so
// there's no separate slot-index bookkeeping to keep in sync with a
// fixed-size client-slot array.

use std::collections::HashMap;

use arena_common::entity::{InputSnapshot, Player, PlayerKind};
use arena_common::error::CoreError;
use arena_common::identity::NetworkId;
use arena_common::math::Vec2;

use crate::simulation::Simulation;

const TEAM_COLORS: [[u8; 3]; 4] = [[220, 50, 50], [60, 120, 220], [60, 200, 90], [230, 200, 40]];

/// One slot of the scoreboard.
#[derive(Debug, Clone, Copy)]
pub struct ScoreboardRow {
    pub identity: NetworkId,
    pub kills: u32,
    pub deaths: u32,
}

pub struct Session {
    pub simulation: Simulation,
    pub players: HashMap<NetworkId, Player>,
    pub max_players: u8,
    pub server_name: String,
    spawn_points: Vec<Vec2>,
    next_spawn_point: usize,
}

impl Session {
    pub fn new(server_name: String, max_players: u8, bounds_min: Vec2, bounds_max: Vec2, spawn_points: Vec<Vec2>, rng_seed: u64) -> Self {
        // A handful of projectiles in flight at once needs room beyond
        // `max_players` identities; the entity model puts no hard cap on
        // concurrent projectiles, so size generously.
        let max_entities = (max_players as u16 * 8).min(255) as u8;
        Self {
            simulation: Simulation::new(max_entities, bounds_min, bounds_max, rng_seed),
            players: HashMap::new(),
            max_players,
            server_name,
            spawn_points: if spawn_points.is_empty() { vec![[0.0, 0.0]] } else { spawn_points },
            next_spawn_point: 0,
        }
    }

    fn next_spawn_position(&mut self) -> Vec2 {
        let p = self.spawn_points[self.next_spawn_point % self.spawn_points.len()];
        self.next_spawn_point += 1;
        p
    }

    /// Admits a new player, spawning their avatar immediately. Rejects
    /// with `Capacity` once the roster is full — same condition the
    /// protocol layer turns into a `Message::ServerFull` reply.
    pub fn join(&mut self, display_name: String) -> Result<NetworkId, CoreError> {
        if self.players.len() >= self.max_players as usize {
            return Err(CoreError::Capacity);
        }
        let position = self.next_spawn_position();
        let (node, identity) = self.simulation.spawn_avatar(position).ok_or(CoreError::Capacity)?;
        let team_color = TEAM_COLORS[self.players.len() % TEAM_COLORS.len()];
        let mut player = Player::new(identity, PlayerKind::Human, display_name, team_color);
        player.avatar = Some(node);
        self.players.insert(identity, player);
        Ok(identity)
    }

    /// Removes a player and their avatar, if any, from the session. The
    /// caller (`main.rs`) is responsible for telling other peers the
    /// player is gone (`ClientLeave`/`EntityRemove`) before this runs,
    /// since the avatar's removal here bypasses `Simulation::step`'s
    /// `removed_this_tick` tracking that `replicate::tick_deltas` reads.
    pub fn leave(&mut self, identity: NetworkId) {
        if let Some(player) = self.players.remove(&identity) {
            if let Some(node) = player.avatar {
                self.simulation.graph.remove(node);
                self.simulation.avatars.remove(&identity);
            }
            self.simulation.known_replicated.remove(&identity);
            self.simulation.identities.recycle(identity);
        }
    }

    /// Advances the simulation one fixed tick and processes expired
    /// respawn timers. `inputs` is this tick's decoded `Message::Input`
    /// per connected avatar.
    pub fn advance(&mut self, dt: f32, inputs: &HashMap<NetworkId, InputSnapshot>) {
        self.simulation.step(dt, inputs, &mut self.players);
        // Score this tick's deaths before `replicate::tick_deltas` drains
        // `kills_this_tick` into `PlayerKill` broadcasts.
        for &(killer, victim) in &self.simulation.kills_this_tick {
            self.record_kill(killer, victim);
        }
        self.process_respawns();
    }

    fn process_respawns(&mut self) {
        let ready: Vec<NetworkId> = self
            .players
            .iter()
            .filter(|(_, p)| !p.is_alive() && p.respawn_remaining.is_some_and(|r| r <= 0.0))
            .map(|(id, _)| *id)
            .collect();
        for identity in ready {
            let position = self.next_spawn_position();
            let Some((node, _)) = self.simulation.spawn_avatar_with_identity(identity, position) else { continue };
            if let Some(player) = self.players.get_mut(&identity) {
                player.avatar = Some(node);
                player.respawn_remaining = None;
            }
        }
    }

    pub fn record_kill(&mut self, killer: NetworkId, victim: NetworkId) {
        if let Some(player) = self.players.get_mut(&killer) {
            if killer != victim {
                player.kills += 1;
            }
        }
    }

    /// Kills/deaths per connected player, highest kills first.
    pub fn scoreboard(&self) -> Vec<ScoreboardRow> {
        let mut rows: Vec<ScoreboardRow> = self
            .players
            .values()
            .map(|p| ScoreboardRow { identity: p.identity, kills: p.kills, deaths: p.deaths })
            .collect();
        rows.sort_by(|a, b| b.kills.cmp(&a.kills).then(a.deaths.cmp(&b.deaths)));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(max_players: u8) -> Session {
        Session::new("Arena".into(), max_players, [0.0, 0.0], [200.0, 200.0], vec![[10.0, 10.0], [190.0, 190.0]], 7)
    }

    #[test]
    fn join_spawns_an_avatar_immediately() {
        let mut sess = session(4);
        let identity = sess.join("Alice".into()).unwrap();
        let player = sess.players.get(&identity).unwrap();
        assert!(player.is_alive());
    }

    #[test]
    fn join_beyond_capacity_is_rejected() {
        let mut sess = session(1);
        sess.join("Alice".into()).unwrap();
        assert!(matches!(sess.join("Bob".into()), Err(CoreError::Capacity)));
    }

    #[test]
    fn leave_frees_the_roster_slot_for_a_new_join() {
        let mut sess = session(1);
        let identity = sess.join("Alice".into()).unwrap();
        sess.leave(identity);
        assert!(sess.join("Bob".into()).is_ok());
    }

    #[test]
    fn dead_player_respawns_after_timer_elapses() {
        let mut sess = session(2);
        let identity = sess.join("Alice".into()).unwrap();
        sess.simulation.avatars.get_mut(&identity).unwrap().health = 0;
        sess.advance(0.1, &HashMap::new());
        assert!(!sess.players.get(&identity).unwrap().is_alive());

        sess.advance(arena_common::entity::RESPAWN_DELAY_SECS + 0.1, &HashMap::new());
        assert!(sess.players.get(&identity).unwrap().is_alive());
    }

    #[test]
    fn scoreboard_orders_by_kills_descending() {
        let mut sess = session(4);
        let a = sess.join("Alice".into()).unwrap();
        let b = sess.join("Bob".into()).unwrap();
        sess.record_kill(b, a);
        sess.record_kill(b, a);
        let rows = sess.scoreboard();
        assert_eq!(rows[0].identity, b);
        assert_eq!(rows[0].kills, 2);
    }
}
