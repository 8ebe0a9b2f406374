// simulation.rs — fixed-timestep authoritative tick
//
// Decouples the authoritative tick rate from the caller's actual frame
// cadence via a residual accumulator, expressed in seconds/Hz to match
// this crate's `Clock` trait rather than milliseconds.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};

use arena_common::behavior::{BehaviorContext, RngSource};
use arena_common::collision::broad_phase;
use arena_common::entity::{
    self, ActivePowerUp, AvatarState, CollectibleKind, EntityVariant, InputSnapshot, Player, RESPAWN_DELAY_SECS,
};
use arena_common::identity::{IdentityAllocator, NetworkId};
use arena_common::math::{angle_to_vec2, vec2_scale, Vec2};
use arena_common::scene::{execute_behaviors, NodeId, SceneGraph};

pub const DEFAULT_TICK_RATE_HZ: f32 = 30.0;
pub const MAX_CATCHUP_TICKS: u32 = 5;

/// Energy cost and muzzle speed per shot, gated against a single
/// `energy: [0,1]` gauge rather than a discrete ammo count.
const PRIMARY_ENERGY_COST: f32 = 0.1;
const PRIMARY_MUZZLE_SPEED: f32 = 400.0;
const SECONDARY_ENERGY_COST: f32 = 0.5;
const SECONDARY_MUZZLE_SPEED: f32 = 250.0;
const WEAPON_ENERGY_RECHARGE_PER_SEC: f32 = 0.2;

/// Decouples the authoritative tick rate from however often `advance` is
/// called.
pub struct TickTiming {
    tick_rate_hz: f32,
    tick_duration: f32,
    residual: f32,
}

impl TickTiming {
    pub fn new(tick_rate_hz: f32) -> Self {
        Self { tick_rate_hz, tick_duration: 1.0 / tick_rate_hz, residual: 0.0 }
    }

    pub fn tick_duration(&self) -> f32 {
        self.tick_duration
    }

    pub fn tick_rate_hz(&self) -> f32 {
        self.tick_rate_hz
    }

    /// Feeds `elapsed` seconds into the accumulator and returns how many
    /// fixed ticks should run now. Caps the catch-up burst at
    /// `MAX_CATCHUP_TICKS` and drops the remaining residual rather than
    /// letting a long stall queue up an unbounded burst of ticks.
    pub fn accumulate(&mut self, elapsed: f32) -> u32 {
        self.residual += elapsed;
        let mut ticks = 0;
        while self.residual >= self.tick_duration && ticks < MAX_CATCHUP_TICKS {
            self.residual -= self.tick_duration;
            ticks += 1;
        }
        if ticks == MAX_CATCHUP_TICKS {
            self.residual = 0.0;
        }
        ticks
    }
}

/// Wraps `rand`'s `StdRng` behind `RngSource`, seeded explicitly rather
/// than drawn from `rand::thread_rng` so AI wander/fire decisions are
/// reproducible in tests.
struct GameRng(rand::rngs::StdRng);

impl GameRng {
    fn new(seed: u64) -> Self {
        Self(rand::rngs::StdRng::seed_from_u64(seed))
    }
}

impl RngSource for GameRng {
    fn unit_f32(&mut self) -> f32 {
        self.0.gen::<f32>()
    }
}

/// Owns the authoritative scene graph and the avatar-state side table
/// (kept out of `SceneNodeData` since only `MAX_PLAYERS` avatars ever
/// exist concurrently while every other variant would pay for unused
/// fields — see DESIGN.md).
pub struct Simulation {
    pub graph: SceneGraph,
    pub identities: IdentityAllocator,
    pub avatars: HashMap<NetworkId, AvatarState>,
    pub bounds_min: Vec2,
    pub bounds_max: Vec2,
    /// Network identities of entities removed during the most recent
    /// `step`, for `replicate::tick_deltas` to turn into `EntityRemove`
    /// messages. Repopulated (not appended) at the start of every `step`.
    pub removed_this_tick: Vec<NetworkId>,
    /// `(killer, victim)` pairs from avatars that died this tick, for
    /// `Session::advance` to score and `replicate::tick_deltas` to turn
    /// into `PlayerKill` broadcasts. Repopulated at the start of every
    /// `step`; drained by `replicate::tick_deltas`.
    pub kills_this_tick: Vec<(NetworkId, NetworkId)>,
    /// Network identities `replicate::tick_deltas` has already announced
    /// via `EntityAdd`. An entity not yet in this set — a second player's
    /// avatar, a projectile fired since the last broadcast — is reported
    /// as `EntityAdd` the first time `tick_deltas` sees it rather than an
    /// `EntityUpdate` a fresh client has never heard of.
    pub known_replicated: std::collections::HashSet<NetworkId>,
    rng: GameRng,
}

impl Simulation {
    pub fn new(max_entities: u8, bounds_min: Vec2, bounds_max: Vec2, rng_seed: u64) -> Self {
        Self {
            graph: SceneGraph::new(),
            identities: IdentityAllocator::new(max_entities),
            avatars: HashMap::new(),
            bounds_min,
            bounds_max,
            removed_this_tick: Vec::new(),
            kills_this_tick: Vec::new(),
            known_replicated: std::collections::HashSet::new(),
            rng: GameRng::new(rng_seed),
        }
    }

    pub fn spawn_avatar(&mut self, position: Vec2) -> Option<(NodeId, NetworkId)> {
        let network_id = self.identities.allocate()?;
        Some((self.spawn_avatar_node(network_id, position), network_id))
    }

    /// Respawns a returning player's avatar under their existing identity
    /// rather than handing out a fresh one, so kill/death attribution and
    /// the player's `NetworkId` stay stable across deaths.
    pub fn spawn_avatar_with_identity(&mut self, network_id: NetworkId, position: Vec2) -> Option<(NodeId, NetworkId)> {
        if !self.identities.is_current(network_id) {
            return None;
        }
        Some((self.spawn_avatar_node(network_id, position), network_id))
    }

    fn spawn_avatar_node(&mut self, network_id: NetworkId, position: Vec2) -> NodeId {
        let node = self.graph.create_node();
        self.graph.add(node, self.graph.root());
        if let Some(data) = self.graph.node_mut(node) {
            data.local.position = position;
            data.variant = EntityVariant::Avatar;
            data.collider_radius = EntityVariant::Avatar.default_collider_radius();
            data.network_id = network_id;
        }
        self.graph.add_behavior(node, arena_common::behavior::Behavior::PlayerInput);
        self.avatars.insert(network_id, AvatarState::default());
        node
    }

    /// Detaches `node`. Identity recycling happens centrally in `step`'s
    /// removed-entity sweep rather than here, since most removals (wall
    /// exit, projectile expiry, collision resolution) go straight through
    /// `SceneGraph::remove` without passing through this helper at all.
    fn remove_entity(&mut self, node: NodeId) {
        if let Some(data) = self.graph.node(node) {
            let network_id = data.network_id;
            self.graph.remove(node);
            self.avatars.remove(&network_id);
        }
    }

    fn spawn_projectile(&mut self, owner: NetworkId, variant: EntityVariant, position: Vec2, aim_angle: f32, speed: f32) {
        let Some(network_id) = self.identities.allocate() else { return };
        let node = self.graph.create_node();
        self.graph.add(node, self.graph.root());
        if let Some(data) = self.graph.node_mut(node) {
            data.local.position = position;
            data.local.orientation = aim_angle;
            data.variant = variant;
            data.collider_radius = variant.default_collider_radius();
            data.velocity = vec2_scale(angle_to_vec2(aim_angle), speed);
            data.network_id = network_id;
            data.owner = Some(owner);
        }
    }

    /// Spawns a bullet/rocket for every avatar whose input requests fire
    /// and whose weapon slot has energy, then lets the slot recharge.
    fn fire_weapons(&mut self, dt: f32, inputs: &HashMap<NetworkId, InputSnapshot>, players: &HashMap<NetworkId, Player>) {
        struct Shot {
            owner: NetworkId,
            variant: EntityVariant,
            position: Vec2,
            aim_angle: f32,
            speed: f32,
        }
        let mut shots = Vec::new();
        for (&net_id, player) in players.iter() {
            let Some(node) = player.avatar else { continue };
            let Some(input) = inputs.get(&net_id) else { continue };
            let position = match self.graph.node(node) {
                Some(data) => data.local.position,
                None => continue,
            };
            let Some(state) = self.avatars.get_mut(&net_id) else { continue };

            if let Some(slot) = &mut state.primary {
                slot.energy = (slot.energy + WEAPON_ENERGY_RECHARGE_PER_SEC * dt).min(1.0);
                if input.fire_primary && slot.energy >= PRIMARY_ENERGY_COST {
                    slot.energy -= PRIMARY_ENERGY_COST;
                    shots.push(Shot { owner: net_id, variant: EntityVariant::Bullet, position, aim_angle: input.aim_angle, speed: PRIMARY_MUZZLE_SPEED });
                }
            }
            if let Some(slot) = &mut state.secondary {
                slot.energy = (slot.energy + WEAPON_ENERGY_RECHARGE_PER_SEC * dt).min(1.0);
                if input.fire_secondary && slot.energy >= SECONDARY_ENERGY_COST {
                    slot.energy -= SECONDARY_ENERGY_COST;
                    shots.push(Shot { owner: net_id, variant: EntityVariant::Rocket, position, aim_angle: input.aim_angle, speed: SECONDARY_MUZZLE_SPEED });
                }
            }
        }
        for shot in shots {
            self.spawn_projectile(shot.owner, shot.variant, shot.position, shot.aim_angle, shot.speed);
        }
    }

    /// Runs one fixed tick: behaviors, integration, collision, deferred
    /// drain. `inputs` is the latest snapshot per avatar player,
    /// collected from decoded `Message::Input` for this tick.
    pub fn step(&mut self, dt: f32, inputs: &HashMap<NetworkId, InputSnapshot>, players: &mut HashMap<NetworkId, Player>) {
        self.removed_this_tick.clear();
        self.kills_this_tick.clear();
        let root = self.graph.root();

        // Advance behaviors: input consumption, AI steering.
        let node_inputs: HashMap<NodeId, InputSnapshot> = self
            .avatars
            .keys()
            .filter_map(|net_id| {
                let node = players.get(net_id)?.avatar?;
                let snapshot = inputs.get(net_id).copied()?;
                Some((node, snapshot))
            })
            .collect();

        // `execute_behaviors` advances every attached behavior in one
        // pre-order walk; since each node only needs its own input, run
        // it once per node rather than threading a map through `advance`.
        for (&node, snapshot) in &node_inputs {
            let mut ctx = BehaviorContext { input: Some(snapshot), rng: &mut self.rng };
            let _ = execute_behaviors(&mut self.graph, node, dt, &mut ctx);
        }
        let mut idle_ctx = BehaviorContext { input: None, rng: &mut self.rng };
        let _ = execute_behaviors(&mut self.graph, root, dt, &mut idle_ctx);

        self.fire_weapons(dt, inputs, players);

        // server_update for every entity (pre-order).
        let mut nodes = Vec::new();
        {
            let mut it = self.graph.pre_order(root);
            while let Ok(Some(id)) = it.next() {
                nodes.push(id);
            }
        }
        // Snapshot network ids before any removal so a later disappearance
        // can still be reported as an `EntityRemove`.
        let tracked: Vec<(NodeId, NetworkId)> = nodes
            .iter()
            .filter(|&&id| id != root)
            .filter_map(|&id| self.graph.node(id).map(|n| (id, n.network_id)))
            .filter(|(_, net_id)| !net_id.is_none())
            .collect();

        for &node in &nodes {
            if node == root {
                continue;
            }
            entity::server_update(&mut self.graph, node, dt, self.bounds_min, self.bounds_max);
        }
        self.tick_avatar_timers(dt, players);

        // Broad-phase collision + resolution. Out-of-bounds removal for
        // non-clamped variants already happened inside `server_update`'s
        // integration pass above.
        let pairs = broad_phase(&self.graph, &nodes);
        for (a, b) in pairs {
            entity::handle_collision(&mut self.graph, &mut self.avatars, a.node, b.node);
        }

        self.reap_dead_avatars(players);

        for (node, net_id) in tracked {
            if self.graph.node(node).is_none() {
                self.removed_this_tick.push(net_id);
                self.known_replicated.remove(&net_id);
                self.identities.recycle(net_id);
            }
        }

        // The scene graph's deferred queue is already applied as each
        // enumerator dropped above; nothing left to do explicitly.
    }

    fn tick_avatar_timers(&mut self, dt: f32, players: &mut HashMap<NetworkId, Player>) {
        for (&net_id, state) in self.avatars.iter_mut() {
            if let Some(power_up) = &mut state.power_up {
                power_up.remaining -= dt;
                if power_up.remaining <= 0.0 {
                    state.power_up = None;
                }
            }
            if let Some(ActivePowerUp { kind: CollectibleKind::Regeneration, .. }) = state.power_up {
                state.regen_accum += dt;
                while state.regen_accum >= 1.0 {
                    state.regen_accum -= 1.0;
                    state.health = (state.health + 5).min(state.health_cap());
                }
            }
            let _ = net_id;
        }
        for player in players.values_mut() {
            if let Some(remaining) = &mut player.respawn_remaining {
                *remaining -= dt;
            }
        }
    }

    fn reap_dead_avatars(&mut self, players: &mut HashMap<NetworkId, Player>) {
        let dead: Vec<(NetworkId, Option<NetworkId>)> =
            self.avatars.iter().filter(|(_, s)| s.health <= 0).map(|(id, s)| (*id, s.last_damaged_by)).collect();
        for (net_id, killer) in dead {
            if let Some(player) = players.get_mut(&net_id) {
                if let Some(node) = player.avatar.take() {
                    self.remove_entity(node);
                }
                player.deaths += 1;
                player.respawn_remaining = Some(RESPAWN_DELAY_SECS);
                self.kills_this_tick.push((killer.unwrap_or(net_id), net_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_timing_accumulates_whole_ticks_only() {
        let mut timing = TickTiming::new(30.0);
        assert_eq!(timing.accumulate(1.0 / 30.0), 1);
        assert_eq!(timing.accumulate(0.0), 0);
    }

    #[test]
    fn tick_timing_decoupled_from_caller_frequency() {
        let mut timing = TickTiming::new(30.0);
        let ticks = timing.accumulate(3.0 / 30.0);
        assert_eq!(ticks, 3);
    }

    #[test]
    fn catchup_burst_is_capped() {
        let mut timing = TickTiming::new(30.0);
        let ticks = timing.accumulate(100.0);
        assert_eq!(ticks, MAX_CATCHUP_TICKS);
    }

    #[test]
    fn spawn_avatar_allocates_identity_and_node() {
        let mut sim = Simulation::new(16, [0.0, 0.0], [100.0, 100.0], 1);
        let (node, net_id) = sim.spawn_avatar([5.0, 5.0]).unwrap();
        assert!(sim.graph.node(node).is_some());
        assert!(!net_id.is_none());
        assert!(sim.avatars.contains_key(&net_id));
    }

    #[test]
    fn avatar_clamped_to_bounds_during_step() {
        let mut sim = Simulation::new(16, [0.0, 0.0], [10.0, 10.0], 1);
        let (node, _net_id) = sim.spawn_avatar([5.0, 5.0]).unwrap();
        if let Some(data) = sim.graph.node_mut(node) {
            data.velocity = [1000.0, 0.0];
        }
        let mut players = HashMap::new();
        sim.step(1.0, &HashMap::new(), &mut players);
        let pos = sim.graph.node(node).unwrap().local.position[0];
        assert!(pos <= 10.0);
    }

    #[test]
    fn firing_primary_weapon_spawns_a_bullet() {
        let mut sim = Simulation::new(16, [0.0, 0.0], [100.0, 100.0], 1);
        let (node, net_id) = sim.spawn_avatar([10.0, 10.0]).unwrap();
        let mut player = Player::new(net_id, arena_common::entity::PlayerKind::Human, "A".into(), [0, 0, 0]);
        player.avatar = Some(node);
        let mut players = HashMap::new();
        players.insert(net_id, player);
        let mut inputs = HashMap::new();
        inputs.insert(net_id, InputSnapshot { fire_primary: true, ..Default::default() });

        sim.fire_weapons(0.1, &inputs, &players);

        let mut count = 0;
        let mut it = sim.graph.pre_order(sim.graph.root());
        while let Ok(Some(id)) = it.next() {
            if id != sim.graph.root() && matches!(sim.graph.node(id).unwrap().variant, EntityVariant::Bullet) {
                count += 1;
            }
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn fatal_hit_records_killer_and_victim() {
        let mut sim = Simulation::new(16, [0.0, 0.0], [100.0, 100.0], 1);
        let (node, victim) = sim.spawn_avatar([0.0, 0.0]).unwrap();
        let mut player = Player::new(victim, arena_common::entity::PlayerKind::Human, "V".into(), [0, 0, 0]);
        player.avatar = Some(node);
        let mut players = HashMap::new();
        players.insert(victim, player);

        let killer = NetworkId { generation: 0, slot: 9 };
        sim.avatars.get_mut(&victim).unwrap().health = 0;
        sim.avatars.get_mut(&victim).unwrap().last_damaged_by = Some(killer);
        sim.reap_dead_avatars(&mut players);

        assert_eq!(sim.kills_this_tick, vec![(killer, victim)]);
    }

    #[test]
    fn self_inflicted_death_reports_killer_equal_to_victim() {
        let mut sim = Simulation::new(16, [0.0, 0.0], [100.0, 100.0], 1);
        let (node, victim) = sim.spawn_avatar([0.0, 0.0]).unwrap();
        let mut player = Player::new(victim, arena_common::entity::PlayerKind::Human, "V".into(), [0, 0, 0]);
        player.avatar = Some(node);
        let mut players = HashMap::new();
        players.insert(victim, player);

        sim.avatars.get_mut(&victim).unwrap().health = 0;
        sim.reap_dead_avatars(&mut players);

        assert_eq!(sim.kills_this_tick, vec![(victim, victim)]);
    }

    #[test]
    fn power_up_expires_after_duration() {
        let mut sim = Simulation::new(16, [0.0, 0.0], [100.0, 100.0], 1);
        let (_node, net_id) = sim.spawn_avatar([0.0, 0.0]).unwrap();
        sim.avatars.get_mut(&net_id).unwrap().power_up =
            Some(ActivePowerUp { kind: CollectibleKind::QuadDamage, remaining: 0.5 });
        let mut players = HashMap::new();
        sim.tick_avatar_timers(1.0, &mut players);
        assert!(sim.avatars.get(&net_id).unwrap().power_up.is_none());
    }
}
