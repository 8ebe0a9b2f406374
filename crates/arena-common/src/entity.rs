// entity.rs — entity variants and per-tick update dispatch
//
// Every kind of thing in the world shares one tag (`EntityVariant`) and
// is updated through a free-function table keyed on that tag rather than
// through trait objects — one tag, one dispatch table, no vtables.

use crate::identity::NetworkId;
use crate::math::{vec2_clamp, Vec2};
use crate::scene::{NodeId, SceneGraph};

pub const MAX_PLAYERS: usize = 8;
pub const MAX_AVATAR_HEALTH: i16 = 200;
pub const DEFAULT_AVATAR_HEALTH: i16 = 100;
pub const RESPAWN_DELAY_SECS: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectibleKind {
    Health,
    Regeneration,
    QuadDamage,
    Invisibility,
    Armor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaponKind {
    MiniGun,
    RocketLauncher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityVariant {
    /// Placeholder for pool slots not currently carrying an entity (the
    /// scene root, a just-allocated-but-not-yet-attached node).
    #[default]
    None,
    Avatar,
    Bullet,
    Rocket,
    Mine,
    Shockwave,
    Collectible(CollectibleKind),
    Weapon(WeaponKind),
}

impl EntityVariant {
    /// Collision broad-phase cell sizing uses `2 * max_radius` over all
    /// live variants; this is the per-variant contribution.
    pub fn default_collider_radius(self) -> f32 {
        match self {
            EntityVariant::None => 0.0,
            EntityVariant::Avatar => 16.0,
            EntityVariant::Bullet => 2.0,
            EntityVariant::Rocket => 4.0,
            EntityVariant::Mine => 6.0,
            EntityVariant::Shockwave => 48.0,
            EntityVariant::Collectible(_) => 10.0,
            EntityVariant::Weapon(_) => 10.0,
        }
    }

    /// Projectiles are removed on leaving the arena; avatars are
    /// clamped back inside it.
    pub fn clamped_at_bounds(self) -> bool {
        matches!(self, EntityVariant::Avatar)
    }
}

bitflags::bitflags! {
    /// Which replicated fields of a node changed since the last emitted
    /// snapshot. Consumed by `arena-server::replicate` to decide which
    /// `EntityUpdate` sub-fields to include.
    #[derive(Default)]
    pub struct DirtyFlags: u16 {
        const TRANSFORM = 1 << 0;
        const VELOCITY  = 1 << 1;
        const HEALTH    = 1 << 2;
        const POWER_UP  = 1 << 3;
        const WEAPON    = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerKind {
    Human,
    Bot,
    ServerOwned,
}

/// The latest per-tick input for a player-controlled avatar, read by the
/// `PlayerInput` behavior. Produced by `arena-server::net_server` from
/// decoded `Message::Input` payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputSnapshot {
    pub movement: Vec2,
    pub aim_angle: f32,
    pub fire_primary: bool,
    pub fire_secondary: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct WeaponSlot {
    pub kind: WeaponKind,
    /// Energy level in `[0, 1]`; firing consumes energy, recharges over
    /// time.
    pub energy: f32,
    pub next_fire_at: f32,
}

impl WeaponSlot {
    pub fn new(kind: WeaponKind) -> Self {
        Self { kind, energy: 1.0, next_fire_at: 0.0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ActivePowerUp {
    pub kind: CollectibleKind,
    pub remaining: f32,
}

/// Avatar-only state, carried on `SceneNodeData` alongside the fields
/// every variant needs (position, velocity, collider radius). Kept as
/// its own struct rather than flattened further, since bullets/rockets/
/// collectibles never touch health, power-ups, or weapon slots.
#[derive(Debug, Clone)]
pub struct AvatarState {
    pub health: i16,
    pub power_up: Option<ActivePowerUp>,
    pub primary: Option<WeaponSlot>,
    pub secondary: Option<WeaponSlot>,
    pub regen_accum: f32,
    /// Owner of the last projectile/collision that damaged this avatar.
    /// Read when the avatar dies to attribute the `PlayerKill` broadcast;
    /// `None` at death means a self-inflicted or environmental kill,
    /// reported with `killer == victim`.
    pub last_damaged_by: Option<NetworkId>,
}

impl Default for AvatarState {
    fn default() -> Self {
        Self {
            health: DEFAULT_AVATAR_HEALTH,
            power_up: None,
            primary: Some(WeaponSlot::new(WeaponKind::MiniGun)),
            secondary: None,
            regen_accum: 0.0,
            last_damaged_by: None,
        }
    }
}

impl AvatarState {
    /// Cap rises while Regeneration is active.
    pub fn health_cap(&self) -> i16 {
        match self.power_up {
            Some(ActivePowerUp { kind: CollectibleKind::Regeneration, .. }) => MAX_AVATAR_HEALTH,
            _ => DEFAULT_AVATAR_HEALTH,
        }
    }

    /// Armor halves incoming damage while active.
    pub fn apply_damage(&mut self, raw: i16) -> i16 {
        let applied = match self.power_up {
            Some(ActivePowerUp { kind: CollectibleKind::Armor, .. }) => (raw + 1) / 2,
            _ => raw,
        };
        self.health = (self.health - applied).max(0);
        applied
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub identity: NetworkId,
    pub kind: PlayerKind,
    pub display_name: String,
    pub team_color: [u8; 3],
    pub kills: u32,
    pub deaths: u32,
    pub rtt_estimate_ms: u32,
    /// Weak: `None` while the player has no living avatar.
    pub avatar: Option<NodeId>,
    /// Counts down to zero, at which point the session spawns a new
    /// avatar.
    pub respawn_remaining: Option<f32>,
}

impl Player {
    pub fn new(identity: NetworkId, kind: PlayerKind, display_name: String, team_color: [u8; 3]) -> Self {
        Self {
            identity,
            kind,
            display_name,
            team_color,
            kills: 0,
            deaths: 0,
            rtt_estimate_ms: 0,
            avatar: None,
            respawn_remaining: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.avatar.is_some()
    }

    pub fn start_respawn_timer(&mut self) {
        self.avatar = None;
        self.respawn_remaining = Some(RESPAWN_DELAY_SECS);
    }
}

/// Per-entity update dispatched every tick on the authority. Integration
/// and variant-specific timers live here; collision resolution is a
/// separate pass (`collision.rs`).
pub fn server_update(graph: &mut SceneGraph, node: NodeId, dt: f32, bounds_min: Vec2, bounds_max: Vec2) {
    let (variant, velocity, orientation_from_velocity) = match graph.node(node) {
        Some(n) => (n.variant, n.velocity, matches!(n.variant, EntityVariant::Bullet | EntityVariant::Rocket)),
        None => return,
    };

    if let Some(data) = graph.node_mut(node) {
        data.local.position = crate::math::vec2_add(data.local.position, crate::math::vec2_scale(velocity, dt));
        if orientation_from_velocity {
            data.local.orientation = crate::math::vec2_to_angle(velocity);
        }
        data.dirty.insert(DirtyFlags::TRANSFORM);
    }

    if variant.clamped_at_bounds() {
        if let Some(data) = graph.node_mut(node) {
            let clamped = vec2_clamp(data.local.position, bounds_min, bounds_max);
            if clamped != data.local.position {
                data.local.position = clamped;
                data.dirty.insert(DirtyFlags::TRANSFORM);
            }
        }
    } else {
        let out_of_bounds = graph
            .node(node)
            .map(|n| {
                let p = n.local.position;
                p[0] < bounds_min[0] || p[1] < bounds_min[1] || p[0] > bounds_max[0] || p[1] > bounds_max[1]
            })
            .unwrap_or(false);
        if out_of_bounds {
            graph.remove(node);
            return;
        }
    }

    if matches!(variant, EntityVariant::Avatar) {
        tick_avatar_state(graph, node, dt);
    }
}

fn tick_avatar_state(_graph: &mut SceneGraph, _node: NodeId, _dt: f32) {
    // Power-up expiry and regeneration are applied by
    // `arena-server::simulation`, which owns the avatar-state side table
    // today; entity.rs exposes the mechanics (`AvatarState::apply_damage`,
    // `health_cap`) that step consumes.
}

/// Mirror-side per-tick update; no behaviors run on the client, so
/// this only advances the interpolation-independent parts of variant
/// state (nothing today — reserved for future client-only prediction).
pub fn client_update(_graph: &mut SceneGraph, _node: NodeId, _dt: f32) {}

/// Rocket splash: everything within this radius of the impact point
/// takes damage, not just the avatar whose circle the rocket actually
/// touched first.
const ROCKET_SPLASH_RADIUS: f32 = 48.0;
const ROCKET_SPLASH_DAMAGE: i16 = 3;
const BULLET_DAMAGE: i16 = 1;

/// Dispatched for each unordered colliding pair, smaller `NetworkId`
/// first. `broad_phase` hands pairs in that order, but which side ends
/// up as `initiator` depends on identity allocation order, not on which
/// variant is which — avatars are allocated before projectiles, so a
/// bullet-vs-avatar pair almost always arrives as `(Avatar, Bullet)`.
/// Both orderings of every variant combination are matched explicitly
/// rather than relying on a particular side.
pub fn handle_collision(graph: &mut SceneGraph,
    avatars: &mut std::collections::HashMap<NetworkId, AvatarState>,
    initiator: NodeId,
    target: NodeId,
) {
    let (init_variant, init_owner) = match graph.node(initiator) {
        Some(n) => (n.variant, n.owner),
        None => return,
    };
    let (target_variant, target_owner) = match graph.node(target) {
        Some(n) => (n.variant, n.owner),
        None => return,
    };

    match (init_variant, target_variant) {
        (EntityVariant::Bullet, EntityVariant::Avatar) => apply_bullet_hit(graph, avatars, initiator, init_owner, target),
        (EntityVariant::Avatar, EntityVariant::Bullet) => apply_bullet_hit(graph, avatars, target, target_owner, initiator),
        (EntityVariant::Rocket, EntityVariant::Avatar) | (EntityVariant::Avatar, EntityVariant::Rocket) => {
            let (rocket, rocket_owner) = if init_variant == EntityVariant::Rocket { (initiator, init_owner) } else { (target, target_owner) };
            apply_rocket_splash(graph, avatars, rocket, rocket_owner);
        }
        (EntityVariant::Avatar, EntityVariant::Collectible(kind)) => {
            apply_collectible(graph, avatars, initiator, target, kind);
        }
        (EntityVariant::Collectible(kind), EntityVariant::Avatar) => {
            apply_collectible(graph, avatars, target, initiator, kind);
        }
        _ => {}
    }
}

fn apply_bullet_hit(
    graph: &mut SceneGraph,
    avatars: &mut std::collections::HashMap<NetworkId, AvatarState>,
    bullet: NodeId,
    bullet_owner: Option<NetworkId>,
    avatar: NodeId,
) {
    let Some(avatar_net) = graph.node(avatar).map(|n| n.network_id) else { return };
    if bullet_owner == Some(avatar_net) {
        return;
    }
    if let Some(state) = avatars.get_mut(&avatar_net) {
        state.apply_damage(BULLET_DAMAGE);
        state.last_damaged_by = bullet_owner;
        if let Some(data) = graph.node_mut(avatar) {
            data.dirty.insert(DirtyFlags::HEALTH);
        }
    }
    graph.remove(bullet);
}

/// Applies `ROCKET_SPLASH_DAMAGE` to every avatar within
/// `ROCKET_SPLASH_RADIUS` of the rocket's impact position, then removes
/// the rocket. A rocket can appear in more than one broad-phase pair
/// this tick (one per avatar its circle directly overlaps); `is_removed`
/// guards against sweeping and re-removing it twice.
fn apply_rocket_splash(
    graph: &mut SceneGraph,
    avatars: &mut std::collections::HashMap<NetworkId, AvatarState>,
    rocket: NodeId,
    rocket_owner: Option<NetworkId>,
) {
    if graph.is_removed(rocket) {
        return;
    }
    let Some(impact_position) = graph.node(rocket).map(|n| n.local.position) else { return };

    let root = graph.root();
    let mut candidates = Vec::new();
    {
        let mut it = graph.pre_order(root);
        while let Ok(Some(id)) = it.next() {
            candidates.push(id);
        }
    }

    for id in candidates {
        let Some(data) = graph.node(id) else { continue };
        if !matches!(data.variant, EntityVariant::Avatar) {
            continue;
        }
        let (avatar_net, position) = (data.network_id, data.local.position);
        if crate::math::vec2_distance(position, impact_position) > ROCKET_SPLASH_RADIUS {
            continue;
        }
        if let Some(state) = avatars.get_mut(&avatar_net) {
            state.apply_damage(ROCKET_SPLASH_DAMAGE);
            state.last_damaged_by = rocket_owner;
            if let Some(data) = graph.node_mut(id) {
                data.dirty.insert(DirtyFlags::HEALTH);
            }
        }
    }

    graph.remove(rocket);
}

fn apply_collectible(graph: &mut SceneGraph,
    avatars: &mut std::collections::HashMap<NetworkId, AvatarState>,
    avatar: NodeId,
    collectible: NodeId,
    kind: CollectibleKind,
) {
    let avatar_net = match graph.node(avatar) {
        Some(n) => n.network_id,
        None => return,
    };
    let Some(state) = avatars.get_mut(&avatar_net) else { return };
    match kind {
        CollectibleKind::Health => {
            if state.health < 100 {
                state.health = (state.health + 25).min(100);
                if let Some(data) = graph.node_mut(avatar) {
                    data.dirty.insert(DirtyFlags::HEALTH);
                }
                graph.remove(collectible);
            }
        }
        CollectibleKind::Regeneration | CollectibleKind::QuadDamage | CollectibleKind::Invisibility => {
            if state.power_up.is_none() {
                state.power_up = Some(ActivePowerUp { kind, remaining: 15.0 });
                if let Some(data) = graph.node_mut(avatar) {
                    data.dirty.insert(DirtyFlags::POWER_UP);
                }
                graph.remove(collectible);
            }
        }
        CollectibleKind::Armor => {
            state.power_up = Some(ActivePowerUp { kind, remaining: 15.0 });
            if let Some(data) = graph.node_mut(avatar) {
                data.dirty.insert(DirtyFlags::POWER_UP);
            }
            graph.remove(collectible);
        }
    }
}

/// Walls are the arena rectangle boundary; handled separately from
/// entity-entity collision since there is no wall entity to pair
/// against.
pub fn handle_wall_collision(graph: &mut SceneGraph, node: NodeId) {
    let variant = match graph.node(node) {
        Some(n) => n.variant,
        None => return,
    };
    if !variant.clamped_at_bounds() {
        graph.remove(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armor_halves_incoming_damage() {
        let mut state = AvatarState { power_up: Some(ActivePowerUp { kind: CollectibleKind::Armor, remaining: 5.0 }), ..Default::default() };
        state.health = 100;
        let applied = state.apply_damage(10);
        assert_eq!(applied, 5);
        assert_eq!(state.health, 95);
    }

    #[test]
    fn regeneration_raises_health_cap() {
        let state = AvatarState {
            power_up: Some(ActivePowerUp { kind: CollectibleKind::Regeneration, remaining: 5.0 }),
            ..Default::default()
        };
        assert_eq!(state.health_cap(), MAX_AVATAR_HEALTH);
    }

    #[test]
    fn default_health_cap_is_100() {
        let state = AvatarState::default();
        assert_eq!(state.health_cap(), DEFAULT_AVATAR_HEALTH);
    }

    #[test]
    fn damage_never_drops_health_below_zero() {
        let mut state = AvatarState::default();
        state.health = 1;
        state.apply_damage(50);
        assert_eq!(state.health, 0);
    }

    #[test]
    fn respawn_timer_clears_avatar_reference() {
        let mut player = Player::new(NetworkId { generation: 0, slot: 1 }, PlayerKind::Human, "A".into(), [255, 0, 0]);
        player.avatar = Some(NodeId::default());
        player.start_respawn_timer();
        assert!(!player.is_alive());
        assert_eq!(player.respawn_remaining, Some(RESPAWN_DELAY_SECS));
    }

    fn spawn(graph: &mut SceneGraph, variant: EntityVariant, network_id: NetworkId, owner: Option<NetworkId>, position: Vec2) -> NodeId {
        let node = graph.create_node();
        graph.add(node, graph.root());
        if let Some(data) = graph.node_mut(node) {
            data.variant = variant;
            data.network_id = network_id;
            data.owner = owner;
            data.local.position = position;
        }
        node
    }

    fn net_id(slot: u8) -> NetworkId {
        NetworkId { generation: 0, slot }
    }

    #[test]
    fn bullet_damages_avatar_regardless_of_which_side_is_the_initiator() {
        let mut graph = SceneGraph::new();
        let mut avatars = std::collections::HashMap::new();
        let victim = net_id(1);
        let shooter = net_id(2);
        avatars.insert(victim, AvatarState::default());

        let avatar_node = spawn(&mut graph, EntityVariant::Avatar, victim, None, [0.0, 0.0]);
        let bullet_node = spawn(&mut graph, EntityVariant::Bullet, net_id(3), Some(shooter), [1.0, 0.0]);

        // Avatars are allocated before projectiles, so the broad phase's
        // smaller-NetworkId-first ordering hands this pair to
        // `handle_collision` as (Avatar, Bullet), not (Bullet, Avatar).
        handle_collision(&mut graph, &mut avatars, avatar_node, bullet_node);

        assert_eq!(avatars[&victim].health, DEFAULT_AVATAR_HEALTH - 1);
        assert!(graph.is_removed(bullet_node));
    }

    #[test]
    fn rocket_splash_damages_every_avatar_in_radius_and_removes_the_rocket() {
        let mut graph = SceneGraph::new();
        let mut avatars = std::collections::HashMap::new();
        let near = net_id(1);
        let far = net_id(2);
        let shooter = net_id(3);
        avatars.insert(near, AvatarState::default());
        avatars.insert(far, AvatarState::default());

        let near_node = spawn(&mut graph, EntityVariant::Avatar, near, None, [10.0, 0.0]);
        let far_node = spawn(&mut graph, EntityVariant::Avatar, far, None, [500.0, 500.0]);
        let rocket_node = spawn(&mut graph, EntityVariant::Rocket, net_id(4), Some(shooter), [0.0, 0.0]);

        handle_collision(&mut graph, &mut avatars, rocket_node, near_node);

        assert_eq!(avatars[&near].health, DEFAULT_AVATAR_HEALTH - ROCKET_SPLASH_DAMAGE);
        assert_eq!(avatars[&far].health, DEFAULT_AVATAR_HEALTH);
        assert_eq!(avatars[&near].last_damaged_by, Some(shooter));
        assert!(graph.is_removed(rocket_node));
        let _ = far_node;
    }
}
