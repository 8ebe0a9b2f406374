// mirror.rs — client-side shadow scene graph
//
// Mirrors the server's authoritative `Simulation` for the shape of
// "network identity -> scene node", but carries none of its
// behavior/collision machinery: the mirror only ever applies what the
// wire tells it, it never runs its own physics. Per-entity history is
// two buffered snapshots rather than one, so `interpolated` can render
// render-time-minus-interp-delay between them instead of snapping
// straight to the latest update.

use std::collections::HashMap;

use arena_common::entity::EntityVariant;
use arena_common::identity::NetworkId;
use arena_common::math::{vec2_lerp, Vec2};
use arena_common::scene::{NodeId, SceneGraph};

/// Render lags behind the wire by about one tick, so a burst of jitter
/// between updates still has two real samples to interpolate between.
pub const INTERP_DELAY_SECS: f32 = 0.1;

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    received_at: f32,
    position: Vec2,
    orientation: f32,
}

struct MirrorEntity {
    node: NodeId,
    variant: EntityVariant,
    health: Option<i16>,
    previous: Snapshot,
    latest: Snapshot,
}

/// Owns a scene graph that exists purely to give every replicated entity a
/// `NodeId` for whatever rendering collaborator eventually attaches to it —
/// the mirror itself only tracks state through `entities`, not by walking
/// the graph.
pub struct Mirror {
    graph: SceneGraph,
    entities: HashMap<NetworkId, MirrorEntity>,
}

impl Mirror {
    pub fn new() -> Self {
        Self { graph: SceneGraph::new(), entities: HashMap::new() }
    }

    /// Creates a mirror entity, or resets an existing one's interpolation
    /// history in place if the same identity is announced twice (the
    /// first `tick_deltas` broadcast after a join redundantly re-sends
    /// `EntityAdd` for entities the join snapshot already listed — see
    /// arena-server's replicate.rs).
    pub fn apply_add(&mut self, network_id: NetworkId, variant: EntityVariant, position: Vec2, orientation: f32, health: Option<i16>, now: f32) {
        let snapshot = Snapshot { received_at: now, position, orientation };
        if let Some(entity) = self.entities.get_mut(&network_id) {
            entity.variant = variant;
            entity.health = health;
            entity.previous = snapshot;
            entity.latest = snapshot;
            return;
        }
        let node = self.graph.create_node();
        self.graph.add(node, self.graph.root());
        if let Some(data) = self.graph.node_mut(node) {
            data.variant = variant;
            data.network_id = network_id;
            data.local.position = position;
            data.local.orientation = orientation;
        }
        self.entities.insert(network_id, MirrorEntity { node, variant, health, previous: snapshot, latest: snapshot });
    }

    /// Folds an `EntityUpdate` into the two-snapshot history. An update
    /// that arrives for an identity this mirror never saw an `EntityAdd`
    /// for is dropped rather than fabricating a variant-less entity —
    /// that should not happen over a reliable-join/ordered-delta stream,
    /// but a client must not panic if it does.
    pub fn apply_update(&mut self, network_id: NetworkId, position: Vec2, orientation: f32, health: Option<i16>, now: f32) {
        let Some(entity) = self.entities.get_mut(&network_id) else { return };
        if now < entity.latest.received_at {
            // Older than what we already have — discard.
            return;
        }
        entity.previous = entity.latest;
        entity.latest = Snapshot { received_at: now, position, orientation };
        if health.is_some() {
            entity.health = health;
        }
        if let Some(data) = self.graph.node_mut(entity.node) {
            data.local.position = position;
            data.local.orientation = orientation;
        }
    }

    pub fn apply_remove(&mut self, network_id: NetworkId) {
        if let Some(entity) = self.entities.remove(&network_id) {
            self.graph.remove(entity.node);
        }
    }

    /// Interpolated position/orientation at `render_time`, rendered
    /// `INTERP_DELAY_SECS` behind the most recent snapshot so there is
    /// almost always a later sample to blend toward.
    pub fn interpolated(&self, network_id: NetworkId, render_time: f32) -> Option<(Vec2, f32)> {
        let entity = self.entities.get(&network_id)?;
        let target_time = render_time - INTERP_DELAY_SECS;
        let span = entity.latest.received_at - entity.previous.received_at;
        if span <= 0.0 {
            return Some((entity.latest.position, entity.latest.orientation));
        }
        let frac = ((target_time - entity.previous.received_at) / span).clamp(0.0, 1.0);
        let position = vec2_lerp(entity.previous.position, entity.latest.position, frac);
        let orientation = lerp_angle(entity.previous.orientation, entity.latest.orientation, frac);
        Some((position, orientation))
    }

    pub fn health(&self, network_id: NetworkId) -> Option<i16> {
        self.entities.get(&network_id)?.health
    }

    pub fn variant(&self, network_id: NetworkId) -> Option<EntityVariant> {
        self.entities.get(&network_id).map(|e| e.variant)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NetworkId> {
        self.entities.keys()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new()
    }
}

/// Shortest-path angular lerp so a turn through the ±π wraparound
/// interpolates the short way instead of spinning the long way around.
fn lerp_angle(a: f32, b: f32, frac: f32) -> f32 {
    let mut delta = (b - a) % std::f32::consts::TAU;
    if delta > std::f32::consts::PI {
        delta -= std::f32::consts::TAU;
    } else if delta < -std::f32::consts::PI {
        delta += std::f32::consts::TAU;
    }
    a + delta * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(slot: u8) -> NetworkId {
        NetworkId { generation: 0, slot }
    }

    #[test]
    fn add_then_interpolate_without_a_second_snapshot_returns_latest() {
        let mut mirror = Mirror::new();
        mirror.apply_add(id(1), EntityVariant::Avatar, [0.0, 0.0], 0.0, Some(100), 0.0);
        let (pos, _) = mirror.interpolated(id(1), 0.05).unwrap();
        assert_eq!(pos, [0.0, 0.0]);
    }

    #[test]
    fn update_blends_between_previous_and_latest() {
        let mut mirror = Mirror::new();
        mirror.apply_add(id(1), EntityVariant::Avatar, [0.0, 0.0], 0.0, Some(100), 0.0);
        mirror.apply_update(id(1), [10.0, 0.0], 0.0, Some(100), 0.1);
        // Rendering at t=0.15 with a 0.1s interp delay targets t=0.05,
        // i.e. halfway through the [0.0, 0.1] span.
        let (pos, _) = mirror.interpolated(id(1), 0.15).unwrap();
        assert!((pos[0] - 5.0).abs() < 1e-3);
    }

    #[test]
    fn stale_update_is_discarded() {
        let mut mirror = Mirror::new();
        mirror.apply_add(id(1), EntityVariant::Avatar, [0.0, 0.0], 0.0, Some(100), 1.0);
        mirror.apply_update(id(1), [99.0, 99.0], 0.0, Some(100), 0.5);
        let (pos, _) = mirror.interpolated(id(1), 1.2).unwrap();
        assert_eq!(pos, [0.0, 0.0]);
    }

    #[test]
    fn remove_drops_the_entity() {
        let mut mirror = Mirror::new();
        mirror.apply_add(id(1), EntityVariant::Avatar, [0.0, 0.0], 0.0, Some(100), 0.0);
        mirror.apply_remove(id(1));
        assert!(mirror.is_empty());
        assert!(mirror.interpolated(id(1), 0.0).is_none());
    }

    #[test]
    fn update_for_unknown_entity_is_ignored_not_fabricated() {
        let mut mirror = Mirror::new();
        mirror.apply_update(id(9), [1.0, 1.0], 0.0, None, 0.0);
        assert!(mirror.is_empty());
    }

    #[test]
    fn angle_lerp_takes_the_short_way_around_the_wraparound() {
        let a = std::f32::consts::PI - 0.1;
        let b = -std::f32::consts::PI + 0.1;
        let mid = lerp_angle(a, b, 0.5);
        // The short way crosses +-pi; the long way would land near 0.
        assert!(mid.abs() > std::f32::consts::PI - 0.2 || mid.abs() > 3.0);
    }
}
