// behavior.rs — per-node add-ons with an advance/on_attach/on_detach
// capability set.
//
// Design note: dispatch over a tagged enum rather than trait objects —
// one function table keyed by tag, no vtables.

use crate::entity::{DirtyFlags, EntityVariant, InputSnapshot};
use crate::math::vec2_scale;
use crate::scene::{NodeId, SceneGraph};

/// Per-tick context a behavior may need beyond the node it's attached to:
/// the latest input for player-controlled avatars, and a source of
/// randomness for AI steering/fire decisions. The client-side mirror never
/// runs behaviors (it only calls `client_update`), so this only needs to
/// exist on the server.
pub struct BehaviorContext<'a> {
    pub input: Option<&'a InputSnapshot>,
    pub rng: &'a mut dyn RngSource,
}

pub trait RngSource {
    fn unit_f32(&mut self) -> f32;
}

#[derive(Clone)]
pub enum Behavior {
    /// Marks the node as solid for broad-phase collision with the given
    /// radius (kept alongside the node's own `collider_radius` for
    /// cases where a node wants a collider distinct from its own body,
    /// e.g. a shockwave's expanding blast radius).
    Collider { radius: f32 },
    /// Reads the latest input snapshot and sets velocity/fires.
    PlayerInput,
    /// Simple steering + random fire.
    Ai { fire_cooldown: f32 },
    /// Removes the node after `remaining` seconds reach zero.
    TimedRemoval { remaining: f32 },
}

impl Behavior {
    pub fn on_attach(&self) {}
    pub fn on_detach(&self) {}

    /// `index` is this behavior's position in the owning node's behavior
    /// list at the moment `execute_behaviors` snapshotted it — used only
    /// to write back mutated state (e.g. `TimedRemoval`'s countdown),
    /// since `self` is a clone taken to avoid borrowing the node's
    /// behavior vector both mutably and for the call.
    pub fn advance(&self, graph: &mut SceneGraph, node: NodeId, index: usize, dt: f32, ctx: &mut BehaviorContext) {
        match self {
            Behavior::Collider { .. } => {}
            Behavior::PlayerInput => {
                if let Some(input) = ctx.input {
                    if let Some(data) = graph.node_mut(node) {
                        data.velocity = input.movement;
                        data.dirty.insert(DirtyFlags::VELOCITY);
                    }
                }
            }
            Behavior::Ai { .. } => {
                // Simple steering: wander in the current heading, flipping
                // direction at random intervals.
                if let Some(data) = graph.node_mut(node) {
                    if ctx.rng.unit_f32() < 0.02 {
                        let turn = (ctx.rng.unit_f32() - 0.5) * std::f32::consts::PI;
                        data.local.orientation += turn;
                    }
                    let heading = crate::math::angle_to_vec2(data.local.orientation);
                    data.velocity = vec2_scale(heading, 80.0);
                    data.dirty.insert(DirtyFlags::VELOCITY);
                }
            }
            Behavior::TimedRemoval { remaining } => {
                let new_remaining = remaining - dt;
                if new_remaining <= 0.0 {
                    graph.remove(node);
                } else if let Some(data) = graph.node_mut(node) {
                    if let Some(slot) = data.behaviors.get_mut(index) {
                        *slot = Behavior::TimedRemoval { remaining: new_remaining };
                    }
                }
            }
        }
    }
}

pub fn default_collision_radius(variant: EntityVariant) -> f32 {
    variant.default_collider_radius()
}
