// replicate.rs — join snapshot + per-tick deltas (server side)
//
// A baseline-then-delta entity update pattern: a newly joined peer gets
// one full-world snapshot, then every subsequent tick reports only what
// changed. This world has no visibility culling, so every connected peer
// gets the same full-world stream, and "last acknowledged frame"
// collapses to per-node dirty flags reset after every tick's broadcast
// instead of per-client baselines.

use arena_common::entity::{DirtyFlags, EntityVariant};
use arena_common::message::Message;

use crate::simulation::Simulation;

/// Full entity list for a peer that just joined. Sent once, right
/// after the connection moves to `Connected`.
pub fn join_snapshot(sim: &mut Simulation) -> Vec<Message> {
    let root = sim.graph.root();
    let mut nodes = Vec::new();
    {
        let mut it = sim.graph.pre_order(root);
        while let Ok(Some(id)) = it.next() {
            nodes.push(id);
        }
    }

    let mut messages = Vec::new();
    for node in nodes {
        if node == root {
            continue;
        }
        let Some(data) = sim.graph.node(node) else { continue };
        if data.network_id.is_none() {
            continue;
        }
        let health = match data.variant {
            EntityVariant::Avatar => sim.avatars.get(&data.network_id).map(|s| s.health),
            _ => None,
        };
        messages.push(Message::EntityAdd {
            network_id: data.network_id,
            variant: data.variant,
            position: data.local.position,
            orientation: data.local.orientation,
            health,
        });
    }
    messages
}

/// Per-tick deltas: one `EntityAdd` for a node `tick_deltas` has never
/// reported before (a second player's avatar, a projectile fired since the
/// last broadcast — not just the join-time world), one `EntityUpdate` per
/// already-known dirty live node, one `EntityRemove` per entity that
/// vanished this tick. Dirty flags are cleared as they're read, so next
/// tick only reports what actually changed again.
pub fn tick_deltas(sim: &mut Simulation) -> Vec<Message> {
    let root = sim.graph.root();
    let mut nodes = Vec::new();
    {
        let mut it = sim.graph.pre_order(root);
        while let Ok(Some(id)) = it.next() {
            nodes.push(id);
        }
    }

    let mut messages = Vec::new();
    for node in nodes {
        if node == root {
            continue;
        }
        let Some(data) = sim.graph.node(node) else { continue };
        if data.network_id.is_none() {
            continue;
        }
        let newly_seen = sim.known_replicated.insert(data.network_id);
        if !newly_seen && data.dirty.is_empty() {
            continue;
        }
        let health = if data.variant == EntityVariant::Avatar {
            sim.avatars.get(&data.network_id).map(|s| s.health)
        } else {
            None
        };
        if newly_seen {
            messages.push(Message::EntityAdd {
                network_id: data.network_id,
                variant: data.variant,
                position: data.local.position,
                orientation: data.local.orientation,
                health,
            });
        } else {
            messages.push(Message::EntityUpdate {
                network_id: data.network_id,
                dirty: data.dirty,
                position: data.local.position,
                orientation: data.local.orientation,
                velocity: data.velocity,
                health,
            });
        }
        if let Some(data) = sim.graph.node_mut(node) {
            data.dirty = DirtyFlags::empty();
        }
    }

    for network_id in sim.removed_this_tick.drain(..) {
        messages.push(Message::EntityRemove { network_id });
    }

    for (killer, victim) in sim.kills_this_tick.drain(..) {
        messages.push(Message::PlayerKill { killer, victim });
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_common::math::Vec2;
    use std::collections::HashMap;

    fn bounds() -> (Vec2, Vec2) {
        ([0.0, 0.0], [100.0, 100.0])
    }

    #[test]
    fn join_snapshot_lists_every_live_networked_entity() {
        let (min, max) = bounds();
        let mut sim = Simulation::new(8, min, max, 1);
        sim.spawn_avatar([1.0, 1.0]).unwrap();
        sim.spawn_avatar([2.0, 2.0]).unwrap();
        let snapshot = join_snapshot(&mut sim);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|m| matches!(m, Message::EntityAdd { .. })));
    }

    #[test]
    fn tick_deltas_reports_only_dirty_entities_and_clears_flags() {
        let (min, max) = bounds();
        let mut sim = Simulation::new(8, min, max, 1);
        let (node, _net_id) = sim.spawn_avatar([0.0, 0.0]).unwrap();
        let mut players = HashMap::new();
        sim.step(0.1, &HashMap::new(), &mut players);
        // server_update always marks TRANSFORM dirty since integration ran.
        let deltas = tick_deltas(&mut sim);
        assert!(!deltas.is_empty());
        assert!(sim.graph.node(node).unwrap().dirty.is_empty());
        // Nothing changed since the last broadcast, so the next poll is empty.
        let deltas2 = tick_deltas(&mut sim);
        assert!(deltas2.is_empty());
    }

    #[test]
    fn avatar_death_emits_player_kill() {
        let (min, max) = bounds();
        let mut sim = Simulation::new(8, min, max, 1);
        let (node, victim) = sim.spawn_avatar([0.0, 0.0]).unwrap();
        let killer = arena_common::identity::NetworkId { generation: 0, slot: 9 };
        sim.avatars.get_mut(&victim).unwrap().health = 0;
        sim.avatars.get_mut(&victim).unwrap().last_damaged_by = Some(killer);
        let mut players = HashMap::new();
        let mut player = arena_common::entity::Player::new(victim, arena_common::entity::PlayerKind::Human, "V".into(), [0, 0, 0]);
        player.avatar = Some(node);
        players.insert(victim, player);
        sim.step(0.1, &HashMap::new(), &mut players);

        let deltas = tick_deltas(&mut sim);
        assert!(deltas.iter().any(|m| matches!(m, Message::PlayerKill { killer: k, victim: v } if *k == killer && *v == victim)));
    }

    #[test]
    fn removed_entities_are_reported_once() {
        let (min, max) = bounds();
        let mut sim = Simulation::new(8, min, max, 1);
        let (node, net_id) = sim.spawn_avatar([0.0, 0.0]).unwrap();
        sim.avatars.get_mut(&net_id).unwrap().health = 0;
        let mut players = HashMap::new();
        let mut player = arena_common::entity::Player::new(net_id, arena_common::entity::PlayerKind::Human, "A".into(), [0, 0, 0]);
        player.avatar = Some(node);
        players.insert(net_id, player);
        sim.step(0.1, &HashMap::new(), &mut players);
        let deltas = tick_deltas(&mut sim);
        assert!(deltas.iter().any(|m| matches!(m, Message::EntityRemove { network_id } if *network_id == net_id)));
        let deltas2 = tick_deltas(&mut sim);
        assert!(!deltas2.iter().any(|m| matches!(m, Message::EntityRemove { .. })));
    }
}
