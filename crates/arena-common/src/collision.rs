// collision.rs — spatial broad-phase + circle-circle narrow phase
//
// Buckets candidates into a flat grid for cheap proximity queries instead
// of testing every pair, over a 2D axis-aligned arena rectangle.

use std::collections::HashMap;

use crate::entity::EntityVariant;
use crate::identity::NetworkId;
use crate::math::{vec2_distance, Vec2};
use crate::scene::{NodeId, SceneGraph};

/// One candidate entity for broad-phase bucketing.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub node: NodeId,
    pub network_id: NetworkId,
    pub position: Vec2,
    pub radius: f32,
}

/// Partitions candidates into cells of size `2 * max_radius`.
/// Cells are looked up by integer coordinate; a candidate is inserted
/// into every cell its circle overlaps (its own cell plus, if near an
/// edge, the adjacent cell) rather than just its center cell, so pairs
/// split across a cell boundary are never missed.
pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<(i32, i32), Vec<usize>>,
    candidates: Vec<Candidate>,
}

impl SpatialGrid {
    pub fn new(max_radius: f32) -> Self {
        Self {
            cell_size: (2.0 * max_radius).max(1.0),
            cells: HashMap::new(),
            candidates: Vec::new(),
        }
    }

    fn cell_of(&self, p: Vec2) -> (i32, i32) {
        ((p[0] / self.cell_size).floor() as i32, (p[1] / self.cell_size).floor() as i32)
    }

    pub fn insert(&mut self, candidate: Candidate) {
        let idx = self.candidates.len();
        let (cx, cy) = self.cell_of(candidate.position);
        for dx in -1..=1 {
            for dy in -1..=1 {
                self.cells.entry((cx + dx, cy + dy)).or_default().push(idx);
            }
        }
        self.candidates.push(candidate);
    }

    /// Returns every unordered pair whose circles overlap, deterministically
    /// ordered with the smaller `NetworkId` first.
    pub fn overlapping_pairs(&self) -> Vec<(Candidate, Candidate)> {
        let mut seen = std::collections::HashSet::new();
        let mut pairs = Vec::new();
        for bucket in self.cells.values() {
            for i in 0..bucket.len() {
                for j in (i + 1)..bucket.len() {
                    let (a_idx, b_idx) = (bucket[i], bucket[j]);
                    let key = (a_idx.min(b_idx), a_idx.max(b_idx));
                    if !seen.insert(key) {
                        continue;
                    }
                    let a = self.candidates[a_idx];
                    let b = self.candidates[b_idx];
                    if circles_overlap(a, b) {
                        pairs.push(order_pair(a, b));
                    }
                }
            }
        }
        pairs
    }
}

fn circles_overlap(a: Candidate, b: Candidate) -> bool {
    vec2_distance(a.position, b.position) <= a.radius + b.radius
}

fn order_pair(a: Candidate, b: Candidate) -> (Candidate, Candidate) {
    if (a.network_id.generation, a.network_id.slot) <= (b.network_id.generation, b.network_id.slot) {
        (a, b)
    } else {
        (b, a)
    }
}

/// Builds a grid from every attached, collidable node in the graph and
/// returns the deterministically-ordered overlapping pairs for this
/// tick's collision resolution pass.
pub fn broad_phase(graph: &SceneGraph, nodes: &[NodeId]) -> Vec<(Candidate, Candidate)> {
    let max_radius = nodes
        .iter()
        .filter_map(|&id| graph.node(id))
        .map(|n| n.collider_radius)
        .fold(1.0f32, f32::max);
    let mut grid = SpatialGrid::new(max_radius);
    for &id in nodes {
        if let Some(n) = graph.node(id) {
            if matches!(n.variant, EntityVariant::None) || n.collider_radius <= 0.0 {
                continue;
            }
            grid.insert(Candidate {
                node: id,
                network_id: n.network_id,
                position: n.local.position,
                radius: n.collider_radius,
            });
        }
    }
    grid.overlapping_pairs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(slot: u8, position: Vec2, radius: f32) -> Candidate {
        Candidate { node: NodeId::default(), network_id: NetworkId { generation: 0, slot }, position, radius }
    }

    #[test]
    fn overlapping_circles_are_detected() {
        let mut grid = SpatialGrid::new(10.0);
        grid.insert(candidate(1, [0.0, 0.0], 5.0));
        grid.insert(candidate(2, [8.0, 0.0], 5.0));
        assert_eq!(grid.overlapping_pairs().len(), 1);
    }

    #[test]
    fn distant_circles_are_not_paired() {
        let mut grid = SpatialGrid::new(10.0);
        grid.insert(candidate(1, [0.0, 0.0], 5.0));
        grid.insert(candidate(2, [1000.0, 1000.0], 5.0));
        assert!(grid.overlapping_pairs().is_empty());
    }

    #[test]
    fn pairs_across_cell_boundary_are_still_found() {
        // cell_size = 20; place two circles straddling a cell edge at x=20.
        let mut grid = SpatialGrid::new(10.0);
        grid.insert(candidate(1, [19.0, 0.0], 3.0));
        grid.insert(candidate(2, [21.0, 0.0], 3.0));
        assert_eq!(grid.overlapping_pairs().len(), 1);
    }

    #[test]
    fn pair_ordering_is_deterministic_by_network_id() {
        let mut grid = SpatialGrid::new(10.0);
        grid.insert(candidate(5, [0.0, 0.0], 5.0));
        grid.insert(candidate(2, [2.0, 0.0], 5.0));
        let pairs = grid.overlapping_pairs();
        assert_eq!(pairs[0].0.network_id.slot, 2);
        assert_eq!(pairs[0].1.network_id.slot, 5);
    }

    #[test]
    fn no_duplicate_pairs_when_circle_spans_multiple_cells() {
        let mut grid = SpatialGrid::new(10.0);
        grid.insert(candidate(1, [0.0, 0.0], 25.0));
        grid.insert(candidate(2, [5.0, 5.0], 1.0));
        assert_eq!(grid.overlapping_pairs().len(), 1);
    }
}
