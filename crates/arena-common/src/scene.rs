// scene.rs — intrusive n-ary scene graph with deferred structural mutation
//
// Traversal is not snapshot-based: behaviors rely on observing insertions
// that already took effect outside the traversal they were scheduled
// against, so a mutation requested while any enumerator is active is
// queued to a FIFO and only applied once the last active enumerator
// drops, rather than applied in place or against a point-in-time copy.

use std::collections::VecDeque;

use crate::behavior::{Behavior, BehaviorContext};
use crate::entity::{DirtyFlags, EntityVariant};
use crate::identity::NetworkId;
use crate::math::Vec2;
use crate::pool::{Handle, Pool, PoolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(Handle);

#[derive(Debug, Clone, Copy)]
pub struct Transform {
    pub position: Vec2,
    pub orientation: f32,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0],
            orientation: 0.0,
            scale: 1.0,
        }
    }
}

#[derive(Default)]
pub struct SceneNodeData {
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    pub local: Transform,
    pub world: Transform,
    pub behaviors: Vec<Behavior>,
    removed: bool,
    attached: bool,
    /// Per-tick linear velocity, set by a node's `PlayerInput`/`Ai`
    /// behavior and consumed by the simulation step's integration pass.
    pub velocity: Vec2,
    pub collider_radius: f32,
    /// Networked identity, `NetworkId::NONE` for nodes that never cross
    /// the wire (the scene root, purely local decoration).
    pub network_id: NetworkId,
    /// Which replicated fields changed since the last emitted snapshot.
    pub dirty: DirtyFlags,
    /// The player who controls this node, if any (an avatar's own
    /// identity, or a projectile's firing player for kill attribution).
    pub owner: Option<NetworkId>,
    pub variant: EntityVariant,
}

#[derive(Debug)]
enum Mutation {
    Add { node: NodeId, parent: NodeId },
    Remove { node: NodeId },
    Reparent { node: NodeId, new_parent: NodeId },
    AddBehavior { node: NodeId, behavior: Behavior },
    RemoveBehaviorAt { node: NodeId, index: usize },
}

#[derive(Debug)]
pub enum SceneError {
    /// A traversal observed the graph mutated outside the deferred path
    /// while it was still active — a caller bug.
    VersionDrift,
    Pool(PoolError),
}

impl From<PoolError> for SceneError {
    fn from(e: PoolError) -> Self {
        SceneError::Pool(e)
    }
}

pub struct SceneGraph {
    nodes: Pool<SceneNodeData>,
    root: NodeId,
    version: u64,
    active_enumerators: u32,
    deferred: VecDeque<Mutation>,
}

impl SceneGraph {
    pub fn new() -> Self {
        let mut nodes = Pool::new("scene-nodes");
        let root_handle = nodes.allocate(|n| n.attached = true).expect("first allocation cannot fail");
        Self {
            nodes,
            root: NodeId(root_handle),
            version: 0,
            active_enumerators: 0,
            deferred: VecDeque::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn is_enumerating(&self) -> bool {
        self.active_enumerators > 0
    }

    /// Allocates a detached node. Call `add` to attach it under a parent.
    pub fn create_node(&mut self) -> NodeId {
        let handle = self.nodes.allocate(|_| {}).expect("node allocation cannot fail");
        NodeId(handle)
    }

    /// Attaches `node` as the new first child of `parent`. Deferred while
    /// any enumerator is active.
    pub fn add(&mut self, node: NodeId, parent: NodeId) {
        if self.is_enumerating() {
            self.deferred.push_back(Mutation::Add { node, parent });
            return;
        }
        self.apply_add(node, parent);
        self.version += 1;
    }

    fn apply_add(&mut self, node: NodeId, parent: NodeId) {
        let old_first = self.nodes.get(parent.0).and_then(|p| p.first_child);
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.parent = Some(parent);
            n.next_sibling = old_first;
            n.prev_sibling = None;
            n.attached = true;
            n.removed = false;
        }
        if let Some(old) = old_first {
            if let Some(old_node) = self.nodes.get_mut(old.0) {
                old_node.prev_sibling = Some(node);
            }
        }
        if let Some(p) = self.nodes.get_mut(parent.0) {
            p.first_child = Some(node);
        }
    }

    /// Detaches and removes `node` and its whole subtree, returning nodes
    /// to the pool in post-order after detach. Deferred while any
    /// enumerator is active.
    pub fn remove(&mut self, node: NodeId) {
        if self.is_enumerating() {
            self.deferred.push_back(Mutation::Remove { node });
            return;
        }
        self.apply_remove(node);
        self.version += 1;
    }

    fn apply_remove(&mut self, node: NodeId) {
        self.mark_removed_recursive(node);
        self.unlink(node);
        let order = self.post_order_subtree(node);
        for n in order {
            if let Some(data) = self.nodes.get_mut(n.0) {
                data.attached = false;
            }
            let _ = self.nodes.free(n.0);
        }
    }

    fn mark_removed_recursive(&mut self, node: NodeId) {
        if let Some(data) = self.nodes.get_mut(node.0) {
            data.removed = true;
        }
        let child = self.nodes.get(node.0).and_then(|n| n.first_child);
        let mut cur = child;
        while let Some(c) = cur {
            let next = self.nodes.get(c.0).and_then(|n| n.next_sibling);
            self.mark_removed_recursive(c);
            cur = next;
        }
    }

    fn post_order_subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_post_order(node, &mut out);
        out
    }

    fn collect_post_order(&self, node: NodeId, out: &mut Vec<NodeId>) {
        let child = self.nodes.get(node.0).and_then(|n| n.first_child);
        let mut cur = child;
        while let Some(c) = cur {
            let next = self.nodes.get(c.0).and_then(|n| n.next_sibling);
            self.collect_post_order(c, out);
            cur = next;
        }
        out.push(node);
    }

    fn unlink(&mut self, node: NodeId) {
        let (parent, prev, next) = match self.nodes.get(node.0) {
            Some(n) => (n.parent, n.prev_sibling, n.next_sibling),
            None => return,
        };
        if let Some(prev) = prev {
            if let Some(p) = self.nodes.get_mut(prev.0) {
                p.next_sibling = next;
            }
        } else if let Some(parent) = parent {
            if let Some(p) = self.nodes.get_mut(parent.0) {
                p.first_child = next;
            }
        }
        if let Some(next) = next {
            if let Some(n) = self.nodes.get_mut(next.0) {
                n.prev_sibling = prev;
            }
        }
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.parent = None;
            n.next_sibling = None;
            n.prev_sibling = None;
        }
    }

    /// Reparents `node` under `new_parent`. Deferred while any enumerator
    /// is active.
    pub fn reparent(&mut self, node: NodeId, new_parent: NodeId) {
        if self.is_enumerating() {
            self.deferred.push_back(Mutation::Reparent { node, new_parent });
            return;
        }
        self.unlink(node);
        self.apply_add(node, new_parent);
        self.version += 1;
    }

    pub fn add_behavior(&mut self, node: NodeId, behavior: Behavior) {
        if self.is_enumerating() {
            self.deferred.push_back(Mutation::AddBehavior { node, behavior });
            return;
        }
        self.apply_add_behavior(node, behavior);
        self.version += 1;
    }

    fn apply_add_behavior(&mut self, node: NodeId, behavior: Behavior) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            behavior.on_attach();
            n.behaviors.push(behavior);
        }
    }

    pub fn remove_behavior_at(&mut self, node: NodeId, index: usize) {
        if self.is_enumerating() {
            self.deferred.push_back(Mutation::RemoveBehaviorAt { node, index });
            return;
        }
        self.apply_remove_behavior(node, index);
        self.version += 1;
    }

    fn apply_remove_behavior(&mut self, node: NodeId, index: usize) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            if index < n.behaviors.len() {
                let b = n.behaviors.remove(index);
                b.on_detach();
            }
        }
    }

    fn drain_deferred(&mut self) {
        while let Some(m) = self.deferred.pop_front() {
            match m {
                Mutation::Add { node, parent } => {
                    self.apply_add(node, parent);
                    self.version += 1;
                }
                Mutation::Remove { node } => {
                    self.apply_remove(node);
                    self.version += 1;
                }
                Mutation::Reparent { node, new_parent } => {
                    self.unlink(node);
                    self.apply_add(node, new_parent);
                    self.version += 1;
                }
                Mutation::AddBehavior { node, behavior } => {
                    self.apply_add_behavior(node, behavior);
                    self.version += 1;
                }
                Mutation::RemoveBehaviorAt { node, index } => {
                    self.apply_remove_behavior(node, index);
                    self.version += 1;
                }
            }
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNodeData> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNodeData> {
        self.nodes.get_mut(id.0)
    }

    pub fn is_removed(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_none_or(|n| n.removed)
    }

    /// Pre-order traversal starting at `start` (parent before its
    /// subtree, left-to-right over siblings).
    pub fn pre_order(&mut self, start: NodeId) -> Enumerator<'_> {
        self.active_enumerators += 1;
        let mut stack = Vec::new();
        if let Some(n) = self.nodes.get(start.0) {
            if n.first_child.is_some() || start == self.root {
                stack.push(start);
            } else if !n.removed {
                stack.push(start);
            }
        }
        Enumerator {
            graph: self,
            order: Order::Pre,
            stack,
            post_queue: Vec::new(),
            visited_version: self.version,
        }
    }

    /// Post-order traversal starting at `start` (subtrees left-to-right,
    /// then the parent).
    pub fn post_order(&mut self, start: NodeId) -> Enumerator<'_> {
        self.active_enumerators += 1;
        let order = self.post_order_subtree(start);
        Enumerator {
            graph: self,
            order: Order::Post,
            stack: Vec::new(),
            post_queue: order,
            visited_version: self.version,
        }
    }

    fn end_enumeration(&mut self) {
        self.active_enumerators = self.active_enumerators.saturating_sub(1);
        if self.active_enumerators == 0 {
            self.drain_deferred();
        }
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

enum Order {
    Pre,
    Post,
}

/// Live view over the graph. Structural mutation requests made through the
/// normal `SceneGraph` methods while this (or any sibling enumerator) is
/// alive are deferred to a FIFO queue and applied once the last enumerator
/// is dropped. A direct mutation performed through the non-deferred path
/// (a bug) is caught on the next `next` call via version drift.
pub struct Enumerator<'g> {
    graph: &'g mut SceneGraph,
    order: Order,
    stack: Vec<NodeId>,
    post_queue: Vec<NodeId>,
    visited_version: u64,
}

impl<'g> Enumerator<'g> {
    pub fn graph(&self) -> &SceneGraph {
        self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        self.graph
    }

    /// Advances the enumerator. Returns `Err(SceneError::VersionDrift)` if
    /// the graph's version changed without going through the deferred
    /// path — i.e. a structural mutation happened directly under an
    /// active enumerator, which is a caller bug.
    pub fn next(&mut self) -> Result<Option<NodeId>, SceneError> {
        if !self.graph.deferred.is_empty() && self.graph.active_enumerators == 1 {
            // Only the deferral queue may move the version forward while
            // enumerators are live; draining happens on drop, not here.
        } else if self.graph.version != self.visited_version {
            return Err(SceneError::VersionDrift);
        }

        match self.order {
            Order::Pre => {
                while let Some(id) = self.stack.pop() {
                    if self.graph.is_removed(id) {
                        continue;
                    }
                    if let Some(n) = self.graph.nodes.get(id.0) {
                        let mut siblings = Vec::new();
                        let mut cur = n.first_child;
                        while let Some(c) = cur {
                            siblings.push(c);
                            cur = self.graph.nodes.get(c.0).and_then(|n| n.next_sibling);
                        }
                        for s in siblings.into_iter().rev() {
                            self.stack.push(s);
                        }
                    }
                    return Ok(Some(id));
                }
                Ok(None)
            }
            Order::Post => {
                while let Some(id) = self.post_queue.pop() {
                    if !self.graph.is_removed(id) {
                        return Ok(Some(id));
                    }
                }
                Ok(None)
            }
        }
    }
}

impl<'g> Drop for Enumerator<'g> {
    fn drop(&mut self) {
        self.graph.end_enumeration();
    }
}

/// Walks `start` pre-order, calling `Behavior::advance(dt)` on every
/// attached behavior. A behavior's request to mutate structure is safe:
/// the enumerator defers it until this call returns.
pub fn execute_behaviors(
    graph: &mut SceneGraph,
    start: NodeId,
    dt: f32,
    ctx: &mut BehaviorContext,
) -> Result<(), SceneError> {
    let mut ids = Vec::new();
    {
        let mut it = graph.pre_order(start);
        while let Some(id) = it.next()? {
            ids.push(id);
        }
    }
    for id in ids {
        let behaviors = match graph.node(id) {
            Some(n) => n.behaviors.len(),
            None => continue,
        };
        for i in 0..behaviors {
            let behavior = match graph.node(id).and_then(|n| n.behaviors.get(i)) {
                Some(b) => b.clone(),
                None => continue,
            };
            behavior.advance(graph, id, i, dt, ctx);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{Behavior, RngSource};

    struct NullRng;
    impl RngSource for NullRng {
        fn unit_f32(&mut self) -> f32 {
            1.0
        }
    }

    fn no_input_ctx() -> BehaviorContext<'static> {
        // `'static` is safe here: `NullRng` is a unit struct leaked once
        // per test, never referencing graph data.
        BehaviorContext {
            input: None,
            rng: Box::leak(Box::new(NullRng)),
        }
    }

    fn leaf(graph: &mut SceneGraph, parent: NodeId) -> NodeId {
        let n = graph.create_node();
        graph.add(n, parent);
        n
    }

    #[test]
    fn post_order_visits_leaf_before_ancestor() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let a = leaf(&mut graph, root);
        let l = leaf(&mut graph, a);

        let mut visited = Vec::new();
        let mut it = graph.post_order(root);
        while let Some(id) = it.next().unwrap() {
            visited.push(id);
        }
        drop(it);

        let pos_l = visited.iter().position(|&x| x == l).unwrap();
        let pos_a = visited.iter().position(|&x| x == a).unwrap();
        assert!(pos_l < pos_a);
    }

    #[test]
    fn pre_order_visits_parent_before_children() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let a = leaf(&mut graph, root);
        let b = leaf(&mut graph, a);

        let mut visited = Vec::new();
        let mut it = graph.pre_order(root);
        while let Some(id) = it.next().unwrap() {
            visited.push(id);
        }
        drop(it);

        let pos_a = visited.iter().position(|&x| x == a).unwrap();
        let pos_b = visited.iter().position(|&x| x == b).unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn mutation_during_traversal_is_deferred_then_applied_in_order() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let start_version = graph.version();

        let new_nodes: Vec<NodeId> = (0..3).map(|_| graph.create_node()).collect();
        {
            let mut it = graph.pre_order(root);
            // Touching the graph while `it` is alive must defer.
            it.graph_mut().add(new_nodes[0], root);
            it.graph_mut().add(new_nodes[1], root);
            it.graph_mut().add(new_nodes[2], root);
            while it.next().unwrap().is_some() {}
        }
        // k=3 deferred mutations applied: version advanced by 3.
        assert_eq!(graph.version(), start_version + 3);

        // FIFO: new_nodes[2] ends up as first_child (last add wins front),
        // applied in request order means new_nodes[0] first, then 1, then
        // 2 — each insertion makes itself the new first child, so the
        // final first_child is new_nodes[2].
        let root_data = graph.node(root).unwrap();
        assert_eq!(root_data.first_child, Some(new_nodes[2]));
    }

    #[test]
    fn removing_currently_visited_node_does_not_affect_remainder_of_traversal() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let a = leaf(&mut graph, root);
        let b = leaf(&mut graph, root);

        let mut visited = Vec::new();
        {
            let mut it = graph.pre_order(root);
            while let Some(id) = it.next().unwrap() {
                visited.push(id);
                if id == a {
                    it.graph_mut().remove(a);
                }
            }
        }
        assert!(visited.contains(&a));
        assert!(visited.contains(&b));
        assert!(graph.node(a).is_none());
    }

    #[test]
    fn behaviors_advance_during_execute_behaviors() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let n = leaf(&mut graph, root);
        graph.add_behavior(n, Behavior::TimedRemoval { remaining: 1.0 });
        execute_behaviors(&mut graph, root, 0.5, &mut no_input_ctx()).unwrap();
        match &graph.node(n).unwrap().behaviors[0] {
            Behavior::TimedRemoval { remaining } => assert!((*remaining - 0.5).abs() < 1e-6),
            _ => panic!("unexpected behavior"),
        }
    }

    #[test]
    fn timed_removal_behavior_removes_node_when_expired() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let n = leaf(&mut graph, root);
        graph.add_behavior(n, Behavior::TimedRemoval { remaining: 0.1 });
        execute_behaviors(&mut graph, root, 1.0, &mut no_input_ctx()).unwrap();
        assert!(graph.node(n).is_none());
    }
}
