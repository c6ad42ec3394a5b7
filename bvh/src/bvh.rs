use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

use crate::node::{AlignedNode, OrientedNode};
use crate::primitives::{for_each_leaf_item, leaf_block_iter, LeafPrimitive, QueryContext};
use crate::{traverse, Aabb, Arena, DerivedSettings, Frame, NodeRef, Ray};

/// A built hierarchy: root reference, aggregate bounds and the arena that
/// holds every node and leaf.
pub struct Bvh<P> {
    root: NodeRef,
    bounds: Aabb,
    prim_count: usize,
    branching: usize,
    max_depth: usize,
    arena: Arena,
    _marker: PhantomData<P>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BvhStats {
    pub aligned_nodes: usize,
    pub oriented_nodes: usize,
    pub leaves: usize,
    pub primitives: usize,
    pub depth: usize,
    pub used_bytes: usize,
    pub reserved_bytes: usize,
}

impl Display for BvhStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} aligned + {} oriented nodes, {} leaves, {} primitives, depth {}, {} / {} bytes",
            self.aligned_nodes,
            self.oriented_nodes,
            self.leaves,
            self.primitives,
            self.depth,
            self.used_bytes,
            self.reserved_bytes
        )
    }
}

impl<P: LeafPrimitive> Default for Bvh<P> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<P: LeafPrimitive> Bvh<P> {
    pub fn empty() -> Self {
        Self {
            root: NodeRef::Empty,
            bounds: Aabb::empty(),
            prim_count: 0,
            branching: 2,
            max_depth: 0,
            arena: Arena::default(),
            _marker: PhantomData,
        }
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn prim_count(&self) -> usize {
        self.prim_count
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn branching(&self) -> usize {
        self.branching
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    pub(crate) fn publish(
        &mut self,
        root: NodeRef,
        bounds: Aabb,
        prim_count: usize,
        settings: &DerivedSettings,
        arena: Arena,
    ) {
        self.root = root;
        self.bounds = bounds;
        self.prim_count = prim_count;
        self.branching = settings.branching_factor;
        self.max_depth = settings.max_depth;
        self.arena = arena;
    }

    #[inline(always)]
    pub fn intersect(&self, ray: &mut Ray, ctx: &QueryContext) -> bool {
        traverse::intersect(self, ray, ctx)
    }

    #[inline(always)]
    pub fn occluded(&self, ray: &mut Ray, ctx: &QueryContext) -> bool {
        traverse::occluded(self, ray, ctx)
    }

    /// Visits every reachable node depth first, children in slot order.
    fn walk<F: FnMut(NodeRef, usize, &[(Frame, Aabb)])>(&self, mut f: F) {
        let mut path: Vec<(Frame, Aabb)> = Vec::new();
        self.walk_node(self.root, 0, &mut path, &mut f);
    }

    fn walk_node<F: FnMut(NodeRef, usize, &[(Frame, Aabb)])>(
        &self,
        node: NodeRef,
        depth: usize,
        path: &mut Vec<(Frame, Aabb)>,
        f: &mut F,
    ) {
        f(node, depth, path);
        match node {
            NodeRef::Aligned(r) => {
                let aligned = AlignedNode::new(self.arena.words(r), self.branching);
                for i in 0..self.branching {
                    let child = aligned.child(i);
                    if child.is_empty() {
                        break;
                    }
                    path.push((Frame::IDENTITY, aligned.bounds(i)));
                    self.walk_node(child, depth + 1, path, f);
                    path.pop();
                }
            }
            NodeRef::Oriented(r) => {
                let oriented = OrientedNode::new(self.arena.words(r), self.branching);
                for i in 0..self.branching {
                    let child = oriented.child(i);
                    if child.is_empty() {
                        break;
                    }
                    path.push((oriented.frame(i), oriented.bounds(i)));
                    self.walk_node(child, depth + 1, path, f);
                    path.pop();
                }
            }
            NodeRef::Leaf(_) | NodeRef::Empty => (),
        }
    }

    pub fn statistics(&self) -> BvhStats {
        let mut stats = BvhStats::default();
        self.walk(|node, depth, _| {
            stats.depth = stats.depth.max(depth);
            match node {
                NodeRef::Aligned(_) => stats.aligned_nodes += 1,
                NodeRef::Oriented(_) => stats.oriented_nodes += 1,
                NodeRef::Leaf(r) => {
                    stats.leaves += 1;
                    stats.primitives += self.arena.words(r)[0] as usize;
                }
                NodeRef::Empty => (),
            }
        });

        let arena = self.arena.stats();
        stats.used_bytes = arena.used_bytes;
        stats.reserved_bytes = arena.reserved_bytes + arena.shared_bytes;
        stats
    }

    /// Checks that every primitive lies inside the bounds of all its
    /// ancestors (oriented ones in their own frame), that inner nodes keep
    /// their children packed, and that the leaves add up to the published
    /// bounds and primitive count.
    pub fn validate(&self) -> Result<(), String> {
        let mut union = Aabb::empty();
        let mut count = 0;
        let mut error: Option<String> = None;

        self.walk(|node, _, path| {
            if error.is_some() {
                return;
            }
            match node {
                NodeRef::Leaf(r) => {
                    for block in leaf_block_iter::<P>(self.arena.words(r)) {
                        for lane in 0..P::BLOCK_SIZE {
                            let (geom_id, prim_id) = match P::item(block, lane) {
                                Some(ids) => ids,
                                None => continue,
                            };
                            union.grow_bb(&P::item_bounds(block, lane, &Frame::IDENTITY));
                            count += 1;
                            for (level, (frame, volume)) in path.iter().enumerate() {
                                let local = P::item_bounds(block, lane, frame);
                                if !volume.contains(&local) && error.is_none() {
                                    error = Some(format!(
                                        "primitive ({}, {}) escapes its ancestor at depth {}: {} not in {}",
                                        geom_id, prim_id, level, local, volume
                                    ));
                                }
                            }
                        }
                    }
                }
                NodeRef::Aligned(r) => {
                    let aligned = AlignedNode::new(self.arena.words(r), self.branching);
                    if let Some(msg) = check_packed((0..self.branching).map(|i| aligned.child(i))) {
                        error = Some(msg);
                    }
                }
                NodeRef::Oriented(r) => {
                    let oriented = OrientedNode::new(self.arena.words(r), self.branching);
                    if let Some(msg) = check_packed((0..self.branching).map(|i| oriented.child(i))) {
                        error = Some(msg);
                    }
                }
                NodeRef::Empty => (),
            }
        });

        if let Some(error) = error {
            return Err(error);
        }
        if count != self.prim_count {
            return Err(format!("leaves hold {} primitives, tree reports {}", count, self.prim_count));
        }
        if union != self.bounds {
            return Err(format!("leaf bounds {} differ from root bounds {}", union, self.bounds));
        }
        Ok(())
    }

    /// `(geometry, primitive)` ids of every leaf in depth first order.
    pub fn leaf_partition(&self) -> Vec<Vec<(u32, u32)>> {
        let mut leaves = Vec::new();
        self.walk(|node, _, _| {
            if let NodeRef::Leaf(r) = node {
                let mut ids = Vec::new();
                for_each_leaf_item::<P, _>(self.arena.words(r), &Frame::IDENTITY, |geom_id, prim_id, _| {
                    ids.push((geom_id, prim_id))
                });
                leaves.push(ids);
            }
        });
        leaves
    }
}

fn check_packed<I: Iterator<Item = NodeRef>>(children: I) -> Option<String> {
    let mut seen_empty = false;
    let mut used = 0;
    for child in children {
        if child.is_empty() {
            seen_empty = true;
        } else if seen_empty {
            return Some("inner node has a child after an empty slot".to_string());
        } else {
            used += 1;
        }
    }
    if used < 2 {
        return Some(format!("inner node with {} children", used));
    }
    None
}
