//! Node encoding inside the arena.
//!
//! A child slot is two words: a 2 bit tag plus 30 bit block id, then the word
//! offset. Node payloads are structure-of-arrays over the branching factor so
//! all children are tested against a ray in one pass:
//!
//! * aligned: `lower_x, lower_y, lower_z, upper_x, upper_y, upper_z` then the
//!   child slots,
//! * oriented: nine frame rows, then the local `lower`/`upper` boxes, then
//!   the child slots.
//!
//! Children are packed to the front; unused slots hold [`NodeRef::Empty`].

use glam::*;

use crate::{Aabb, BlockRef, Frame};

const TAG_SHIFT: u32 = 30;
const BLOCK_MASK: u32 = (1 << TAG_SHIFT) - 1;

const TAG_EMPTY: u32 = 0;
const TAG_ALIGNED: u32 = 1;
const TAG_ORIENTED: u32 = 2;
const TAG_LEAF: u32 = 3;

pub const CHILD_WORDS: usize = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Empty,
    Aligned(BlockRef),
    Oriented(BlockRef),
    Leaf(BlockRef),
}

impl Default for NodeRef {
    fn default() -> Self {
        NodeRef::Empty
    }
}

impl NodeRef {
    pub fn encode(self) -> [u32; 2] {
        let (tag, r) = match self {
            NodeRef::Empty => return [0, 0],
            NodeRef::Aligned(r) => (TAG_ALIGNED, r),
            NodeRef::Oriented(r) => (TAG_ORIENTED, r),
            NodeRef::Leaf(r) => (TAG_LEAF, r),
        };
        [(tag << TAG_SHIFT) | (r.block & BLOCK_MASK), r.offset]
    }

    pub fn decode(words: [u32; 2]) -> NodeRef {
        let r = BlockRef {
            block: words[0] & BLOCK_MASK,
            offset: words[1],
        };
        match words[0] >> TAG_SHIFT {
            TAG_EMPTY => NodeRef::Empty,
            TAG_ALIGNED => NodeRef::Aligned(r),
            TAG_ORIENTED => NodeRef::Oriented(r),
            _ => NodeRef::Leaf(r),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, NodeRef::Empty)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeRef::Leaf(_))
    }
}

pub fn aligned_node_words(branching: usize) -> usize {
    branching * (6 + CHILD_WORDS)
}

pub fn oriented_node_words(branching: usize) -> usize {
    branching * (15 + CHILD_WORDS)
}

fn read_child(words: &[u32], base: usize, i: usize) -> NodeRef {
    let at = base + i * CHILD_WORDS;
    NodeRef::decode([words[at], words[at + 1]])
}

fn write_child(words: &mut [u32], base: usize, i: usize, node: NodeRef) {
    let at = base + i * CHILD_WORDS;
    let encoded = node.encode();
    words[at] = encoded[0];
    words[at + 1] = encoded[1];
}

#[derive(Debug, Copy, Clone)]
pub struct AlignedChild {
    pub bounds: Aabb,
    pub node: NodeRef,
}

#[derive(Debug, Copy, Clone)]
pub struct OrientedChild {
    pub frame: Frame,
    pub bounds: Aabb,
    pub node: NodeRef,
}

/// Writes an aligned node over storage of [`aligned_node_words`] words.
pub fn write_aligned(words: &mut [u32], branching: usize, children: &[AlignedChild]) {
    let n = branching;
    for i in 0..n {
        let (bounds, node) = match children.get(i) {
            Some(child) => (child.bounds, child.node),
            None => (Aabb::empty(), NodeRef::Empty),
        };
        for axis in 0..3 {
            words[axis * n + i] = bounds.min[axis].to_bits();
            words[(3 + axis) * n + i] = bounds.max[axis].to_bits();
        }
        write_child(words, 6 * n, i, node);
    }
}

/// Writes an oriented node over storage of [`oriented_node_words`] words.
pub fn write_oriented(words: &mut [u32], branching: usize, children: &[OrientedChild]) {
    let n = branching;
    for i in 0..n {
        let (frame, bounds, node) = match children.get(i) {
            Some(child) => (child.frame, child.bounds, child.node),
            None => (Frame::IDENTITY, Aabb::empty(), NodeRef::Empty),
        };
        for (row, value) in frame.rows().iter().enumerate() {
            words[row * n + i] = value.to_bits();
        }
        for axis in 0..3 {
            words[(9 + axis) * n + i] = bounds.min[axis].to_bits();
            words[(12 + axis) * n + i] = bounds.max[axis].to_bits();
        }
        write_child(words, 15 * n, i, node);
    }
}

/// Read-only view of an aligned node.
#[derive(Copy, Clone)]
pub struct AlignedNode<'a> {
    words: &'a [u32],
    n: usize,
}

impl<'a> AlignedNode<'a> {
    pub fn new(words: &'a [u32], branching: usize) -> Self {
        Self { words, n: branching }
    }

    #[inline(always)]
    fn float(&self, row: usize, i: usize) -> f32 {
        f32::from_bits(self.words[row * self.n + i])
    }

    pub fn child(&self, i: usize) -> NodeRef {
        read_child(self.words, 6 * self.n, i)
    }

    pub fn bounds(&self, i: usize) -> Aabb {
        Aabb {
            min: [self.float(0, i), self.float(1, i), self.float(2, i)],
            max: [self.float(3, i), self.float(4, i), self.float(5, i)],
        }
    }

    pub fn branching(&self) -> usize {
        self.n
    }

    /// Slab test of all children at once. Writes entry distances to `dist`
    /// and returns a bit mask of the children hit within `[t_near, t_far]`.
    #[inline(always)]
    pub fn intersect(&self, origin: Vec3, rdir: Vec3, t_near: f32, t_far: f32, dist: &mut [f32]) -> u32 {
        let mut mask = 0;
        for i in 0..self.n {
            if self.child(i).is_empty() {
                break;
            }
            let tx0 = (self.float(0, i) - origin.x) * rdir.x;
            let ty0 = (self.float(1, i) - origin.y) * rdir.y;
            let tz0 = (self.float(2, i) - origin.z) * rdir.z;
            let tx1 = (self.float(3, i) - origin.x) * rdir.x;
            let ty1 = (self.float(4, i) - origin.y) * rdir.y;
            let tz1 = (self.float(5, i) - origin.z) * rdir.z;

            let near = tx0.min(tx1).max(ty0.min(ty1)).max(tz0.min(tz1)).max(t_near);
            let far = tx0.max(tx1).min(ty0.max(ty1)).min(tz0.max(tz1)) * ROBUST_EXIT;
            let far = far.min(t_far);

            dist[i] = near;
            if near <= far {
                mask |= 1 << i;
            }
        }
        mask
    }
}

/// Read-only view of an oriented node.
#[derive(Copy, Clone)]
pub struct OrientedNode<'a> {
    words: &'a [u32],
    n: usize,
}

impl<'a> OrientedNode<'a> {
    pub fn new(words: &'a [u32], branching: usize) -> Self {
        Self { words, n: branching }
    }

    #[inline(always)]
    fn float(&self, row: usize, i: usize) -> f32 {
        f32::from_bits(self.words[row * self.n + i])
    }

    pub fn child(&self, i: usize) -> NodeRef {
        read_child(self.words, 15 * self.n, i)
    }

    pub fn frame(&self, i: usize) -> Frame {
        let mut rows = [0.0; 9];
        for (row, value) in rows.iter_mut().enumerate() {
            *value = self.float(row, i);
        }
        Frame::from_rows(rows)
    }

    /// Child bounds in the child's own frame.
    pub fn bounds(&self, i: usize) -> Aabb {
        Aabb {
            min: [self.float(9, i), self.float(10, i), self.float(11, i)],
            max: [self.float(12, i), self.float(13, i), self.float(14, i)],
        }
    }

    pub fn branching(&self) -> usize {
        self.n
    }

    /// Transforms the ray into each child's frame and slab tests its local
    /// box. Same contract as [`AlignedNode::intersect`].
    #[inline(always)]
    pub fn intersect(&self, origin: Vec3, direction: Vec3, t_near: f32, t_far: f32, dist: &mut [f32]) -> u32 {
        let mut mask = 0;
        for i in 0..self.n {
            if self.child(i).is_empty() {
                break;
            }
            let frame = self.frame(i);
            let local_origin = frame.to_local(origin);
            let local_rdir = crate::rcp_safe(frame.to_local(direction));
            if let Some((near, _)) = self.bounds(i).intersect(local_origin, local_rdir, t_near, t_far) {
                dist[i] = near;
                mask |= 1 << i;
            }
        }
        mask
    }
}

const ROBUST_EXIT: f32 = 1.0 + 4.0 * f32::EPSILON;
