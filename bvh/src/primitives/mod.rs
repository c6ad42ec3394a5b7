//! Leaf payloads.
//!
//! A leaf is a header word holding the item count followed by fixed size
//! blocks of [`LeafPrimitive::BLOCK_WORDS`] words, each packing up to
//! [`LeafPrimitive::BLOCK_SIZE`] primitives. Every kind pairs its block writer
//! with the intersectors traversal calls for it.

mod bezier1;
mod triangle1;
mod triangle4;

pub use bezier1::*;
pub use triangle1::*;
pub use triangle4::*;

use bitvec::prelude::*;
use glam::*;

use crate::{
    Aabb, BezierCurve, BuildError, Frame, Geometry, GeometryKind, NodeRef, PrimRef, Ray, Scene,
    ThreadAllocator, Triangle,
};

/// Per-query state shared by every leaf test.
#[derive(Copy, Clone)]
pub struct QueryContext<'a> {
    deleted: &'a BitSlice,
}

impl<'a> QueryContext<'a> {
    pub fn new(deleted: &'a BitSlice) -> Self {
        Self { deleted }
    }

    #[inline(always)]
    pub fn is_live(&self, geom_id: u32) -> bool {
        !self.deleted.get(geom_id as usize).map_or(false, |bit| *bit)
    }
}

impl Default for QueryContext<'static> {
    fn default() -> Self {
        Self {
            deleted: BitSlice::empty(),
        }
    }
}

pub trait LeafPrimitive: Send + Sync + 'static {
    const NAME: &'static str;
    const KIND: GeometryKind;
    /// Primitives per block; a power of two.
    const BLOCK_SIZE: usize;
    const BLOCK_WORDS: usize;
    /// Whether nodes above these leaves may use oriented bounds.
    const ORIENTABLE: bool = false;

    /// Packs up to `BLOCK_SIZE` references into one block.
    fn write_block(scene: &dyn Scene, prims: &[PrimRef], block: &mut [u32]) -> Result<(), BuildError>;

    /// Closest-hit test of one block; true when the ray was updated.
    fn intersect_block(block: &[u32], ray: &mut Ray, ctx: &QueryContext) -> bool;

    /// Any-hit test of one block.
    fn occluded_block(block: &[u32], ray: &Ray, ctx: &QueryContext) -> bool;

    /// Ids of the item in `lane`, `None` for unused lanes.
    fn item(block: &[u32], lane: usize) -> Option<(u32, u32)>;

    /// Bounds of the item in `lane` expressed in `frame`.
    fn item_bounds(block: &[u32], lane: usize, frame: &Frame) -> Aabb;

    /// Bounds of a reference in `frame`; the box of its world bounds unless
    /// the primitive knows better.
    fn bounds_in_frame(_scene: &dyn Scene, prim: &PrimRef, frame: &Frame) -> Aabb {
        frame.bounds_of(&prim.bounds)
    }

    /// Principal direction of an elongated primitive, zero otherwise.
    fn direction(_scene: &dyn Scene, _prim: &PrimRef) -> Vec3 {
        Vec3::ZERO
    }
}

/// Words needed for a leaf of `count` items.
pub fn leaf_words<P: LeafPrimitive>(count: usize) -> usize {
    1 + leaf_blocks::<P>(count) * P::BLOCK_WORDS
}

fn leaf_blocks<P: LeafPrimitive>(count: usize) -> usize {
    (count + P::BLOCK_SIZE - 1) / P::BLOCK_SIZE
}

pub fn create_leaf<P: LeafPrimitive>(
    scene: &dyn Scene,
    prims: &[PrimRef],
    alloc: &mut ThreadAllocator,
) -> Result<NodeRef, BuildError> {
    let (leaf, words) = alloc.allocate(4 * leaf_words::<P>(prims.len()), 16)?;
    words[0] = prims.len() as u32;
    for (chunk, block) in prims
        .chunks(P::BLOCK_SIZE)
        .zip(words[1..].chunks_exact_mut(P::BLOCK_WORDS))
    {
        P::write_block(scene, chunk, block)?;
    }
    Ok(NodeRef::Leaf(leaf))
}

/// Blocks of the leaf starting at `words`.
#[inline(always)]
pub fn leaf_block_iter<P: LeafPrimitive>(words: &[u32]) -> impl Iterator<Item = &[u32]> {
    let blocks = leaf_blocks::<P>(words[0] as usize);
    words[1..1 + blocks * P::BLOCK_WORDS].chunks_exact(P::BLOCK_WORDS)
}

pub fn intersect_leaf<P: LeafPrimitive>(words: &[u32], ray: &mut Ray, ctx: &QueryContext) -> bool {
    let mut hit = false;
    for block in leaf_block_iter::<P>(words) {
        hit |= P::intersect_block(block, ray, ctx);
    }
    hit
}

pub fn occluded_leaf<P: LeafPrimitive>(words: &[u32], ray: &Ray, ctx: &QueryContext) -> bool {
    leaf_block_iter::<P>(words).any(|block| P::occluded_block(block, ray, ctx))
}

/// Calls `f` with the ids and bounds in `frame` of every item in the leaf.
pub fn for_each_leaf_item<P: LeafPrimitive, F: FnMut(u32, u32, Aabb)>(words: &[u32], frame: &Frame, mut f: F) {
    for block in leaf_block_iter::<P>(words) {
        for lane in 0..P::BLOCK_SIZE {
            if let Some((geom_id, prim_id)) = P::item(block, lane) {
                f(geom_id, prim_id, P::item_bounds(block, lane, frame));
            }
        }
    }
}

pub(crate) fn fetch_triangle(scene: &dyn Scene, prim: &PrimRef) -> Result<Triangle, BuildError> {
    match scene.geometry(prim.geom_id) {
        Some(Geometry::Triangles(set)) if (prim.prim_id as usize) < set.len() => Ok(set.triangle(prim.prim_id)),
        _ => Err(BuildError::MissingGeometry { geom_id: prim.geom_id }),
    }
}

pub(crate) fn fetch_curve(scene: &dyn Scene, prim: &PrimRef) -> Option<BezierCurve> {
    match scene.geometry(prim.geom_id) {
        Some(Geometry::Curves(set)) if (prim.prim_id as usize) < set.len() => Some(set.curve(prim.prim_id)),
        _ => None,
    }
}

#[inline(always)]
pub(crate) fn read_vec3(words: &[u32], at: usize) -> Vec3 {
    Vec3::new(
        f32::from_bits(words[at]),
        f32::from_bits(words[at + 1]),
        f32::from_bits(words[at + 2]),
    )
}

#[inline(always)]
pub(crate) fn write_vec3(words: &mut [u32], at: usize, v: Vec3) {
    words[at] = v.x.to_bits();
    words[at + 1] = v.y.to_bits();
    words[at + 2] = v.z.to_bits();
}
