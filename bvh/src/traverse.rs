//! Single-ray kernels. Every ray walks the shared tree with a private stack
//! of `(node, entry distance)` pairs; packets run the same kernel lane by
//! lane.

use glam::*;
use smallvec::SmallVec;

use crate::node::{AlignedNode, OrientedNode};
use crate::primitives::{intersect_leaf, occluded_leaf, LeafPrimitive, QueryContext};
use crate::{rcp_safe, Bvh, NodeRef, Ray, RayPacket, MAX_BRANCHING};

#[derive(Debug, Copy, Clone)]
struct StackItem {
    node: NodeRef,
    dist: f32,
}

type Stack = SmallVec<[StackItem; 64]>;

/// Enough entries for a full descent: every level leaves at most
/// `branching - 1` siblings behind, plus the root and the sentinel.
pub fn stack_size<P: LeafPrimitive>(bvh: &Bvh<P>) -> usize {
    (bvh.max_depth() + 1) * (bvh.branching() - 1) + 2
}

fn start<P: LeafPrimitive>(bvh: &Bvh<P>, ray: &Ray, rdir: Vec3) -> Option<Stack> {
    if bvh.is_empty() {
        return None;
    }
    let (near, _) = bvh.bounds().intersect(ray.origin, rdir, ray.t_near, ray.t_far)?;

    let mut stack = Stack::new();
    stack.reserve(stack_size(bvh));
    stack.push(StackItem {
        node: NodeRef::Empty,
        dist: f32::NEG_INFINITY,
    });
    stack.push(StackItem {
        node: bvh.root(),
        dist: near,
    });
    Some(stack)
}

/// Tests the children of an inner node and pushes the hit ones so that the
/// nearest is popped first.
#[inline(always)]
fn push_children<P: LeafPrimitive>(bvh: &Bvh<P>, node: NodeRef, ray: &Ray, rdir: Vec3, stack: &mut Stack) {
    let n = bvh.branching();
    let mut dist = [0.0; MAX_BRANCHING];
    let (mask, children): (u32, SmallVec<[NodeRef; MAX_BRANCHING]>) = match node {
        NodeRef::Aligned(r) => {
            let aligned = AlignedNode::new(bvh.arena().words(r), n);
            let mask = aligned.intersect(ray.origin, rdir, ray.t_near, ray.t_far, &mut dist);
            (mask, (0..n).map(|i| aligned.child(i)).collect())
        }
        NodeRef::Oriented(r) => {
            let oriented = OrientedNode::new(bvh.arena().words(r), n);
            let mask = oriented.intersect(ray.origin, ray.direction, ray.t_near, ray.t_far, &mut dist);
            (mask, (0..n).map(|i| oriented.child(i)).collect())
        }
        NodeRef::Leaf(_) | NodeRef::Empty => return,
    };

    let mut hits: SmallVec<[StackItem; MAX_BRANCHING]> = SmallVec::new();
    for (i, child) in children.iter().enumerate() {
        if mask & (1 << i) != 0 {
            hits.push(StackItem {
                node: *child,
                dist: dist[i],
            });
        }
    }
    hits.sort_by(|a, b| b.dist.partial_cmp(&a.dist).unwrap_or(std::cmp::Ordering::Equal));
    stack.extend(hits);
}

/// Closest-hit query. Returns true when `ray` now holds a closer hit.
pub fn intersect<P: LeafPrimitive>(bvh: &Bvh<P>, ray: &mut Ray, ctx: &QueryContext) -> bool {
    let rdir = rcp_safe(ray.direction);
    let mut stack = match start(bvh, ray, rdir) {
        Some(stack) => stack,
        None => return false,
    };

    let mut hit = false;
    while let Some(item) = stack.pop() {
        if item.node.is_empty() {
            break;
        }
        // Pruned by a hit found after the entry was pushed.
        if item.dist > ray.t_far {
            continue;
        }
        match item.node {
            NodeRef::Leaf(r) => hit |= intersect_leaf::<P>(bvh.arena().words(r), ray, ctx),
            node => push_children(bvh, node, ray, rdir, &mut stack),
        }
    }
    hit
}

/// Any-hit query. Sets `ray.terminated` and returns true at the first
/// primitive found inside the ray interval.
pub fn occluded<P: LeafPrimitive>(bvh: &Bvh<P>, ray: &mut Ray, ctx: &QueryContext) -> bool {
    if ray.terminated {
        return true;
    }
    let rdir = rcp_safe(ray.direction);
    let mut stack = match start(bvh, ray, rdir) {
        Some(stack) => stack,
        None => return false,
    };

    while let Some(item) = stack.pop() {
        if item.node.is_empty() {
            break;
        }
        match item.node {
            NodeRef::Leaf(r) => {
                if occluded_leaf::<P>(bvh.arena().words(r), ray, ctx) {
                    ray.terminated = true;
                    return true;
                }
            }
            node => push_children(bvh, node, ray, rdir, &mut stack),
        }
    }
    false
}

pub fn intersect_packet<P: LeafPrimitive, const W: usize>(
    bvh: &Bvh<P>,
    valid: &[bool; W],
    packet: &mut RayPacket<W>,
    ctx: &QueryContext,
) {
    for lane in 0..W {
        if !valid[lane] {
            continue;
        }
        let mut ray = packet.ray(lane);
        if intersect(bvh, &mut ray, ctx) {
            packet.set_ray(lane, &ray);
        }
    }
}

pub fn occluded_packet<P: LeafPrimitive, const W: usize>(
    bvh: &Bvh<P>,
    valid: &[bool; W],
    packet: &mut RayPacket<W>,
    ctx: &QueryContext,
) {
    for lane in 0..W {
        if !valid[lane] || packet.terminated[lane] {
            continue;
        }
        let mut ray = packet.ray(lane);
        packet.terminated[lane] = occluded(bvh, &mut ray, ctx);
    }
}
