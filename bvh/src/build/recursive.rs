use log::trace;
use smallvec::SmallVec;

use super::heuristic::CostEvaluator;
use crate::node::{aligned_node_words, oriented_node_words, write_aligned, write_oriented, AlignedChild, OrientedChild};
use crate::primitives::{create_leaf, LeafPrimitive};
use crate::{
    Aabb, BlockAllocator, BuildError, DerivedSettings, Frame, NodeRef, PrimInfo, PrimRef, Scene, ThreadAllocator,
    MAX_BRANCHING,
};

/// A contiguous range of the reference array still to be built.
#[derive(Default)]
pub struct BuildRecord<'r> {
    /// Index of the first reference in the whole array.
    pub begin: usize,
    pub prims: &'r mut [PrimRef],
    pub info: PrimInfo,
    pub depth: usize,
}

impl<'r> BuildRecord<'r> {
    pub fn new(begin: usize, prims: &'r mut [PrimRef], depth: usize) -> Self {
        let info = PrimInfo::from_prims(prims);
        Self {
            begin,
            prims,
            info,
            depth,
        }
    }

    pub fn len(&self) -> usize {
        self.prims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prims.is_empty()
    }

    fn reborrow(&mut self) -> BuildRecord<'_> {
        BuildRecord {
            begin: self.begin,
            prims: &mut *self.prims,
            info: self.info,
            depth: self.depth,
        }
    }

    fn split(self, left: usize) -> (BuildRecord<'r>, BuildRecord<'r>) {
        let BuildRecord {
            begin, prims, depth, ..
        } = self;
        let (l, r) = prims.split_at_mut(left);
        (BuildRecord::new(begin, l, depth), BuildRecord::new(begin + left, r, depth))
    }
}

type Children<'r> = SmallVec<[BuildRecord<'r>; MAX_BRANCHING]>;

/// Node opened by [`RecursiveBuilder::open`]: the child ranges plus the
/// bounds to store for each of them.
struct OpenNode<'r> {
    children: Children<'r>,
    frames: Option<SmallVec<[(Frame, Aabb); MAX_BRANCHING]>>,
}

enum Step<'r> {
    Leaf(NodeRef),
    Node(OpenNode<'r>),
}

pub struct RecursiveBuilder<'s, P> {
    scene: &'s dyn Scene,
    settings: &'s DerivedSettings,
    heuristic: CostEvaluator<'s, P>,
}

impl<'s, P: LeafPrimitive> RecursiveBuilder<'s, P> {
    pub fn new(scene: &'s dyn Scene, settings: &'s DerivedSettings) -> Self {
        Self {
            scene,
            settings,
            heuristic: CostEvaluator::new(scene, settings),
        }
    }

    /// Builds the whole array. When finished ranges are reused, the storage
    /// of completed subtrees is handed to `alloc` while the build goes on.
    pub fn build<'p>(
        &self,
        prims: &'p mut [PrimRef],
        info: PrimInfo,
        alloc: &BlockAllocator<'p>,
    ) -> Result<NodeRef, BuildError> {
        let record = BuildRecord {
            begin: 0,
            prims,
            info,
            depth: 0,
        };

        let mut local = alloc.cached();
        if record.len() > self.settings.finished_range_threshold {
            self.recurse_top(record, &mut local)
        } else {
            self.recurse(record, &mut local)
        }
    }

    /// Recursion above the finished-range threshold. Children that drop to
    /// the threshold are built and then released to the allocator.
    fn recurse_top<'p>(
        &self,
        record: BuildRecord<'p>,
        alloc: &mut ThreadAllocator<'_, 'p>,
    ) -> Result<NodeRef, BuildError> {
        let threshold = self.settings.finished_range_threshold;
        match self.open(record, alloc)? {
            Step::Leaf(leaf) => Ok(leaf),
            Step::Node(node) => self.close(node, alloc, |builder, mut child, alloc| {
                if child.len() > threshold {
                    return builder.recurse_top(child, alloc);
                }
                let subtree = builder.recurse(child.reborrow(), alloc)?;
                alloc.parent().add_block(child.begin, child.prims);
                Ok(subtree)
            }),
        }
    }

    fn recurse<'r, 'p>(
        &self,
        record: BuildRecord<'r>,
        alloc: &mut ThreadAllocator<'_, 'p>,
    ) -> Result<NodeRef, BuildError> {
        match self.open(record, alloc)? {
            Step::Leaf(leaf) => Ok(leaf),
            Step::Node(node) => self.close(node, alloc, |builder, child, alloc| builder.recurse(child, alloc)),
        }
    }

    /// Decides between a leaf and an inner node. Inner nodes grow by
    /// repeatedly splitting the child with the largest surface area until the
    /// branching factor is reached or nothing can be split any more.
    fn open<'r, 'p>(
        &self,
        record: BuildRecord<'r>,
        alloc: &mut ThreadAllocator<'_, 'p>,
    ) -> Result<Step<'r>, BuildError> {
        let s = self.settings;
        if record.len() <= s.max_leaf_size || record.depth >= s.max_depth {
            return self.leaf(record, alloc);
        }

        let depth = record.depth;
        let mut children: Children<'r> = SmallVec::new();
        let mut splittable: SmallVec<[bool; MAX_BRANCHING]> = SmallVec::new();
        let mut oriented = false;
        children.push(record);
        splittable.push(true);

        while children.len() < s.branching_factor {
            let mut best: Option<usize> = None;
            let mut best_area = f32::NEG_INFINITY;
            for (i, child) in children.iter().enumerate() {
                if !splittable[i] || child.len() <= s.max_leaf_size {
                    continue;
                }
                let area = child.info.geom_bounds.area();
                if area > best_area {
                    best_area = area;
                    best = Some(i);
                }
            }
            let best = match best {
                Some(best) => best,
                None => break,
            };

            let child = &mut children[best];
            let split = self
                .heuristic
                .find(&*child.prims, &child.info)
                .filter(|split| split.cost < self.heuristic.leaf_cost(child.len()));
            let mut split = match split {
                Some(split) => split,
                None => {
                    splittable[best] = false;
                    continue;
                }
            };

            let left = self.heuristic.partition(child.prims, &mut split);
            if left == 0 || left == child.len() {
                splittable[best] = false;
                continue;
            }

            oriented |= split.is_oriented();
            let (l, r) = std::mem::take(child).split(left);
            children[best] = l;
            children.push(r);
            splittable.push(true);
        }

        if children.len() == 1 {
            if let Some(record) = children.pop() {
                return self.leaf(record, alloc);
            }
        }

        for child in children.iter_mut() {
            child.depth = depth + 1;
        }

        // Bounds are taken before recursing, the ranges may be released as
        // storage once their subtrees exist.
        let frames: Option<SmallVec<[(Frame, Aabb); MAX_BRANCHING]>> = if oriented {
            Some(
                children
                    .iter()
                    .map(|child| {
                        let frame = self.heuristic.aligned_space(&*child.prims);
                        let bounds: Aabb = self.heuristic.bounds_in(&*child.prims, &frame).into_iter().collect();
                        (frame, bounds)
                    })
                    .collect(),
            )
        } else {
            None
        };

        Ok(Step::Node(OpenNode { children, frames }))
    }

    fn leaf<'r, 'p>(
        &self,
        record: BuildRecord<'r>,
        alloc: &mut ThreadAllocator<'_, 'p>,
    ) -> Result<Step<'r>, BuildError> {
        create_leaf::<P>(self.scene, record.prims, alloc).map(Step::Leaf)
    }

    /// Builds the children of an opened node, in parallel for large ones,
    /// and writes the node itself.
    fn close<'r, 'p, F>(
        &self,
        node: OpenNode<'r>,
        alloc: &mut ThreadAllocator<'_, 'p>,
        build: F,
    ) -> Result<NodeRef, BuildError>
    where
        F: Fn(&Self, BuildRecord<'r>, &mut ThreadAllocator<'_, 'p>) -> Result<NodeRef, BuildError> + Sync,
    {
        let OpenNode { children, frames } = node;
        let world: SmallVec<[Aabb; MAX_BRANCHING]> = children.iter().map(|c| c.info.geom_bounds).collect();

        let mut slots: SmallVec<[Result<NodeRef, BuildError>; MAX_BRANCHING]> =
            (0..children.len()).map(|_| Ok(NodeRef::Empty)).collect();
        let parent = alloc.parent();
        let parallel_threshold = self.settings.parallel_threshold;
        let build = &build;

        rayon::scope(|scope| {
            for (child, slot) in children.into_iter().zip(slots.iter_mut()) {
                if child.len() >= parallel_threshold {
                    scope.spawn(move |_| {
                        let mut local = parent.cached();
                        *slot = build(self, child, &mut local);
                    });
                } else {
                    *slot = build(self, child, alloc);
                }
            }
        });

        let mut nodes: SmallVec<[NodeRef; MAX_BRANCHING]> = SmallVec::new();
        for slot in slots {
            nodes.push(slot?);
        }

        let n = self.settings.branching_factor;
        match frames {
            None => {
                let entries: SmallVec<[AlignedChild; MAX_BRANCHING]> = world
                    .iter()
                    .zip(nodes.iter())
                    .map(|(bounds, node)| AlignedChild {
                        bounds: *bounds,
                        node: *node,
                    })
                    .collect();
                let (r, words) = alloc.allocate(4 * aligned_node_words(n), 16)?;
                write_aligned(words, n, &entries);
                Ok(NodeRef::Aligned(r))
            }
            Some(frames) => {
                trace!("oriented node with {} children", nodes.len());
                let entries: SmallVec<[OrientedChild; MAX_BRANCHING]> = frames
                    .iter()
                    .zip(nodes.iter())
                    .map(|((frame, bounds), node)| OrientedChild {
                        frame: *frame,
                        bounds: *bounds,
                        node: *node,
                    })
                    .collect();
                let (r, words) = alloc.allocate(4 * oriented_node_words(n), 16)?;
                write_oriented(words, n, &entries);
                Ok(NodeRef::Oriented(r))
            }
        }
    }
}
