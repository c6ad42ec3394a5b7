use log::{debug, info};
use std::marker::PhantomData;
use std::time::Instant;

use super::recursive::RecursiveBuilder;
use crate::node::{aligned_node_words, oriented_node_words};
use crate::primitives::{leaf_words, LeafPrimitive};
use crate::{
    count_primitives, create_prim_ref_array, BlockAllocator, BuildError, BuildSettings, Bvh, DerivedSettings,
    PrimRef, Scene,
};

/// Top level build driver. Keeps the reference array between builds so its
/// capacity is reused, and lends it to the tree when nodes live inside it.
pub struct SahBuilder<P> {
    settings: BuildSettings,
    prims: Vec<PrimRef>,
    _marker: PhantomData<P>,
}

impl<P: LeafPrimitive> SahBuilder<P> {
    pub fn new(settings: BuildSettings) -> Self {
        Self {
            settings,
            prims: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Rough upper bound of node plus leaf storage for `count` references.
    fn estimate_bytes(settings: &DerivedSettings, count: usize) -> usize {
        let node_words = if P::ORIENTABLE {
            oriented_node_words(settings.branching_factor)
        } else {
            aligned_node_words(settings.branching_factor)
        };
        let nodes = count / settings.min_leaf_size.max(1) / (settings.branching_factor - 1).max(1) + 1;
        let leaves = count / settings.min_leaf_size.max(1) + 1;
        let leaf_bytes = 4 * (leaf_words::<P>(count) + leaves);
        4 * node_words * nodes + leaf_bytes + leaf_bytes / 5
    }

    /// Rebuilds `bvh` from scratch. On error the tree is left empty.
    pub fn build(&mut self, scene: &dyn Scene, bvh: &mut Bvh<P>) -> Result<(), BuildError> {
        let start = Instant::now();

        if let Some(prims) = bvh.arena_mut().unshare() {
            self.prims = prims;
        }
        bvh.clear();

        let count = count_primitives(scene, P::KIND);
        if count == 0 {
            debug!("{}: no primitives, publishing empty tree", P::NAME);
            self.prims = Vec::new();
            return Ok(());
        }

        let settings = self.settings.derive(P::BLOCK_SIZE, count)?;
        let info = create_prim_ref_array(scene, P::KIND, &mut self.prims);
        if info.count == 0 {
            return Ok(());
        }
        debug!(
            "{}: building over {} primitives, branching {}, leaves {}..={}, finished range threshold {}",
            P::NAME,
            info.count,
            settings.branching_factor,
            settings.min_leaf_size,
            settings.max_leaf_size,
            if settings.reuses_finished_ranges() {
                settings.finished_range_threshold.to_string()
            } else {
                "off".to_string()
            },
        );

        let alloc = BlockAllocator::new(self.settings.block_bytes, self.settings.memory_limit);
        let root = alloc
            .estimate(Self::estimate_bytes(&settings, info.count))
            .and_then(|_| RecursiveBuilder::<P>::new(scene, &settings).build(&mut self.prims, info, &alloc));
        let mut arena = alloc.finish();
        let root = root?;

        let shared = arena.uses_shared();
        if shared {
            arena.share(std::mem::take(&mut self.prims));
        }
        bvh.publish(root, info.geom_bounds, info.count, &settings, arena);

        if scene.is_static() {
            if !shared {
                self.prims = Vec::new();
            }
            bvh.arena_mut().shrink();
        }

        info!(
            "{}: built in {:.2} ms{}: {}",
            P::NAME,
            start.elapsed().as_secs_f64() * 1000.0,
            if shared { " (in place)" } else { "" },
            bvh.statistics()
        );
        Ok(())
    }
}
