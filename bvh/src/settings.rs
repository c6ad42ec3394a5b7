use log::warn;
use serde::{Deserialize, Serialize};

use crate::BuildError;

/// Widest node the builder emits.
pub const MAX_BRANCHING: usize = 16;

/// Bin counts above this are clamped.
pub const MAX_BINS: usize = 256;

/// Auto thresholds are `count / AUTO_RANGE_MIN` and stay disabled while that
/// is below `AUTO_RANGE_MIN` items.
const AUTO_RANGE_MIN: usize = 1000;

/// Size limit below which finished subranges of the reference array are handed
/// to the allocator for reuse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeThreshold {
    /// One thousandth of the reference count, disabled below a million
    /// references.
    Auto,
    Disabled,
    Items(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSettings {
    pub branching_factor: usize,
    pub max_depth: usize,
    pub bins: usize,
    /// Leaf block width; `None` takes the primitive's natural width.
    pub block_size: Option<usize>,
    pub max_leaf_blocks: usize,
    pub trav_cost_aligned: f32,
    pub trav_cost_oriented: f32,
    pub int_cost: f32,
    /// Oriented heuristics are only tried when the aligned cost exceeds this
    /// fraction of the leaf cost.
    pub oriented_threshold: f32,
    pub parallel_threshold: usize,
    pub finished_range_threshold: RangeThreshold,
    pub memory_limit: Option<usize>,
    pub block_bytes: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            branching_factor: 4,
            max_depth: 40,
            bins: 32,
            block_size: None,
            max_leaf_blocks: 2,
            trav_cost_aligned: 1.0,
            trav_cost_oriented: 2.0,
            int_cost: 1.0,
            oriented_threshold: 0.7,
            parallel_threshold: 1024,
            finished_range_threshold: RangeThreshold::Auto,
            memory_limit: None,
            block_bytes: 256 * 1024,
        }
    }
}

impl BuildSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branching_factor(mut self, branching_factor: usize) -> Self {
        self.branching_factor = branching_factor;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn with_max_leaf_blocks(mut self, max_leaf_blocks: usize) -> Self {
        self.max_leaf_blocks = max_leaf_blocks;
        self
    }

    pub fn with_costs(mut self, trav_aligned: f32, trav_oriented: f32, int_cost: f32) -> Self {
        self.trav_cost_aligned = trav_aligned;
        self.trav_cost_oriented = trav_oriented;
        self.int_cost = int_cost;
        self
    }

    pub fn with_oriented_threshold(mut self, threshold: f32) -> Self {
        self.oriented_threshold = threshold;
        self
    }

    pub fn with_parallel_threshold(mut self, items: usize) -> Self {
        self.parallel_threshold = items;
        self
    }

    pub fn with_finished_range_threshold(mut self, threshold: RangeThreshold) -> Self {
        self.finished_range_threshold = threshold;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_block_bytes(mut self, bytes: usize) -> Self {
        self.block_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        let fail = |msg: String| Err(BuildError::InvalidSettings(msg));

        if self.branching_factor < 2 || self.branching_factor > MAX_BRANCHING {
            return fail(format!(
                "branching factor {} outside 2..={}",
                self.branching_factor, MAX_BRANCHING
            ));
        }
        if self.max_depth == 0 {
            return fail("max depth must be at least 1".to_string());
        }
        if self.bins < 2 {
            return fail(format!("need at least 2 bins, got {}", self.bins));
        }
        if self.max_leaf_blocks == 0 {
            return fail("max leaf blocks must be at least 1".to_string());
        }
        if let Some(block) = self.block_size {
            if block == 0 || !block.is_power_of_two() {
                return fail(format!("block size {} is not a power of two", block));
            }
        }
        let costs = [
            self.trav_cost_aligned,
            self.trav_cost_oriented,
            self.int_cost,
            self.oriented_threshold,
        ];
        if costs.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return fail(format!("cost constants must be finite and non-negative: {:?}", costs));
        }
        if self.block_bytes < 64 {
            return fail(format!("allocator block of {} bytes is too small", self.block_bytes));
        }
        Ok(())
    }

    /// Resolves the settings for one build over `prim_count` references of a
    /// primitive whose natural block width is `natural_block`.
    pub fn derive(&self, natural_block: usize, prim_count: usize) -> Result<DerivedSettings, BuildError> {
        self.validate()?;

        let block_size = self.block_size.unwrap_or(natural_block);
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(BuildError::InvalidSettings(format!(
                "block size {} is not a power of two",
                block_size
            )));
        }

        let mut bins = self.bins;
        if bins > MAX_BINS {
            warn!("clamping {} bins to {}", bins, MAX_BINS);
            bins = MAX_BINS;
        }

        let finished_range_threshold = match self.finished_range_threshold {
            RangeThreshold::Disabled => usize::MAX,
            RangeThreshold::Items(0) => usize::MAX,
            RangeThreshold::Items(k) => k,
            RangeThreshold::Auto => match prim_count / AUTO_RANGE_MIN {
                k if k < AUTO_RANGE_MIN => usize::MAX,
                k => k,
            },
        };

        let min_leaf_size = block_size;
        Ok(DerivedSettings {
            branching_factor: self.branching_factor,
            max_depth: self.max_depth,
            bins,
            block_size,
            log_block_size: block_size.trailing_zeros(),
            min_leaf_size,
            max_leaf_size: block_size * self.max_leaf_blocks,
            trav_cost_aligned: self.trav_cost_aligned,
            trav_cost_oriented: self.trav_cost_oriented,
            int_cost: self.int_cost,
            oriented_threshold: self.oriented_threshold,
            parallel_threshold: self.parallel_threshold.max(1),
            finished_range_threshold,
        })
    }
}

/// Settings of one build after defaults and thresholds are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedSettings {
    pub branching_factor: usize,
    pub max_depth: usize,
    pub bins: usize,
    pub block_size: usize,
    pub log_block_size: u32,
    pub min_leaf_size: usize,
    pub max_leaf_size: usize,
    pub trav_cost_aligned: f32,
    pub trav_cost_oriented: f32,
    pub int_cost: f32,
    pub oriented_threshold: f32,
    pub parallel_threshold: usize,
    /// `usize::MAX` when finished ranges are never reported.
    pub finished_range_threshold: usize,
}

impl DerivedSettings {
    /// Number of leaf blocks `count` items occupy.
    #[inline(always)]
    pub fn blocks(&self, count: usize) -> usize {
        (count + self.block_size - 1) >> self.log_block_size
    }

    pub fn leaf_cost(&self, count: usize) -> f32 {
        self.int_cost * self.blocks(count) as f32
    }

    pub fn reuses_finished_ranges(&self) -> bool {
        self.finished_range_threshold != usize::MAX
    }
}
