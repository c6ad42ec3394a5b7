pub mod heuristic;
pub mod recursive;
pub mod sah_builder;

pub use heuristic::{BinMapping, CostEvaluator, ObjectSplit, Split, SplitKind};
pub use recursive::{BuildRecord, RecursiveBuilder};
pub use sah_builder::SahBuilder;
