//! # hs-space
//!
//! Search space handling for hyperspace search: overlapping bisection of
//! every dimension, the `2^N` fold into hyperspaces, and point sampling
//! (uniform and Latin hypercube) inside a hyperspace.

mod partition;
mod sampler;

pub use partition::{
    bounds_only, divide, fold, hyperspace_count, SpacePartitioner, SplitDimension,
    DEFAULT_OVERLAP,
};
pub use sampler::{sample_in_bounds, sample_point, sample_value, LatinHypercube};
