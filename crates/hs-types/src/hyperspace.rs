//! Hyperspaces and the work items built from them.

use serde::{Deserialize, Serialize};

use crate::dimension::{Bound, Dimension, Point};
use crate::errors::{HsResult, SpaceError};
use crate::trace::Trace;

/// One sub-region of the full search space.
///
/// `index` encodes which half of every dimension the hyperspace uses: bit `i`
/// set means the high half of dimension `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperspace {
    pub index: usize,
    pub dimensions: Vec<Dimension>,
}

impl Hyperspace {
    pub fn new(index: usize, dimensions: Vec<Dimension>) -> Self {
        Self { index, dimensions }
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Whether dimension `dim` uses its high half in this hyperspace.
    pub fn uses_high_half(&self, dim: usize) -> bool {
        self.index & (1usize << dim) != 0
    }

    /// Check that `point` has one value per dimension.
    ///
    /// Ranges are not checked, so warm-start points recorded under other
    /// bounds still replay. Use [`Hyperspace::contains`] for that.
    pub fn validate_point(&self, point: &Point) -> HsResult<()> {
        if point.len() != self.dimensions.len() {
            return Err(SpaceError::PointMismatch {
                expected: self.dimensions.len(),
                actual: point.len(),
            }
            .into());
        }
        Ok(())
    }

    pub fn contains(&self, point: &Point) -> bool {
        point.len() == self.dimensions.len()
            && self
                .dimensions
                .iter()
                .zip(point)
                .all(|(dim, value)| dim.contains(value))
    }

    pub fn bounds(&self) -> HyperspaceBounds {
        HyperspaceBounds {
            index: self.index,
            bounds: self.dimensions.iter().map(Dimension::bound).collect(),
        }
    }
}

impl std::fmt::Display for Hyperspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dims: Vec<String> = self.dimensions.iter().map(|d| d.bounds_repr()).collect();
        write!(f, "hyperspace {} [{}]", self.index, dims.join(", "))
    }
}

/// Raw bounds of one hyperspace, used for warm-start sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperspaceBounds {
    pub index: usize,
    pub bounds: Vec<Bound>,
}

/// A unit of work handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub worker_id: usize,
    pub hyperspace: Hyperspace,
    pub bounds: Option<HyperspaceBounds>,
    pub checkpoint: Option<Trace>,
}

impl WorkAssignment {
    pub fn hyperspace_index(&self) -> usize {
        self.hyperspace.index
    }
}
