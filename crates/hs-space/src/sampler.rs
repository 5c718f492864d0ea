//! Random and Latin hypercube sampling inside hyperspaces.

use hs_types::{
    validation_error, Bound, Dimension, DimensionKind, HsResult, HyperspaceBounds, Hyperspace,
    ParamValue, Point, Prior, SpaceError,
};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

/// Draw one value from `dimension` according to its prior.
pub fn sample_value<R: Rng + ?Sized>(dimension: &Dimension, rng: &mut R) -> ParamValue {
    match &dimension.kind {
        DimensionKind::Integer { low, high } => ParamValue::Int(rng.random_range(*low..=*high)),
        DimensionKind::Real {
            low,
            high,
            prior: Prior::Uniform,
        } => ParamValue::Real(rng.random_range(*low..=*high)),
        DimensionKind::Real {
            low,
            high,
            prior: Prior::LogUniform,
        } => {
            let exponent = rng.random_range(low.ln()..=high.ln());
            ParamValue::Real(exponent.exp().clamp(*low, *high))
        }
        DimensionKind::Categorical { values, prior } => {
            let index = match prior {
                Some(weights) => weighted_index(weights, rng),
                None => rng.random_range(0..values.len()),
            };
            ParamValue::Category(values[index].clone())
        }
    }
}

fn weighted_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return rng.random_range(0..weights.len());
    }
    let mut target = rng.random::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if target < *w {
            return i;
        }
        target -= w;
    }
    weights.len() - 1
}

/// Draw one point uniformly (per prior) from `space`.
pub fn sample_point<R: Rng + ?Sized>(space: &Hyperspace, rng: &mut R) -> Point {
    space
        .dimensions
        .iter()
        .map(|d| sample_value(d, rng))
        .collect()
}

/// Draw a point from raw bounds, ignoring priors.
pub fn sample_in_bounds<R: Rng + ?Sized>(bounds: &[Bound], rng: &mut R) -> Point {
    bounds
        .iter()
        .map(|b| match b {
            Bound::Integer { low, high } => ParamValue::Int(rng.random_range(*low..=*high)),
            Bound::Real { low, high } => ParamValue::Real(rng.random_range(*low..=*high)),
            Bound::Categorical { values } => {
                ParamValue::Category(values[rng.random_range(0..values.len())].clone())
            }
        })
        .collect()
}

/// Latin hypercube design over the bounds of one hyperspace.
///
/// Every real dimension is cut into `n_samples` equal strata with one draw
/// per stratum. Integer dimensions draw `n_samples` distinct values, so the
/// range must hold at least that many. Categorical dimensions stratify over
/// category positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatinHypercube {
    n_samples: usize,
}

impl LatinHypercube {
    pub fn new(n_samples: usize) -> HsResult<Self> {
        if n_samples == 0 {
            return Err(validation_error!("Latin hypercube needs at least one sample"));
        }
        Ok(Self { n_samples })
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Produce `n_samples` points, one coordinate column per dimension.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        bounds: &HyperspaceBounds,
        rng: &mut R,
    ) -> HsResult<Vec<Point>> {
        let n = self.n_samples;
        let mut columns: Vec<Vec<ParamValue>> = Vec::with_capacity(bounds.bounds.len());

        for (i, bound) in bounds.bounds.iter().enumerate() {
            let column = match bound {
                Bound::Integer { low, high } => {
                    let available = *high as i128 - *low as i128 + 1;
                    if n as i128 > available {
                        return Err(SpaceError::InsufficientValues {
                            name: format!("dimension {i}"),
                            requested: n,
                            available: available.max(0) as usize,
                        }
                        .into());
                    }
                    let length = usize::try_from(available).unwrap_or(usize::MAX);
                    // offsets stay below `available`, so every value fits in [low, high]
                    rand::seq::index::sample(rng, length, n)
                        .into_iter()
                        .map(|offset| ParamValue::Int((*low as i128 + offset as i128) as i64))
                        .collect()
                }
                Bound::Real { low, high } => {
                    let width = (high - low) / n as f64;
                    let mut column: Vec<ParamValue> = (0..n)
                        .map(|j| {
                            let u: f64 = rng.random();
                            ParamValue::Real((low + (j as f64 + u) * width).min(*high))
                        })
                        .collect();
                    column.shuffle(rng);
                    column
                }
                Bound::Categorical { values } => {
                    let len = values.len();
                    let mut column: Vec<ParamValue> = (0..n)
                        .map(|j| {
                            let u: f64 = rng.random();
                            let index = (((j as f64 + u) / n as f64) * len as f64) as usize;
                            ParamValue::Category(values[index.min(len - 1)].clone())
                        })
                        .collect();
                    column.shuffle(rng);
                    column
                }
            };
            columns.push(column);
        }

        debug!(
            hyperspace = bounds.index,
            n_samples = n,
            dimensions = columns.len(),
            "generated Latin hypercube design"
        );

        Ok((0..n)
            .map(|j| columns.iter().map(|c| c[j].clone()).collect())
            .collect())
    }
}
