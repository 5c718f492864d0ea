//! Overlapping bisection of search spaces into hyperspaces.

use hs_types::{
    validation_error, Dimension, DimensionKind, HsResult, Hyperspace, HyperspaceBounds, SpaceError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default fraction of each dimension shared by its two halves.
pub const DEFAULT_OVERLAP: f64 = 0.25;

/// A dimension together with its two overlapping halves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitDimension {
    pub dimension: Dimension,
    pub overlap: f64,
    pub low_half: Dimension,
    pub high_half: Dimension,
}

impl SplitDimension {
    /// Split `dimension` into a low and a high half sharing `overlap` of the
    /// half-span.
    ///
    /// `overlap = 0` gives disjoint halves, `overlap = 1` gives two copies of
    /// the original domain.
    pub fn new(dimension: &Dimension, overlap: f64) -> HsResult<Self> {
        check_overlap(overlap)?;

        let (low_kind, high_kind) = match &dimension.kind {
            DimensionKind::Integer { low, high } => {
                let (l, h) = split_integer(dimension, *low, *high, overlap)?;
                (
                    DimensionKind::Integer { low: l.0, high: l.1 },
                    DimensionKind::Integer { low: h.0, high: h.1 },
                )
            }
            DimensionKind::Real { low, high, prior } => {
                let (l, h) = split_real(dimension, *low, *high, overlap)?;
                (
                    DimensionKind::Real {
                        low: l.0,
                        high: l.1,
                        prior: *prior,
                    },
                    DimensionKind::Real {
                        low: h.0,
                        high: h.1,
                        prior: *prior,
                    },
                )
            }
            DimensionKind::Categorical { values, prior } => {
                split_categorical(dimension, values, prior.as_deref(), overlap)?
            }
        };

        Ok(Self {
            dimension: dimension.clone(),
            overlap,
            low_half: Dimension {
                name: dimension.name.clone(),
                kind: low_kind,
            },
            high_half: Dimension {
                name: dimension.name.clone(),
                kind: high_kind,
            },
        })
    }
}

fn check_overlap(overlap: f64) -> HsResult<()> {
    if !(0.0..=1.0).contains(&overlap) {
        return Err(validation_error!(
            "overlap must be between 0 and 1, got {}",
            overlap
        ));
    }
    Ok(())
}

fn degenerate(dimension: &Dimension, reason: &str) -> hs_types::HsError {
    SpaceError::DegenerateDimension {
        name: dimension.name.clone(),
        bounds: dimension.bounds_repr(),
        reason: reason.to_string(),
    }
    .into()
}

type Range<T> = (T, T);

fn split_integer(
    dimension: &Dimension,
    low: i64,
    high: i64,
    overlap: f64,
) -> HsResult<(Range<i64>, Range<i64>)> {
    if low >= high {
        return Err(degenerate(dimension, "zero-width integer range"));
    }

    let subinterval = (high as f64 - low as f64) / 2.0;
    let overlap_length = subinterval * overlap;
    if subinterval < 1.0 {
        warn!(
            dimension = %dimension.name,
            "each hyperspace contains a single value"
        );
    }

    // Floor/ceil keep both halves integral and inside [low, high].
    let low_high = ((low as f64 + subinterval + overlap_length).floor() as i64).clamp(low, high);
    let mut high_low = ((high as f64 - (subinterval + overlap_length)).ceil() as i64).clamp(low, high);

    if overlap == 0.0 && high_low <= low_high && low_high < high {
        high_low = low_high + 1;
    }

    Ok(((low, low_high), (high_low, high)))
}

fn split_real(
    dimension: &Dimension,
    low: f64,
    high: f64,
    overlap: f64,
) -> HsResult<(Range<f64>, Range<f64>)> {
    if !low.is_finite() || !high.is_finite() || low >= high {
        return Err(degenerate(dimension, "zero-width real range"));
    }
    if overlap >= 1.0 {
        return Ok(((low, high), (low, high)));
    }

    // halved first so the full f64 range does not overflow
    let subinterval = (high / 2.0 - low / 2.0).abs();
    let overlap_length = subinterval * overlap;
    if subinterval < 1.0 {
        debug!(
            dimension = %dimension.name,
            subinterval,
            "real dimension half-span below one unit"
        );
    }

    let low_high = (low + subinterval + overlap_length).min(high);
    let high_low = (high - (subinterval + overlap_length)).max(low);
    Ok(((low, low_high), (high_low, high)))
}

fn split_categorical(
    dimension: &Dimension,
    values: &[serde_json::Value],
    prior: Option<&[f64]>,
    overlap: f64,
) -> HsResult<(DimensionKind, DimensionKind)> {
    let len = values.len();
    if len < 2 {
        return Err(degenerate(dimension, "fewer than 2 categories"));
    }

    let take = if overlap >= 1.0 {
        len
    } else {
        let subinterval = len / 2;
        let overlap_length = (subinterval as f64 * overlap).ceil() as usize;
        (subinterval + overlap_length).min(len)
    };

    let low = DimensionKind::Categorical {
        values: values[..take].to_vec(),
        prior: prior.map(|p| normalize(&p[..take])),
    };
    let high = DimensionKind::Categorical {
        values: values[len - take..].to_vec(),
        prior: prior.map(|p| normalize(&p[len - take..])),
    };
    Ok((low, high))
}

fn normalize(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    }
}

/// Number of hyperspaces produced by `n_dims` dimensions.
pub fn hyperspace_count(n_dims: usize) -> HsResult<usize> {
    if n_dims == 0 {
        return Err(validation_error!("at least one dimension is required"));
    }
    u32::try_from(n_dims)
        .ok()
        .and_then(|n| 1usize.checked_shl(n))
        .ok_or_else(|| validation_error!("{} dimensions produce too many hyperspaces", n_dims))
}

/// Combine per-dimension halves into every low/high combination.
///
/// Entry `k` of the result takes `highs[i]` when bit `i` of `k` is set and
/// `lows[i]` otherwise.
pub fn fold<T: Clone>(lows: &[T], highs: &[T]) -> HsResult<Vec<Vec<T>>> {
    if lows.len() != highs.len() {
        return Err(validation_error!(
            "low and high halves must have the same length, got {} and {}",
            lows.len(),
            highs.len()
        ));
    }

    let count = hyperspace_count(lows.len())?;
    Ok((0..count)
        .map(|k| {
            lows.iter()
                .zip(highs)
                .enumerate()
                .map(|(i, (low, high))| {
                    if k & (1usize << i) != 0 {
                        high.clone()
                    } else {
                        low.clone()
                    }
                })
                .collect()
        })
        .collect())
}

/// Divides a search space into `2^N` overlapping hyperspaces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpacePartitioner {
    overlap: f64,
}

impl SpacePartitioner {
    pub fn new(overlap: f64) -> HsResult<Self> {
        check_overlap(overlap)?;
        Ok(Self { overlap })
    }

    pub fn overlap(&self) -> f64 {
        self.overlap
    }

    pub fn split_all(&self, dimensions: &[Dimension]) -> HsResult<Vec<SplitDimension>> {
        dimensions
            .iter()
            .map(|d| SplitDimension::new(d, self.overlap))
            .collect()
    }

    /// Every hyperspace, indexed by its low/high bit pattern.
    pub fn divide(&self, dimensions: &[Dimension]) -> HsResult<Vec<Hyperspace>> {
        let splits = self.split_all(dimensions)?;
        let lows: Vec<Dimension> = splits.iter().map(|s| s.low_half.clone()).collect();
        let highs: Vec<Dimension> = splits.iter().map(|s| s.high_half.clone()).collect();

        let spaces: Vec<Hyperspace> = fold(&lows, &highs)?
            .into_iter()
            .enumerate()
            .map(|(index, dims)| Hyperspace::new(index, dims))
            .collect();

        debug!(
            dimensions = dimensions.len(),
            hyperspaces = spaces.len(),
            overlap = self.overlap,
            "divided search space"
        );
        Ok(spaces)
    }

    /// Raw bounds of every hyperspace, in the same order as [`Self::divide`].
    pub fn bounds_only(&self, dimensions: &[Dimension]) -> HsResult<Vec<HyperspaceBounds>> {
        let splits = self.split_all(dimensions)?;
        let lows: Vec<_> = splits.iter().map(|s| s.low_half.bound()).collect();
        let highs: Vec<_> = splits.iter().map(|s| s.high_half.bound()).collect();

        Ok(fold(&lows, &highs)?
            .into_iter()
            .enumerate()
            .map(|(index, bounds)| HyperspaceBounds { index, bounds })
            .collect())
    }
}

impl Default for SpacePartitioner {
    fn default() -> Self {
        Self {
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// Shorthand for `SpacePartitioner::new(overlap)?.divide(dimensions)`.
pub fn divide(dimensions: &[Dimension], overlap: f64) -> HsResult<Vec<Hyperspace>> {
    SpacePartitioner::new(overlap)?.divide(dimensions)
}

/// Shorthand for `SpacePartitioner::new(overlap)?.bounds_only(dimensions)`.
pub fn bounds_only(dimensions: &[Dimension], overlap: f64) -> HsResult<Vec<HyperspaceBounds>> {
    SpacePartitioner::new(overlap)?.bounds_only(dimensions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_types::{Bound, HsError, Prior};
    use serde_json::json;

    fn int_bounds(dim: &Dimension) -> (i64, i64) {
        match dim.kind {
            DimensionKind::Integer { low, high } => (low, high),
            ref other => panic!("expected integer, got {other:?}"),
        }
    }

    fn real_bounds(dim: &Dimension) -> (f64, f64) {
        match dim.kind {
            DimensionKind::Real { low, high, .. } => (low, high),
            ref other => panic!("expected real, got {other:?}"),
        }
    }

    #[test]
    fn two_integer_dimensions_scenario() {
        let dims = vec![
            Dimension::integer("a", 0, 10).unwrap(),
            Dimension::integer("b", 0, 20).unwrap(),
        ];
        let spaces = divide(&dims, 0.25).unwrap();
        assert_eq!(spaces.len(), 4);

        let first: Vec<_> = spaces[0].dimensions.iter().map(int_bounds).collect();
        assert_eq!(first, vec![(0, 6), (0, 12)]);

        let last: Vec<_> = spaces[3].dimensions.iter().map(int_bounds).collect();
        assert_eq!(last, vec![(4, 10), (8, 20)]);

        // bit 0 set: high half of "a", low half of "b"
        let mixed: Vec<_> = spaces[1].dimensions.iter().map(int_bounds).collect();
        assert_eq!(mixed, vec![(4, 10), (0, 12)]);
    }

    #[test]
    fn count_and_bit_pattern_hold_for_many_dimensions() {
        for n in 1..=6 {
            let dims: Vec<Dimension> = (0..n)
                .map(|i| Dimension::integer(format!("d{i}"), 0, 100 + i as i64).unwrap())
                .collect();
            let partitioner = SpacePartitioner::default();
            let splits = partitioner.split_all(&dims).unwrap();
            let spaces = partitioner.divide(&dims).unwrap();

            assert_eq!(spaces.len(), 1 << n);
            for (k, space) in spaces.iter().enumerate() {
                assert_eq!(space.index, k);
                assert_eq!(space.len(), n);
                for (i, dim) in space.dimensions.iter().enumerate() {
                    let expected = if k & (1 << i) != 0 {
                        &splits[i].high_half
                    } else {
                        &splits[i].low_half
                    };
                    assert_eq!(dim, expected);
                }
            }
        }
    }

    #[test]
    fn zero_overlap_halves_are_disjoint() {
        for (low, high) in [(0, 10), (0, 1), (0, 2), (-7, 8), (3, 1000)] {
            let dim = Dimension::integer("n", low, high).unwrap();
            let split = SplitDimension::new(&dim, 0.0).unwrap();
            let (_, low_high) = int_bounds(&split.low_half);
            let (high_low, _) = int_bounds(&split.high_half);
            assert!(low_high < high_low, "({low}, {high}) halves overlap");
        }

        let dim = Dimension::real("x", -1.0, 3.0).unwrap();
        let split = SplitDimension::new(&dim, 0.0).unwrap();
        assert!(real_bounds(&split.low_half).1 <= real_bounds(&split.high_half).0);

        let cats = Dimension::categorical("c", vec![json!("a"), json!("b"), json!("c"), json!("d")])
            .unwrap();
        let split = SplitDimension::new(&cats, 0.0).unwrap();
        match (&split.low_half.kind, &split.high_half.kind) {
            (
                DimensionKind::Categorical { values: lows, .. },
                DimensionKind::Categorical { values: highs, .. },
            ) => assert!(lows.iter().all(|v| !highs.contains(v))),
            other => panic!("unexpected kinds: {other:?}"),
        }
    }

    #[test]
    fn full_overlap_copies_the_domain() {
        let dims = vec![
            Dimension::integer("n", 3, 17).unwrap(),
            Dimension::real("x", 0.1, 0.7).unwrap(),
            Dimension::log_uniform("lr", 1e-5, 1e-1).unwrap(),
            Dimension::categorical("c", vec![json!(1), json!(2), json!(3)]).unwrap(),
        ];
        for dim in &dims {
            let split = SplitDimension::new(dim, 1.0).unwrap();
            assert_eq!(&split.low_half, dim);
            assert_eq!(&split.high_half, dim);
        }
    }

    #[test]
    fn small_integer_spans_never_invert() {
        for span in 1..12 {
            for overlap in [0.0, 0.1, 0.25, 0.5, 0.9, 1.0] {
                let dim = Dimension::integer("n", 5, 5 + span).unwrap();
                let split = SplitDimension::new(&dim, overlap).unwrap();
                let (a, b) = int_bounds(&split.low_half);
                let (c, d) = int_bounds(&split.high_half);
                assert!(b >= a, "span {span} overlap {overlap}: low half inverted");
                assert!(d >= c, "span {span} overlap {overlap}: high half inverted");
                assert_eq!(a, 5);
                assert_eq!(d, 5 + span);
            }
        }
    }

    #[test]
    fn real_split_keeps_prior() {
        let dim = Dimension::log_uniform("lr", 1e-4, 1.0).unwrap();
        let split = SplitDimension::new(&dim, 0.25).unwrap();
        match split.high_half.kind {
            DimensionKind::Real { prior, high, .. } => {
                assert_eq!(prior, Prior::LogUniform);
                assert_eq!(high, 1.0);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn categorical_split_by_position() {
        let dim = Dimension::categorical_with_prior(
            "c",
            vec![json!("a"), json!("b"), json!("c"), json!("d")],
            Some(vec![0.1, 0.2, 0.3, 0.4]),
        )
        .unwrap();
        let split = SplitDimension::new(&dim, 0.25).unwrap();
        match (&split.low_half.kind, &split.high_half.kind) {
            (
                DimensionKind::Categorical {
                    values: lows,
                    prior: Some(low_prior),
                },
                DimensionKind::Categorical { values: highs, .. },
            ) => {
                assert_eq!(lows, &vec![json!("a"), json!("b"), json!("c")]);
                assert_eq!(highs, &vec![json!("b"), json!("c"), json!("d")]);
                let total: f64 = low_prior.iter().sum();
                assert!((total - 1.0).abs() < 1e-12);
            }
            other => panic!("unexpected kinds: {other:?}"),
        }
    }

    #[test]
    fn single_category_is_degenerate() {
        let dim = Dimension::categorical("c", vec![json!("only")]).unwrap();
        let err = divide(&[dim], 0.25).unwrap_err();
        match err {
            HsError::Space(SpaceError::DegenerateDimension { name, bounds, .. }) => {
                assert_eq!(name, "c");
                assert!(bounds.contains("only"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_width_literal_is_degenerate() {
        let dim = Dimension {
            name: "flat".to_string(),
            kind: DimensionKind::Integer { low: 4, high: 4 },
        };
        assert!(matches!(
            SplitDimension::new(&dim, 0.25),
            Err(HsError::Space(SpaceError::DegenerateDimension { .. }))
        ));
    }

    #[test]
    fn bounds_follow_the_same_fold() {
        let dims = vec![
            Dimension::integer("a", 0, 10).unwrap(),
            Dimension::real("b", 0.0, 1.0).unwrap(),
        ];
        let spaces = divide(&dims, 0.25).unwrap();
        let bounds = bounds_only(&dims, 0.25).unwrap();
        assert_eq!(spaces.len(), bounds.len());
        for (space, bound) in spaces.iter().zip(&bounds) {
            assert_eq!(&space.bounds(), bound);
        }
        assert_eq!(bounds[0].bounds[0], Bound::Integer { low: 0, high: 6 });
    }

    #[test]
    fn invalid_inputs() {
        assert!(SpacePartitioner::new(-0.1).is_err());
        assert!(SpacePartitioner::new(1.1).is_err());
        assert!(divide(&[], 0.25).is_err());
        assert!(fold(&[1, 2], &[3]).is_err());
    }

    #[test]
    fn full_width_integer_range_splits() {
        let wide = Dimension::from_spec("wide", &json!([i64::MIN, i64::MAX])).unwrap();
        let spaces = divide(std::slice::from_ref(&wide), 0.25).unwrap();
        assert_eq!(spaces.len(), 2);

        let (low_a, low_b) = int_bounds(&spaces[0].dimensions[0]);
        let (high_a, high_b) = int_bounds(&spaces[1].dimensions[0]);
        assert_eq!(low_a, i64::MIN);
        assert_eq!(high_b, i64::MAX);
        assert!(low_a < low_b && high_a < high_b);
        assert!(high_a < low_b);

        let disjoint = divide(&[wide], 0.0).unwrap();
        let (_, low_top) = int_bounds(&disjoint[0].dimensions[0]);
        let (high_bottom, _) = int_bounds(&disjoint[1].dimensions[0]);
        assert_eq!(high_bottom, low_top + 1);
    }

    #[test]
    fn full_width_real_range_splits() {
        let wide = Dimension::real("wide", -f64::MAX, f64::MAX).unwrap();
        let spaces = divide(&[wide], 0.0).unwrap();
        let (low_a, low_b) = real_bounds(&spaces[0].dimensions[0]);
        let (high_a, high_b) = real_bounds(&spaces[1].dimensions[0]);
        assert_eq!((low_a, high_b), (-f64::MAX, f64::MAX));
        assert!(low_b.is_finite() && high_a.is_finite());
        assert_eq!(low_b, high_a);
    }
}
