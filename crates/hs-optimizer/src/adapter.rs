//! Black-box minimizers run inside a single hyperspace.

use hs_space::{sample_point, sample_value};
use hs_types::{
    validation_error, DimensionKind, HsResult, Hyperspace, ParamValue, Point, Prior, Trace,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::callback::{notify, StepCallback};
use crate::objective::Objective;

/// Random starts used when the caller gives none and no warm start exists.
pub const DEFAULT_RANDOM_STARTS: usize = 10;

/// Parameters of one minimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimizeOptions {
    /// Total number of evaluations, warm-start evaluations included.
    pub n_calls: usize,
    /// Random evaluations before a model-guided minimizer takes over.
    pub n_random_starts: Option<usize>,
    pub random_state: u64,
    /// Points to evaluate (or record, with `y0`) before anything else.
    pub x0: Vec<Point>,
    /// Known values for `x0`; when present `x0` is not re-evaluated.
    pub y0: Option<Vec<f64>>,
}

impl MinimizeOptions {
    pub fn new(n_calls: usize) -> Self {
        Self {
            n_calls,
            n_random_starts: None,
            random_state: 0,
            x0: Vec::new(),
            y0: None,
        }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn with_random_starts(mut self, n: usize) -> Self {
        self.n_random_starts = Some(n);
        self
    }

    pub fn with_x0(mut self, x0: Vec<Point>) -> Self {
        self.x0 = x0;
        self
    }

    /// Resume from a previous trace: its points and values become `(x0, y0)`.
    pub fn with_checkpoint(mut self, trace: &Trace) -> Self {
        self.x0 = trace.points();
        self.y0 = Some(trace.values());
        self
    }

    /// Random starts still owed once the warm start is accounted for.
    pub fn random_starts(&self) -> usize {
        self.n_random_starts
            .unwrap_or_else(|| DEFAULT_RANDOM_STARTS.saturating_sub(self.x0.len()))
    }

    fn validate(&self, space: &Hyperspace) -> HsResult<()> {
        for point in &self.x0 {
            space.validate_point(point)?;
        }
        if let Some(y0) = &self.y0 {
            if y0.len() != self.x0.len() {
                return Err(validation_error!(
                    "warm start has {} points but {} values",
                    self.x0.len(),
                    y0.len()
                ));
            }
        }
        Ok(())
    }
}

/// A minimizer that can be plugged into a worker.
pub trait OptimizerAdapter: Send + Sync {
    /// Minimize `objective` over `space`, returning every evaluation in order.
    fn minimize(
        &self,
        objective: &dyn Objective,
        space: &Hyperspace,
        options: &MinimizeOptions,
        callbacks: &mut [Box<dyn StepCallback>],
    ) -> HsResult<Trace>;

    fn name(&self) -> &str;
}

/// Shared ask/evaluate/tell loop.
///
/// Replays the warm start, then asks `propose` for new points until
/// `n_calls` evaluations exist or a callback stops the run.
fn drive<P>(
    objective: &dyn Objective,
    space: &Hyperspace,
    options: &MinimizeOptions,
    callbacks: &mut [Box<dyn StepCallback>],
    mut propose: P,
) -> HsResult<Trace>
where
    P: FnMut(&Trace, &mut StdRng) -> Point,
{
    options.validate(space)?;
    let mut rng = StdRng::seed_from_u64(options.random_state);
    let mut trace = Trace::new();

    match &options.y0 {
        Some(y0) => {
            trace.extend(Trace::from_pairs(options.x0.clone(), y0.clone()));
            if !trace.is_empty() && notify(callbacks, &trace)? {
                return Ok(trace);
            }
        }
        None => {
            for point in &options.x0 {
                let value = objective.evaluate(point);
                trace.record(point.clone(), value);
                if notify(callbacks, &trace)? {
                    return Ok(trace);
                }
            }
        }
    }
    debug!(
        hyperspace = space.index,
        warm_start = trace.len(),
        "warm start replayed"
    );

    while trace.len() < options.n_calls {
        let point = propose(&trace, &mut rng);
        let value = objective.evaluate(&point);
        trace.record(point, value);
        if notify(callbacks, &trace)? {
            break;
        }
    }

    info!(
        hyperspace = space.index,
        evaluations = trace.len(),
        best = ?trace.best_value(),
        "minimization finished"
    );
    Ok(trace)
}

// ---- Random search ----

/// Pure random sampling (`RAND`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSearch;

impl RandomSearch {
    pub fn new() -> Self {
        Self
    }
}

impl OptimizerAdapter for RandomSearch {
    fn minimize(
        &self,
        objective: &dyn Objective,
        space: &Hyperspace,
        options: &MinimizeOptions,
        callbacks: &mut [Box<dyn StepCallback>],
    ) -> HsResult<Trace> {
        drive(objective, space, options, callbacks, |_, rng| {
            sample_point(space, rng)
        })
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Local search ----

/// Model-free explore/exploit minimizer.
///
/// After the random starts, each step either samples a fresh random point
/// (with probability `exploration_weight`) or perturbs the best point seen so
/// far by a fraction of each dimension's range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalSearch {
    exploration_weight: f64,
    step_fraction: f64,
}

impl LocalSearch {
    pub fn new(exploration_weight: f64) -> HsResult<Self> {
        if !(0.0..=1.0).contains(&exploration_weight) {
            return Err(validation_error!(
                "exploration weight must be between 0 and 1, got {}",
                exploration_weight
            ));
        }
        Ok(Self {
            exploration_weight,
            step_fraction: 0.1,
        })
    }

    pub fn with_step_fraction(mut self, fraction: f64) -> Self {
        self.step_fraction = fraction.clamp(f64::EPSILON, 1.0);
        self
    }

    fn perturb(&self, space: &Hyperspace, base: &Point, rng: &mut StdRng) -> Point {
        space
            .dimensions
            .iter()
            .zip(base)
            .map(|(dim, value)| match (&dim.kind, value) {
                (DimensionKind::Integer { low, high }, ParamValue::Int(v)) => {
                    let span = *high as f64 - *low as f64;
                    let reach = ((span * self.step_fraction).round() as i64).max(1);
                    let step = rng.random_range(-reach..=reach);
                    ParamValue::Int(v.saturating_add(step).clamp(*low, *high))
                }
                (
                    DimensionKind::Real {
                        low,
                        high,
                        prior: Prior::Uniform,
                    },
                    ParamValue::Real(v),
                ) => {
                    let reach = (high - low) * self.step_fraction;
                    ParamValue::Real((v + rng.random_range(-reach..=reach)).clamp(*low, *high))
                }
                (
                    DimensionKind::Real {
                        low,
                        high,
                        prior: Prior::LogUniform,
                    },
                    ParamValue::Real(v),
                ) => {
                    let reach = (high.ln() - low.ln()) * self.step_fraction;
                    let log_v = v.ln() + rng.random_range(-reach..=reach);
                    ParamValue::Real(log_v.exp().clamp(*low, *high))
                }
                // categories have no neighbourhood
                _ => sample_value(dim, rng),
            })
            .collect()
    }
}

impl Default for LocalSearch {
    fn default() -> Self {
        Self {
            exploration_weight: 0.3,
            step_fraction: 0.1,
        }
    }
}

impl OptimizerAdapter for LocalSearch {
    fn minimize(
        &self,
        objective: &dyn Objective,
        space: &Hyperspace,
        options: &MinimizeOptions,
        callbacks: &mut [Box<dyn StepCallback>],
    ) -> HsResult<Trace> {
        let random_until = options.x0.len() + options.random_starts();
        drive(objective, space, options, callbacks, |trace, rng| {
            let explore =
                trace.len() < random_until || rng.random::<f64>() < self.exploration_weight;
            match trace.best_point() {
                Some(best) if !explore => self.perturb(space, best, rng),
                _ => sample_point(space, rng),
            }
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::StepControl;
    use hs_types::Dimension;
    use serde_json::json;

    fn space() -> Hyperspace {
        Hyperspace::new(
            0,
            vec![
                Dimension::integer("n", -5, 5).unwrap(),
                Dimension::real("x", -1.0, 1.0).unwrap(),
                Dimension::categorical("c", vec![json!("a"), json!("b")]).unwrap(),
            ],
        )
    }

    fn sphere(point: &Point) -> f64 {
        point.iter().filter_map(ParamValue::as_f64).map(|v| v * v).sum()
    }

    struct StopAt(usize);

    impl StepCallback for StopAt {
        fn on_step(&mut self, trace: &Trace) -> HsResult<StepControl> {
            Ok(if trace.len() >= self.0 {
                StepControl::Stop
            } else {
                StepControl::Continue
            })
        }

        fn name(&self) -> &str {
            "stop-at"
        }
    }

    #[test]
    fn random_starts_shrink_with_warm_start() {
        let options = MinimizeOptions::new(20);
        assert_eq!(options.random_starts(), 10);

        let x0 = vec![vec![ParamValue::Int(0)]; 4];
        assert_eq!(options.clone().with_x0(x0).random_starts(), 6);

        let x0 = vec![vec![ParamValue::Int(0)]; 12];
        assert_eq!(options.with_x0(x0).random_starts(), 0);
    }

    #[test]
    fn random_search_fills_n_calls_inside_space() {
        let space = space();
        let options = MinimizeOptions::new(25).with_random_state(4);
        let trace = RandomSearch::new()
            .minimize(&sphere, &space, &options, &mut [])
            .unwrap();
        assert_eq!(trace.len(), 25);
        assert!(trace.points().iter().all(|p| space.contains(p)));
    }

    #[test]
    fn same_seed_same_trace() {
        let space = space();
        let options = MinimizeOptions::new(8).with_random_state(99);
        let a = RandomSearch.minimize(&sphere, &space, &options, &mut []).unwrap();
        let b = RandomSearch.minimize(&sphere, &space, &options, &mut []).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn checkpoint_values_are_not_re_evaluated() {
        let space = space();
        let previous = Trace::from_pairs(
            vec![
                vec![
                    ParamValue::Int(1),
                    ParamValue::Real(0.0),
                    ParamValue::Category(json!("a")),
                ],
                vec![
                    ParamValue::Int(2),
                    ParamValue::Real(0.5),
                    ParamValue::Category(json!("b")),
                ],
            ],
            vec![-100.0, -200.0],
        );
        let options = MinimizeOptions::new(5).with_checkpoint(&previous);
        let trace = RandomSearch.minimize(&sphere, &space, &options, &mut []).unwrap();

        assert_eq!(trace.len(), 5);
        assert_eq!(&trace.evaluations[..2], &previous.evaluations[..]);
        assert_eq!(trace.best_value(), Some(-200.0));
    }

    #[test]
    fn x0_is_evaluated_first() {
        let space = space();
        let start = vec![
            ParamValue::Int(3),
            ParamValue::Real(0.0),
            ParamValue::Category(json!("b")),
        ];
        let options = MinimizeOptions::new(3).with_x0(vec![start.clone()]);
        let trace = RandomSearch.minimize(&sphere, &space, &options, &mut []).unwrap();
        assert_eq!(trace.evaluations[0].point, start);
        assert_eq!(trace.evaluations[0].value, 9.0);
    }

    #[test]
    fn callbacks_stop_early() {
        let space = space();
        let options = MinimizeOptions::new(50);
        let mut callbacks: Vec<Box<dyn StepCallback>> = vec![Box::new(StopAt(7))];
        let trace = RandomSearch
            .minimize(&sphere, &space, &options, &mut callbacks)
            .unwrap();
        assert_eq!(trace.len(), 7);
    }

    #[test]
    fn mismatched_warm_start_is_rejected() {
        let space = space();
        let mut options = MinimizeOptions::new(5).with_x0(vec![vec![ParamValue::Int(1)]]);
        assert!(RandomSearch.minimize(&sphere, &space, &options, &mut []).is_err());

        options.x0 = Vec::new();
        options.y0 = Some(vec![1.0]);
        assert!(RandomSearch.minimize(&sphere, &space, &options, &mut []).is_err());
    }

    #[test]
    fn local_search_stays_inside_and_improves_on_start() {
        let space = Hyperspace::new(
            0,
            vec![
                Dimension::real("x", -10.0, 10.0).unwrap(),
                Dimension::log_uniform("lr", 1e-4, 1.0).unwrap(),
            ],
        );
        let search = LocalSearch::new(0.0).unwrap();
        let options = MinimizeOptions::new(60).with_random_starts(5);
        let trace = search.minimize(&sphere, &space, &options, &mut []).unwrap();

        assert_eq!(trace.len(), 60);
        assert!(trace.points().iter().all(|p| space.contains(p)));
        let convergence = trace.convergence();
        assert!(convergence[59] <= convergence[4]);
    }

    #[test]
    fn local_search_rejects_bad_weight() {
        assert!(LocalSearch::new(1.5).is_err());
    }

    #[test]
    fn local_search_handles_full_width_integers() {
        let space = Hyperspace::new(
            0,
            vec![Dimension::integer("wide", i64::MIN, i64::MAX).unwrap()],
        );
        let search = LocalSearch::new(0.0).unwrap();
        let options = MinimizeOptions::new(30).with_random_starts(3);
        let trace = search.minimize(&sphere, &space, &options, &mut []).unwrap();
        assert_eq!(trace.len(), 30);
        assert!(trace.points().iter().all(|p| space.contains(p)));
    }
}
