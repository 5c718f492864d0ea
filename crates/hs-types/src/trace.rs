//! Optimization traces.

use serde::{Deserialize, Serialize};

use crate::dimension::Point;

/// A single objective evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub point: Point,
    pub value: f64,
    /// Fidelity the point was evaluated at (Hyperband runs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
}

impl Evaluation {
    pub fn new(point: Point, value: f64) -> Self {
        Self {
            point,
            value,
            budget: None,
        }
    }

    pub fn with_budget(point: Point, value: f64, budget: f64) -> Self {
        Self {
            point,
            value,
            budget: Some(budget),
        }
    }
}

/// The ordered evaluation record of one hyperspace.
///
/// The best point and value are always recomputed from the evaluations, so a
/// trace can be extended, truncated or merged without bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub evaluations: Vec<Evaluation>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a trace from parallel point/value lists.
    ///
    /// Extra entries on either side are ignored.
    pub fn from_pairs(points: Vec<Point>, values: Vec<f64>) -> Self {
        Self {
            evaluations: points
                .into_iter()
                .zip(values)
                .map(|(point, value)| Evaluation::new(point, value))
                .collect(),
        }
    }

    pub fn push(&mut self, evaluation: Evaluation) {
        self.evaluations.push(evaluation);
    }

    pub fn record(&mut self, point: Point, value: f64) {
        self.push(Evaluation::new(point, value));
    }

    pub fn extend(&mut self, other: Trace) {
        self.evaluations.extend(other.evaluations);
    }

    pub fn len(&self) -> usize {
        self.evaluations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluations.is_empty()
    }

    /// Argmin over observed values. The first evaluation wins ties; NaN values
    /// never win.
    pub fn best(&self) -> Option<&Evaluation> {
        let mut best: Option<&Evaluation> = None;
        for evaluation in &self.evaluations {
            if evaluation.value.is_nan() {
                continue;
            }
            match best {
                Some(current) if evaluation.value >= current.value => {}
                _ => best = Some(evaluation),
            }
        }
        best
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best().map(|e| e.value)
    }

    pub fn best_point(&self) -> Option<&Point> {
        self.best().map(|e| &e.point)
    }

    /// Evaluated points in order (`x_iters`).
    pub fn points(&self) -> Vec<Point> {
        self.evaluations.iter().map(|e| e.point.clone()).collect()
    }

    /// Observed values in order (`func_vals`).
    pub fn values(&self) -> Vec<f64> {
        self.evaluations.iter().map(|e| e.value).collect()
    }

    /// Running minimum of the observed values.
    pub fn convergence(&self) -> Vec<f64> {
        let mut current = f64::INFINITY;
        self.evaluations
            .iter()
            .map(|e| {
                if e.value < current {
                    current = e.value;
                }
                current
            })
            .collect()
    }
}
