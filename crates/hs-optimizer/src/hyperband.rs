//! Hyperband: successive halving over a sweep of brackets.
//!
//! Each bracket `s` starts `n` random configurations at a small budget `r`,
//! then repeatedly keeps the best `1/eta` of them and multiplies their budget
//! by `eta`. Aggressive brackets (large `s`) try many configurations cheaply;
//! the last bracket (`s = 0`) runs a handful at the full budget.

use std::time::{Duration, Instant};

use hs_space::sample_point;
use hs_types::{
    validation_error, BracketPolicy, Evaluation, HsResult, Hyperspace, Point, Trace,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::callback::{notify, StepCallback};
use crate::objective::BudgetedObjective;

/// One evaluation round inside a bracket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rung {
    pub index: u32,
    /// Configurations evaluated in this rung.
    pub n_configs: usize,
    /// Budget each configuration is evaluated at.
    pub budget: f64,
    /// Configurations carried into the next rung (1 at the final rung).
    pub survivors: usize,
}

/// The precomputed schedule of one bracket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketPlan {
    pub s: u32,
    /// Initial configuration count.
    pub n: usize,
    /// Initial per-configuration budget, `max_iter * eta^-s`.
    pub r: f64,
    pub rungs: Vec<Rung>,
}

fn check_params(max_iter: u64, eta: u64) -> HsResult<()> {
    if max_iter == 0 {
        return Err(validation_error!("max_iter must be at least 1"));
    }
    if eta < 2 {
        return Err(validation_error!("eta must be at least 2, got {}", eta));
    }
    Ok(())
}

/// Largest `s` with `eta^s <= max_iter`.
pub fn s_max(max_iter: u64, eta: u64) -> HsResult<u32> {
    check_params(max_iter, eta)?;
    let mut s = 0;
    let mut power = eta;
    while power <= max_iter {
        s += 1;
        power = match power.checked_mul(eta) {
            Some(p) => p,
            None => break,
        };
    }
    Ok(s)
}

fn pow(eta: u64, exp: u32) -> HsResult<u128> {
    (eta as u128)
        .checked_pow(exp)
        .ok_or_else(|| validation_error!("eta^{} overflows", exp))
}

/// The full bracket schedule, from `s_max` down to 0.
///
/// Configuration counts and rung budgets are rounded up, survivor counts
/// down. All arithmetic is done in integers so the plan is exact.
pub fn plan(max_iter: u64, eta: u64) -> HsResult<Vec<BracketPlan>> {
    let s_max = s_max(max_iter, eta)?;
    let mut brackets = Vec::with_capacity(s_max as usize + 1);

    for s in (0..=s_max).rev() {
        let eta_s = pow(eta, s)?;
        let n = ((s_max as u128 + 1) * eta_s).div_ceil(s as u128 + 1) as usize;
        let r = max_iter as f64 / eta_s as f64;

        let rungs = (0..=s)
            .map(|i| {
                let eta_i = pow(eta, i)?;
                let n_configs = (n as u128 / eta_i) as usize;
                let budget = (max_iter as u128 * eta_i).div_ceil(eta_s) as f64;
                let survivors = if i == s {
                    1
                } else {
                    n_configs / eta as usize
                };
                Ok(Rung {
                    index: i,
                    n_configs,
                    budget,
                    survivors,
                })
            })
            .collect::<HsResult<Vec<_>>>()?;

        brackets.push(BracketPlan { s, n, r, rungs });
    }

    Ok(brackets)
}

/// Runs Hyperband over one hyperspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperbandScheduler {
    max_iter: u64,
    eta: u64,
    policy: BracketPolicy,
    random_state: u64,
    deadline: Option<Duration>,
}

impl HyperbandScheduler {
    pub fn new(max_iter: u64, eta: u64) -> HsResult<Self> {
        check_params(max_iter, eta)?;
        Ok(Self {
            max_iter,
            eta,
            policy: BracketPolicy::LastBracket,
            random_state: 0,
            deadline: None,
        })
    }

    pub fn with_policy(mut self, policy: BracketPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Stop launching new brackets once `deadline` has elapsed.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn plan(&self) -> HsResult<Vec<BracketPlan>> {
        plan(self.max_iter, self.eta)
    }

    /// Run every bracket and return the evaluations selected by the bracket
    /// policy.
    ///
    /// `warm_start` configurations open rung 0 of every bracket; the rest of
    /// the rung is sampled from `space`. A rung is one step: its
    /// configurations are evaluated in parallel, then callbacks run once with
    /// every evaluation so far.
    pub fn run(
        &self,
        objective: &dyn BudgetedObjective,
        space: &Hyperspace,
        warm_start: &[Point],
        callbacks: &mut [Box<dyn StepCallback>],
    ) -> HsResult<Trace> {
        for point in warm_start {
            space.validate_point(point)?;
        }

        let plan = self.plan()?;
        let started = Instant::now();
        let mut rng = StdRng::seed_from_u64(self.random_state);
        let mut everything = Trace::new();
        let mut last_rung = Trace::new();

        info!(
            hyperspace = space.index,
            max_iter = self.max_iter,
            eta = self.eta,
            brackets = plan.len(),
            policy = ?self.policy,
            "starting hyperband"
        );

        'brackets: for bracket in &plan {
            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    warn!(
                        hyperspace = space.index,
                        bracket = bracket.s,
                        "deadline reached, skipping remaining brackets"
                    );
                    break;
                }
            }

            let mut pool: Vec<Point> = warm_start.iter().take(bracket.n).cloned().collect();
            while pool.len() < bracket.n {
                pool.push(sample_point(space, &mut rng));
            }

            for rung in &bracket.rungs {
                let values: Vec<f64> = pool
                    .par_iter()
                    .map(|point| objective.evaluate(point, rung.budget))
                    .collect();

                let evaluated = Trace {
                    evaluations: pool
                        .iter()
                        .zip(&values)
                        .map(|(point, value)| {
                            Evaluation::with_budget(point.clone(), *value, rung.budget)
                        })
                        .collect(),
                };

                debug!(
                    hyperspace = space.index,
                    bracket = bracket.s,
                    rung = rung.index,
                    configs = pool.len(),
                    budget = rung.budget,
                    best = ?evaluated.best_value(),
                    "rung evaluated"
                );

                everything.extend(evaluated.clone());
                last_rung = evaluated;

                pool = survivors(&pool, &values, rung.survivors);

                if notify(callbacks, &everything)? {
                    break 'brackets;
                }
            }
        }

        info!(
            hyperspace = space.index,
            evaluations = everything.len(),
            best = ?everything.best_value(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "hyperband finished"
        );

        Ok(match self.policy {
            BracketPolicy::LastBracket => last_rung,
            BracketPolicy::AllBrackets => everything,
        })
    }
}

/// Ranking key for a rung value. NaN, whatever its sign, ranks last.
fn rank_key(value: f64) -> f64 {
    if value.is_nan() {
        f64::INFINITY
    } else {
        value
    }
}

/// The `keep` lowest-valued configurations, earliest first on ties.
fn survivors(pool: &[Point], values: &[f64], keep: usize) -> Vec<Point> {
    let mut order: Vec<usize> = (0..pool.len()).collect();
    order.sort_by(|&a, &b| rank_key(values[a]).total_cmp(&rank_key(values[b])));
    order
        .into_iter()
        .take(keep)
        .map(|i| pool[i].clone())
        .collect()
}
