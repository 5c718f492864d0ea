//! # hs-optimizer
//!
//! Local optimization inside one hyperspace: the pluggable
//! [`OptimizerAdapter`] minimizers used for flat search, the adapter registry,
//! per-step callbacks, and the Hyperband scheduler used for budgeted search.

mod adapter;
mod callback;
mod hyperband;
mod objective;
mod registry;

pub use adapter::{
    LocalSearch, MinimizeOptions, OptimizerAdapter, RandomSearch, DEFAULT_RANDOM_STARTS,
};
pub use callback::{notify, DeadlineStopper, StepCallback, StepControl};
pub use hyperband::{plan, s_max, BracketPlan, HyperbandScheduler, Rung};
pub use objective::{BudgetedObjective, IgnoreBudget, Objective};
pub use registry::AdapterRegistry;
