//! Objective function interfaces.

use hs_types::Point;

/// A black-box function to minimize.
pub trait Objective: Sync {
    fn evaluate(&self, point: &Point) -> f64;
}

impl<F> Objective for F
where
    F: Fn(&Point) -> f64 + Sync,
{
    fn evaluate(&self, point: &Point) -> f64 {
        self(point)
    }
}

/// A black-box function evaluated at a fidelity budget (e.g. training epochs).
pub trait BudgetedObjective: Sync {
    fn evaluate(&self, point: &Point, budget: f64) -> f64;
}

impl<F> BudgetedObjective for F
where
    F: Fn(&Point, f64) -> f64 + Sync,
{
    fn evaluate(&self, point: &Point, budget: f64) -> f64 {
        self(point, budget)
    }
}

/// Run a budget-free objective inside a budgeted search, ignoring the budget.
pub struct IgnoreBudget<'a>(pub &'a dyn Objective);

impl BudgetedObjective for IgnoreBudget<'_> {
    fn evaluate(&self, point: &Point, _budget: f64) -> f64 {
        self.0.evaluate(point)
    }
}
