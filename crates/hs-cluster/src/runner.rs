//! Runs the configured search on one hyperspace and writes its result.

use hs_optimizer::{
    AdapterRegistry, BudgetedObjective, DeadlineStopper, HyperbandScheduler, MinimizeOptions,
    Objective, StepCallback,
};
use hs_space::LatinHypercube;
use hs_store::{CheckpointSaver, CheckpointStore, ResultStore};
use hs_types::{
    HsResult, Point, RunConfig, SamplerKind, SearchKind, Trace, WorkAssignment,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

/// Evaluates a budgeted objective at a fixed budget.
struct AtBudget<'a> {
    objective: &'a dyn BudgetedObjective,
    budget: f64,
}

impl Objective for AtBudget<'_> {
    fn evaluate(&self, point: &Point) -> f64 {
        self.objective.evaluate(point, self.budget)
    }
}

/// Everything a worker needs to process assignments.
///
/// Flat search evaluates the objective at `max_iter`; Hyperband varies the
/// budget per rung.
pub struct SearchRunner<'a> {
    config: RunConfig,
    registry: AdapterRegistry,
    objective: &'a dyn BudgetedObjective,
    results: ResultStore,
    checkpoints: Option<CheckpointStore>,
}

impl<'a> SearchRunner<'a> {
    pub fn new(config: RunConfig, objective: &'a dyn BudgetedObjective) -> HsResult<Self> {
        config.validate()?;
        let results = ResultStore::new(&config.results_path)?;
        let checkpoints = config
            .checkpoints_path
            .as_ref()
            .map(CheckpointStore::new)
            .transpose()?;
        Ok(Self {
            config,
            registry: AdapterRegistry::with_defaults(),
            objective,
            results,
            checkpoints,
        })
    }

    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn checkpoints(&self) -> Option<&CheckpointStore> {
        self.checkpoints.as_ref()
    }

    /// Resolve the configured adapter up front, so an unknown model fails
    /// before any hyperspace is dispatched.
    pub fn preflight(&self) -> HsResult<()> {
        if self.config.search == SearchKind::Flat {
            self.registry.get(self.config.model)?;
        }
        Ok(())
    }

    /// Search the assigned hyperspace, write `hyperspace<index>` and return
    /// the trace.
    ///
    /// `callbacks` run after every step, alongside the deadline and
    /// checkpoint callbacks the configuration asks for.
    pub fn run(
        &self,
        assignment: &WorkAssignment,
        mut callbacks: Vec<Box<dyn StepCallback>>,
    ) -> HsResult<Trace> {
        let index = assignment.hyperspace_index();
        let space = &assignment.hyperspace;
        let seed = self.config.random_state.wrapping_add(index as u64);

        let checkpoint = match &assignment.checkpoint {
            Some(trace) => Some(trace.clone()),
            None => match &self.checkpoints {
                Some(store) => store.load(index)?,
                None => None,
            },
        };

        let x0: Vec<Point> = match (&checkpoint, self.config.sampler) {
            (Some(trace), _) => trace.points(),
            (None, SamplerKind::Lhs) => {
                let n_samples = self.config.n_samples.unwrap_or_default();
                let bounds = assignment.bounds.clone().unwrap_or_else(|| space.bounds());
                let mut rng = StdRng::seed_from_u64(seed);
                LatinHypercube::new(n_samples)?.sample(&bounds, &mut rng)?
            }
            (None, SamplerKind::None) => Vec::new(),
        };

        if let Some(deadline) = self.config.deadline() {
            callbacks.push(Box::new(DeadlineStopper::new(deadline)));
        }
        if let Some(store) = &self.checkpoints {
            callbacks.push(Box::new(CheckpointSaver::new(store.clone(), index)));
        }

        info!(
            worker = assignment.worker_id,
            hyperspace = index,
            search = ?self.config.search,
            model = %self.config.model,
            warm_start = x0.len(),
            resumed = checkpoint.is_some(),
            "searching hyperspace"
        );

        let trace = match self.config.search {
            SearchKind::Flat => {
                let adapter = self.registry.get(self.config.model)?;
                let mut options = MinimizeOptions::new(self.config.n_iterations)
                    .with_random_state(seed)
                    .with_random_starts(self.config.n_random_starts.saturating_sub(x0.len()));
                options = match &checkpoint {
                    Some(trace) => options.with_checkpoint(trace),
                    None => options.with_x0(x0),
                };
                let objective = AtBudget {
                    objective: self.objective,
                    budget: self.config.max_iter as f64,
                };
                debug!(adapter = adapter.name(), n_calls = options.n_calls, "flat search");
                adapter.minimize(&objective, space, &options, &mut callbacks)?
            }
            SearchKind::Hyperband => {
                let scheduler = HyperbandScheduler::new(self.config.max_iter, self.config.eta)?
                    .with_policy(self.config.bracket_policy)
                    .with_random_state(seed)
                    .with_deadline(self.config.deadline());
                scheduler.run(self.objective, space, &x0, &mut callbacks)?
            }
        };

        self.results.save(index, &trace)?;
        Ok(trace)
    }
}
