//! Fleet drivers: partition the space, then run static or elastic dispatch
//! over in-process ranks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hs_space::SpacePartitioner;
use hs_store::{resolve_warm_start, CheckpointStore};
use hs_types::{
    config_error, internal_error, validation_error, Dimension, DispatchMode, HsResult, RunConfig,
    SamplerKind, Trace, WorkAssignment,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::ClusterContext;
use crate::coordinator::{Coordinator, CoordinatorConfig, WorkItem};
use crate::runner::SearchRunner;
use crate::transport::{local_cluster, Rank};
use crate::worker::Worker;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetOptions {
    /// Worker ranks, the coordinator excluded.
    pub workers: usize,
    pub poll_interval: Duration,
    /// Enables heartbeats and requeue-on-timeout in elastic mode.
    pub liveness_timeout: Option<Duration>,
}

impl FleetOptions {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            poll_interval: Duration::from_millis(1),
            liveness_timeout: None,
        }
    }

    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = Some(timeout);
        self
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetReport {
    /// Traces keyed by hyperspace index.
    pub results: BTreeMap<usize, Trace>,
    /// `(hyperspace, worker)` pairs in dispatch order.
    pub assignments: Vec<(usize, Rank)>,
    pub kills_sent: usize,
    pub lost_workers: Vec<Rank>,
}

impl FleetReport {
    /// Hyperspace with the lowest best value.
    pub fn best(&self) -> Option<(usize, f64)> {
        self.results
            .iter()
            .filter_map(|(index, trace)| trace.best_value().map(|v| (*index, v)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Validate the configuration and build one work item per hyperspace.
///
/// Items carry their raw bounds when Latin hypercube sampling is on, and the
/// previous trace of their hyperspace when resuming from checkpoints.
pub fn plan_work(config: &RunConfig, dimensions: &[Dimension]) -> HsResult<Vec<WorkItem>> {
    config.validate()?;
    let partitioner = SpacePartitioner::new(config.overlap)?;
    let hyperspaces = partitioner.divide(dimensions)?;
    let count = hyperspaces.len();

    let bounds = match config.sampler {
        SamplerKind::Lhs => partitioner.bounds_only(dimensions)?.into_iter().map(Some).collect(),
        SamplerKind::None => vec![None; count],
    };
    let checkpoints = match &config.checkpoints_path {
        Some(path) => resolve_warm_start(count, &CheckpointStore::new(path)?.load_all()?),
        None => vec![None; count],
    };

    info!(
        dimensions = dimensions.len(),
        hyperspaces = count,
        resumed = checkpoints.iter().filter(|c| c.is_some()).count(),
        "planned work"
    );

    Ok(hyperspaces
        .into_iter()
        .zip(bounds)
        .zip(checkpoints)
        .map(|((hyperspace, bounds), checkpoint)| WorkItem {
            hyperspace,
            bounds,
            checkpoint,
        })
        .collect())
}

/// Workers required by static mode: one per `hyperspaces_per_worker`
/// hyperspaces.
pub fn static_worker_count(config: &RunConfig, hyperspaces: usize) -> HsResult<usize> {
    let per_worker = config.hyperspaces_per_worker;
    if per_worker == 0 || hyperspaces % per_worker != 0 {
        return Err(config_error!(
            "{} hyperspaces cannot be split evenly into groups of {}",
            hyperspaces,
            per_worker
        ));
    }
    Ok(hyperspaces / per_worker)
}

/// Process `items` in order as static worker `rank`.
pub fn run_static_worker(
    runner: &SearchRunner<'_>,
    rank: Rank,
    items: &[WorkItem],
) -> HsResult<Vec<(usize, Trace)>> {
    items
        .iter()
        .map(|item| {
            let assignment = WorkAssignment {
                worker_id: rank,
                hyperspace: item.hyperspace.clone(),
                bounds: item.bounds.clone(),
                checkpoint: item.checkpoint.clone(),
            };
            Ok((item.index(), runner.run(&assignment, Vec::new())?))
        })
        .collect()
}

/// Static mode: worker `r` takes hyperspaces `r*k .. r*k+k`, no coordinator.
pub fn run_static(
    runner: &SearchRunner<'_>,
    dimensions: &[Dimension],
    options: &FleetOptions,
) -> HsResult<FleetReport> {
    runner.preflight()?;
    let items = plan_work(runner.config(), dimensions)?;
    let expected = static_worker_count(runner.config(), items.len())?;
    if options.workers != expected {
        return Err(config_error!(
            "static mode needs {} workers for {} hyperspaces, got {}",
            expected,
            items.len(),
            options.workers
        ));
    }

    let per_worker = runner.config().hyperspaces_per_worker;
    info!(workers = expected, per_worker, "starting static fleet");

    let outcomes: Vec<HsResult<Vec<(usize, Trace)>>> = thread::scope(|scope| {
        let handles: Vec<_> = items
            .chunks(per_worker)
            .enumerate()
            .map(|(rank, chunk)| scope.spawn(move || run_static_worker(runner, rank, chunk)))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(internal_error!("static worker thread panicked")))
            })
            .collect()
    });

    let mut report = FleetReport::default();
    for (rank, outcome) in outcomes.into_iter().enumerate() {
        for (index, trace) in outcome? {
            report.assignments.push((index, rank));
            report.results.insert(index, trace);
        }
    }
    Ok(report)
}

/// Elastic mode: rank 0 coordinates, ranks `1..=workers` pull hyperspaces.
pub fn run_elastic(
    runner: &SearchRunner<'_>,
    dimensions: &[Dimension],
    options: &FleetOptions,
) -> HsResult<FleetReport> {
    if options.workers == 0 {
        return Err(validation_error!("elastic mode needs at least one worker"));
    }
    runner.preflight()?;
    let items = plan_work(runner.config(), dimensions)?;

    let mut coordinator_config =
        CoordinatorConfig::default().with_poll_interval(options.poll_interval);
    if let Some(timeout) = options.liveness_timeout {
        coordinator_config = coordinator_config.with_liveness_timeout(timeout);
    }

    let mut transports = local_cluster(options.workers + 1)?.into_iter();
    let coordinator_end = transports
        .next()
        .ok_or_else(|| internal_error!("cluster has no rank 0"))?;
    let coordinator = Coordinator::new(
        ClusterContext::new(Arc::new(coordinator_end)),
        items,
        coordinator_config,
    )?;
    info!(workers = options.workers, "starting elastic fleet");

    let (dispatch, workers) = thread::scope(|scope| {
        let handles: Vec<_> = transports
            .map(|transport| {
                let ctx = ClusterContext::new(Arc::new(transport));
                let worker = Worker::new(ctx, runner)
                    .with_poll_interval(options.poll_interval)
                    .with_heartbeats(options.liveness_timeout.is_some());
                scope.spawn(move || worker.run())
            })
            .collect();

        let dispatch = coordinator.run();

        let workers: Vec<_> = handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(internal_error!("worker thread panicked")))
            })
            .collect();
        (dispatch, workers)
    });

    let mut failures = Vec::new();
    for (offset, outcome) in workers.into_iter().enumerate() {
        match outcome {
            Ok(worker) => {
                info!(rank = worker.rank, completed = worker.completed.len(), "worker report")
            }
            Err(e) => failures.push((offset + 1, e)),
        }
    }

    let dispatch = match dispatch {
        Ok(report) => report,
        // the worker's own failure, not the transport error it caused
        Err(e) => return Err(failures.into_iter().next().map_or(e, |(_, first)| first)),
    };
    for (rank, e) in failures {
        if !dispatch.lost_workers.contains(&rank) {
            return Err(e);
        }
        warn!(rank, error = %e, "lost worker failed, its hyperspace was rerun");
    }

    Ok(FleetReport {
        results: dispatch.completed,
        assignments: dispatch.assignments,
        kills_sent: dispatch.kills_sent,
        lost_workers: dispatch.lost_workers,
    })
}

/// Run in the dispatch mode the configuration names.
pub fn run_fleet(
    runner: &SearchRunner<'_>,
    dimensions: &[Dimension],
    options: &FleetOptions,
) -> HsResult<FleetReport> {
    match runner.config().dispatch {
        DispatchMode::Static => run_static(runner, dimensions, options),
        DispatchMode::Elastic => run_elastic(runner, dimensions, options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_optimizer::{
        AdapterRegistry, IgnoreBudget, MinimizeOptions, Objective, OptimizerAdapter,
        RandomSearch, StepCallback,
    };
    use hs_store::{hyperspace_filename, SortOrder};
    use hs_types::{ConfigError, HsError, Hyperspace, Model, ParamValue, Point};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn sphere(point: &Point) -> f64 {
        point.iter().filter_map(ParamValue::as_f64).map(|v| v * v).sum()
    }

    /// Random search whose first `failures` runs return an error.
    struct Flaky {
        failures: AtomicUsize,
    }

    impl Flaky {
        fn registry(failures: usize) -> AdapterRegistry {
            let mut registry = AdapterRegistry::with_defaults();
            registry.register(
                Model::Rand,
                Arc::new(Flaky {
                    failures: AtomicUsize::new(failures),
                }),
            );
            registry
        }
    }

    impl OptimizerAdapter for Flaky {
        fn minimize(
            &self,
            objective: &dyn Objective,
            space: &Hyperspace,
            options: &MinimizeOptions,
            callbacks: &mut [Box<dyn StepCallback>],
        ) -> HsResult<Trace> {
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(internal_error!("optimizer crashed on hyperspace {}", space.index));
            }
            RandomSearch.minimize(objective, space, options, callbacks)
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn dimensions() -> Vec<Dimension> {
        vec![
            Dimension::integer("a", 0, 10).unwrap(),
            Dimension::integer("b", 0, 20).unwrap(),
        ]
    }

    #[test]
    fn plan_matches_partition() {
        let config = RunConfig::new("plan", "unused").with_lhs(3);
        let items = plan_work(&config, &dimensions()).unwrap();
        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|i| i.bounds.is_some() && i.checkpoint.is_none()));
        assert_eq!(items[3].hyperspace.dimensions[1].bounds_repr(), "(8, 20)");
    }

    #[test]
    fn static_mode_requires_matching_fleet() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new("static", dir.path()).with_iterations(3);
        let objective = IgnoreBudget(&sphere);
        let runner = SearchRunner::new(config, &objective).unwrap();

        let err = run_static(&runner, &dimensions(), &FleetOptions::new(3)).unwrap_err();
        assert!(matches!(
            err,
            HsError::Config(ConfigError::ConfigConflict { .. })
        ));
        // nothing ran
        assert!(!dir.path().join("hyperspace00").exists());
    }

    #[test]
    fn static_mode_one_hyperspace_per_worker() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new("static", dir.path()).with_iterations(5);
        let objective = IgnoreBudget(&sphere);
        let runner = SearchRunner::new(config, &objective).unwrap();

        let report = run_static(&runner, &dimensions(), &FleetOptions::new(4)).unwrap();
        assert_eq!(report.results.len(), 4);
        let mut pairs = report.assignments.clone();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
        for index in 0..4 {
            assert!(dir.path().join(hyperspace_filename(index)).exists());
        }
    }

    #[test]
    fn static_mode_groups_hyperspaces() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new("dual", dir.path())
            .with_iterations(4)
            .with_hyperspaces_per_worker(2);
        let objective = IgnoreBudget(&sphere);
        let runner = SearchRunner::new(config, &objective).unwrap();

        let report = run_static(&runner, &dimensions(), &FleetOptions::new(2)).unwrap();
        let mut pairs = report.assignments.clone();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(0, 0), (1, 0), (2, 1), (3, 1)]);
    }

    #[test]
    fn elastic_fleet_processes_every_hyperspace_once() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new("elastic", dir.path())
            .with_dispatch(DispatchMode::Elastic)
            .with_iterations(6);
        let objective = IgnoreBudget(&sphere);
        let runner = SearchRunner::new(config, &objective).unwrap();
        let dims = vec![
            Dimension::integer("a", 0, 10).unwrap(),
            Dimension::real("b", -1.0, 1.0).unwrap(),
            Dimension::integer("c", -3, 3).unwrap(),
        ];

        let report = run_fleet(&runner, &dims, &FleetOptions::new(3)).unwrap();
        assert_eq!(report.kills_sent, 3);
        assert_eq!(report.results.len(), 8);
        let mut dispatched: Vec<usize> = report.assignments.iter().map(|(h, _)| *h).collect();
        dispatched.sort_unstable();
        assert_eq!(dispatched, (0..8).collect::<Vec<_>>());

        let on_disk = runner.results().load_results(SortOrder::None).unwrap();
        assert_eq!(on_disk.len(), 8);
        for record in on_disk {
            assert_eq!(Some(&record.trace), report.results.get(&record.rank));
        }
        assert!(report.best().is_some());
    }

    #[test]
    fn elastic_fleet_with_heartbeats() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new("live", dir.path())
            .with_dispatch(DispatchMode::Elastic)
            .with_iterations(4);
        let objective = IgnoreBudget(&sphere);
        let runner = SearchRunner::new(config, &objective).unwrap();
        let options = FleetOptions::new(2).with_liveness_timeout(Duration::from_secs(30));

        let report = run_elastic(&runner, &dimensions(), &options).unwrap();
        assert_eq!(report.results.len(), 4);
        assert!(report.lost_workers.is_empty());
    }

    #[test]
    fn resumed_run_starts_from_checkpoints() {
        let dir = tempdir().unwrap();
        let checkpoints = dir.path().join("checkpoints");
        let objective = IgnoreBudget(&sphere);

        let first_config = RunConfig::new("first", dir.path().join("first"))
            .with_iterations(3)
            .with_checkpoints(&checkpoints);
        let first = SearchRunner::new(first_config, &objective).unwrap();
        let first_report = run_static(&first, &dimensions(), &FleetOptions::new(4)).unwrap();

        let second_config = RunConfig::new("second", dir.path().join("second"))
            .with_iterations(5)
            .with_checkpoints(&checkpoints);
        let items = plan_work(&second_config, &dimensions()).unwrap();
        assert!(items.iter().all(|i| i.checkpoint.is_some()));

        let second = SearchRunner::new(second_config, &objective).unwrap();
        let second_report = run_static(&second, &dimensions(), &FleetOptions::new(4)).unwrap();
        for (index, trace) in &second_report.results {
            assert_eq!(trace.len(), 5);
            let earlier = &first_report.results[index];
            assert_eq!(&trace.evaluations[..3], &earlier.evaluations[..]);
        }
    }

    #[test]
    fn elastic_fleet_survives_a_failed_worker() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new("flaky", dir.path())
            .with_dispatch(DispatchMode::Elastic)
            .with_iterations(4);
        let objective = IgnoreBudget(&sphere);
        let runner = SearchRunner::new(config, &objective)
            .unwrap()
            .with_registry(Flaky::registry(1));
        let options = FleetOptions::new(2).with_liveness_timeout(Duration::from_millis(200));

        let report = run_elastic(&runner, &dimensions(), &options).unwrap();
        assert_eq!(report.results.len(), 4);
        assert_eq!(report.lost_workers.len(), 1);
        assert_eq!(report.kills_sent, 1);
        for index in 0..4 {
            assert!(dir.path().join(hyperspace_filename(index)).exists());
        }
    }

    #[test]
    fn worker_error_is_reported_over_dispatch_failure() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new("broken", dir.path()).with_dispatch(DispatchMode::Elastic);
        let objective = IgnoreBudget(&sphere);
        let runner = SearchRunner::new(config, &objective)
            .unwrap()
            .with_registry(Flaky::registry(usize::MAX));

        let err = run_elastic(&runner, &dimensions(), &FleetOptions::new(2)).unwrap_err();
        assert!(
            matches!(&err, HsError::Internal(message) if message.contains("optimizer crashed")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn unknown_model_fails_before_dispatch() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new("gp", dir.path())
            .with_dispatch(DispatchMode::Elastic)
            .with_model(Model::Gp);
        let objective = IgnoreBudget(&sphere);
        let runner = SearchRunner::new(config, &objective).unwrap();

        for options in [FleetOptions::new(2), FleetOptions::new(4)] {
            let err = run_elastic(&runner, &dimensions(), &options).unwrap_err();
            assert!(matches!(err, HsError::Config(ConfigError::UnknownModel { .. })));
        }
        let err = run_static(&runner, &dimensions(), &FleetOptions::new(4)).unwrap_err();
        assert!(matches!(err, HsError::Config(ConfigError::UnknownModel { .. })));
        assert!(!dir.path().join(hyperspace_filename(0)).exists());
    }

    #[test]
    fn elastic_needs_workers() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new("none", dir.path()).with_dispatch(DispatchMode::Elastic);
        let objective = IgnoreBudget(&sphere);
        let runner = SearchRunner::new(config, &objective).unwrap();
        assert!(run_fleet(&runner, &dimensions(), &FleetOptions::new(0)).is_err());
    }
}
