//! Run a hyperspace search described by a JSON run file.
//!
//! ```text
//! HYPERSPACE_RUN=run.json HYPERSPACE_WORKERS=4 hyperdrive
//! ```
//!
//! `HYPERSPACE_OBJECTIVE` picks a benchmark function: `sphere` (default) or
//! `styblinski-tang`.

use std::time::Duration;

use anyhow::{anyhow, Context};
use hs_cluster::{run_fleet, static_worker_count, FleetOptions, SearchRunner};
use hs_optimizer::IgnoreBudget;
use hs_types::{DispatchMode, ParamValue, Point, RunSpec};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn sphere(point: &Point) -> f64 {
    point.iter().filter_map(ParamValue::as_f64).map(|x| x * x).sum()
}

fn styblinski_tang(point: &Point) -> f64 {
    point
        .iter()
        .filter_map(ParamValue::as_f64)
        .map(|x| x.powi(4) - 16.0 * x * x + 5.0 * x)
        .sum::<f64>()
        / 2.0
}

fn env_usize(key: &str) -> anyhow::Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => Ok(Some(
            raw.parse()
                .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}"))?,
        )),
        Err(_) => Ok(None),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let run_path = std::env::var("HYPERSPACE_RUN")
        .context("HYPERSPACE_RUN must point at a run file")?;
    let spec = RunSpec::from_json_file(&run_path)
        .with_context(|| format!("failed to load run file {run_path}"))?;
    let dimensions = spec.dimensions()?;

    let objective: fn(&Point) -> f64 = match std::env::var("HYPERSPACE_OBJECTIVE")
        .unwrap_or_else(|_| "sphere".to_string())
        .as_str()
    {
        "sphere" => sphere,
        "styblinski-tang" => styblinski_tang,
        other => return Err(anyhow!("unknown objective {other:?}")),
    };

    let workers = match (env_usize("HYPERSPACE_WORKERS")?, spec.config.dispatch) {
        (Some(n), _) => n,
        (None, DispatchMode::Static) => {
            let hyperspaces = 1usize
                .checked_shl(dimensions.len() as u32)
                .ok_or_else(|| anyhow!("too many dimensions to partition"))?;
            static_worker_count(&spec.config, hyperspaces)?
        }
        (None, DispatchMode::Elastic) => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2),
    };

    let mut options = FleetOptions::new(workers);
    if let Some(ms) = env_usize("HYPERSPACE_LIVENESS_MS")? {
        options = options.with_liveness_timeout(Duration::from_millis(ms as u64));
    }

    info!(
        run = %spec.config.name,
        dimensions = dimensions.len(),
        workers,
        dispatch = ?spec.config.dispatch,
        "starting run"
    );

    let objective = IgnoreBudget(&objective);
    let runner = SearchRunner::new(spec.config, &objective)?;
    let report = run_fleet(&runner, &dimensions, &options)?;

    let summaries = runner.results().summaries(hs_store::SortOrder::Ascending)?;
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    if let Some((hyperspace, value)) = report.best() {
        info!(hyperspace, value, lost = report.lost_workers.len(), "run complete");
    }
    Ok(())
}
