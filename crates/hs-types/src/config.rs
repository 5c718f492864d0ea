//! Run configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{ConfigError, HsError, HsResult};

/// Unique run identifier.
pub type RunId = Uuid;

/// Optimizer family used for each hyperspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Model {
    /// Gaussian process surrogate.
    #[serde(rename = "GP")]
    Gp,
    /// Random forest surrogate.
    #[serde(rename = "RF")]
    Rf,
    /// Gradient boosted regression trees surrogate.
    #[serde(rename = "GBRT")]
    Gbrt,
    /// Random search.
    #[serde(rename = "RAND")]
    Rand,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gp => "GP",
            Self::Rf => "RF",
            Self::Gbrt => "GBRT",
            Self::Rand => "RAND",
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Model {
    type Err = HsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GP" => Ok(Self::Gp),
            "RF" => Ok(Self::Rf),
            "GBRT" => Ok(Self::Gbrt),
            "RAND" => Ok(Self::Rand),
            other => Err(ConfigError::UnknownModel {
                model: other.to_string(),
            }
            .into()),
        }
    }
}

/// How each worker searches its hyperspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    /// A single optimizer run of `n_iterations` evaluations.
    Flat,
    /// Hyperband successive halving with `max_iter` / `eta`.
    Hyperband,
}

/// How hyperspaces are handed to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Worker `r` takes hyperspaces `r*k .. r*k+k` with no coordination.
    Static,
    /// Workers pull hyperspaces from a coordinator queue.
    Elastic,
}

/// Warm-start sampling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    None,
    Lhs,
}

impl std::fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Lhs => write!(f, "lhs"),
        }
    }
}

/// Which Hyperband brackets end up in the returned trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketPolicy {
    /// Only the final rung of the last bracket (`s = 0`).
    LastBracket,
    /// Every evaluation of every bracket, in execution order.
    AllBrackets,
}

/// Top-level configuration for a distributed search run.
///
/// Missing fields in a serialized config take the values of
/// [`RunConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub id: RunId,
    pub name: String,

    pub model: Model,
    pub search: SearchKind,
    pub dispatch: DispatchMode,

    /// Evaluations per hyperspace for flat search.
    pub n_iterations: usize,
    /// Random evaluations before the surrogate takes over. Reduced by the
    /// number of warm-start points.
    pub n_random_starts: usize,

    /// Hyperband maximum budget per configuration.
    pub max_iter: u64,
    /// Hyperband downsampling rate.
    pub eta: u64,
    pub bracket_policy: BracketPolicy,

    /// Fraction of each dimension shared by its two halves.
    pub overlap: f64,

    pub sampler: SamplerKind,
    pub n_samples: Option<usize>,

    pub random_state: u64,
    /// Wall-clock limit for each worker's optimizer run.
    pub deadline_secs: Option<u64>,

    /// Number of hyperspaces each static worker processes.
    pub hyperspaces_per_worker: usize,

    pub results_path: PathBuf,
    /// Checkpoint directory. Setting it enables resume and per-step saving.
    pub checkpoints_path: Option<PathBuf>,

    pub created_at: DateTime<Utc>,
}

impl RunConfig {
    pub fn new(name: impl Into<String>, results_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            model: Model::Rand,
            search: SearchKind::Flat,
            dispatch: DispatchMode::Static,
            n_iterations: 50,
            n_random_starts: 10,
            max_iter: 50,
            eta: 3,
            bracket_policy: BracketPolicy::LastBracket,
            overlap: 0.25,
            sampler: SamplerKind::None,
            n_samples: None,
            random_state: 0,
            deadline_secs: None,
            hyperspaces_per_worker: 1,
            results_path: results_path.into(),
            checkpoints_path: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    pub fn with_search(mut self, search: SearchKind) -> Self {
        self.search = search;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_iterations(mut self, n: usize) -> Self {
        self.n_iterations = n;
        self
    }

    pub fn with_hyperband(mut self, max_iter: u64, eta: u64) -> Self {
        self.search = SearchKind::Hyperband;
        self.max_iter = max_iter;
        self.eta = eta;
        self
    }

    pub fn with_bracket_policy(mut self, policy: BracketPolicy) -> Self {
        self.bracket_policy = policy;
        self
    }

    pub fn with_overlap(mut self, overlap: f64) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_lhs(mut self, n_samples: usize) -> Self {
        self.sampler = SamplerKind::Lhs;
        self.n_samples = Some(n_samples);
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn with_deadline(mut self, secs: u64) -> Self {
        self.deadline_secs = Some(secs);
        self
    }

    pub fn with_hyperspaces_per_worker(mut self, k: usize) -> Self {
        self.hyperspaces_per_worker = k;
        self
    }

    pub fn with_checkpoints(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoints_path = Some(path.into());
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> HsResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Reject invalid or mutually exclusive options before anything runs.
    pub fn validate(&self) -> HsResult<()> {
        if self.checkpoints_path.is_some() && self.sampler != SamplerKind::None {
            return Err(ConfigError::ConfigConflict {
                message: "cannot both restart from a previous run and use latin hypercube \
                          sampling for initial search points"
                    .to_string(),
            }
            .into());
        }

        if self.sampler != SamplerKind::None && !matches!(self.n_samples, Some(n) if n > 0) {
            return Err(ConfigError::MissingSamplerSampleCount {
                sampler: self.sampler.to_string(),
                n_samples: self.n_samples,
            }
            .into());
        }

        if !(0.0..=1.0).contains(&self.overlap) {
            return Err(invalid("overlap", format!("must be in [0, 1], got {}", self.overlap)));
        }

        match self.search {
            SearchKind::Flat if self.n_iterations == 0 => {
                return Err(invalid("n_iterations", "must be at least 1".to_string()));
            }
            SearchKind::Hyperband if self.max_iter == 0 => {
                return Err(invalid("max_iter", "must be at least 1".to_string()));
            }
            SearchKind::Hyperband if self.eta < 2 => {
                return Err(invalid("eta", format!("must be at least 2, got {}", self.eta)));
            }
            _ => {}
        }

        if self.hyperspaces_per_worker == 0 {
            return Err(invalid(
                "hyperspaces_per_worker",
                "must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new("hyperspace", "results")
    }
}

fn invalid(field: &str, message: String) -> HsError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message,
    }
    .into()
}

/// A run file: configuration plus raw dimension descriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub config: RunConfig,
    /// `(name, spec)` pairs, interpreted by [`crate::Dimension::from_spec`].
    pub dimensions: Vec<(String, serde_json::Value)>,
}

impl RunSpec {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> HsResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let spec: Self = serde_json::from_str(&raw)?;
        Ok(spec)
    }

    pub fn dimensions(&self) -> HsResult<Vec<crate::Dimension>> {
        self.dimensions
            .iter()
            .map(|(name, spec)| crate::Dimension::from_spec(name.clone(), spec))
            .collect()
    }
}
