//! Per-hyperspace result files and their aggregation.

use std::fs;
use std::path::{Path, PathBuf};

use hs_types::{HsResult, Point, Trace};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::naming::{hyperspace_filename, list_ranked, write_json_atomic};

/// Ordering of loaded results by best value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Rank order.
    #[default]
    None,
    Ascending,
    Descending,
}

/// A loaded result file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub rank: usize,
    pub trace: Trace,
}

/// Normalized view of one result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub rank: usize,
    pub best_value: Option<f64>,
    pub best_point: Option<Point>,
    pub n_evaluations: usize,
    pub convergence: Vec<f64>,
}

impl From<&ResultRecord> for ResultSummary {
    fn from(record: &ResultRecord) -> Self {
        Self {
            rank: record.rank,
            best_value: record.trace.best_value(),
            best_point: record.trace.best_point().cloned(),
            n_evaluations: record.trace.len(),
            convergence: record.trace.convergence(),
        }
    }
}

/// A directory of `hyperspace<rank>` result files.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new<P: AsRef<Path>>(root: P) -> HsResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, rank: usize) -> PathBuf {
        self.root.join(hyperspace_filename(rank))
    }

    pub fn save(&self, rank: usize, trace: &Trace) -> HsResult<PathBuf> {
        let path = self.path(rank);
        write_json_atomic(&path, trace)?;
        info!(
            rank,
            evaluations = trace.len(),
            best = ?trace.best_value(),
            path = %path.display(),
            "result written"
        );
        Ok(path)
    }

    pub fn load(&self, rank: usize) -> HsResult<Trace> {
        let content = fs::read_to_string(self.path(rank))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Every readable result in the directory.
    ///
    /// Unreadable files are skipped with a warning. Results without a finite
    /// best value sort last in either direction.
    pub fn load_results(&self, order: SortOrder) -> HsResult<Vec<ResultRecord>> {
        let mut records = Vec::new();
        for (rank, path) in list_ranked(&self.root)? {
            let parsed = fs::read_to_string(&path)
                .map_err(hs_types::HsError::from)
                .and_then(|c| serde_json::from_str::<Trace>(&c).map_err(Into::into));
            match parsed {
                Ok(trace) => records.push(ResultRecord { rank, trace }),
                Err(e) => warn!(rank, path = %path.display(), error = %e, "skipping unreadable result"),
            }
        }

        match order {
            SortOrder::None => {}
            SortOrder::Ascending => {
                records.sort_by(|a, b| compare_best(a, b, false));
            }
            SortOrder::Descending => {
                records.sort_by(|a, b| compare_best(a, b, true));
            }
        }
        Ok(records)
    }

    pub fn summaries(&self, order: SortOrder) -> HsResult<Vec<ResultSummary>> {
        Ok(self
            .load_results(order)?
            .iter()
            .map(ResultSummary::from)
            .collect())
    }

    /// The single best result across all hyperspaces.
    pub fn best(&self) -> HsResult<Option<ResultSummary>> {
        Ok(self
            .summaries(SortOrder::Ascending)?
            .into_iter()
            .find(|s| s.best_value.is_some()))
    }
}

fn compare_best(a: &ResultRecord, b: &ResultRecord, descending: bool) -> std::cmp::Ordering {
    match (a.trace.best_value(), b.trace.best_value()) {
        (Some(x), Some(y)) if descending => y.total_cmp(&x),
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}
