//! Per-worker checkpoints and warm-start resolution.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hs_optimizer::{StepCallback, StepControl};
use hs_types::{HsResult, Trace};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::naming::{hyperspace_filename, list_ranked, write_json_atomic};

/// What a checkpoint file holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub rank: usize,
    pub saved_at: DateTime<Utc>,
    pub trace: Trace,
}

/// A directory of `hyperspace<rank>` checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
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

    /// Overwrite the checkpoint of `rank` with `trace`.
    pub fn save(&self, rank: usize, trace: &Trace) -> HsResult<PathBuf> {
        let path = self.path(rank);
        let record = CheckpointRecord {
            rank,
            saved_at: Utc::now(),
            trace: trace.clone(),
        };
        write_json_atomic(&path, &record)?;
        debug!(rank, evaluations = trace.len(), path = %path.display(), "checkpoint saved");
        Ok(path)
    }

    /// The checkpoint of `rank`, or `None` when there is none (cold start).
    pub fn load(&self, rank: usize) -> HsResult<Option<Trace>> {
        let path = self.path(rank);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: CheckpointRecord = serde_json::from_str(&content)?;
        Ok(Some(record.trace))
    }

    /// Every checkpoint in the directory, keyed by rank.
    pub fn load_all(&self) -> HsResult<BTreeMap<usize, Trace>> {
        let mut checkpoints = BTreeMap::new();
        for (rank, path) in list_ranked(&self.root)? {
            let content = fs::read_to_string(&path)?;
            let record: CheckpointRecord = serde_json::from_str(&content)?;
            if record.rank != rank {
                warn!(
                    rank,
                    recorded = record.rank,
                    path = %path.display(),
                    "checkpoint rank disagrees with its file name, using the file name"
                );
            }
            checkpoints.insert(rank, record.trace);
        }
        info!(
            root = %self.root.display(),
            checkpoints = checkpoints.len(),
            "loaded checkpoints"
        );
        Ok(checkpoints)
    }
}

/// One warm-start slot per hyperspace.
///
/// Hyperspaces without a checkpoint get `None` (cold start). Checkpoints for
/// ranks outside `0..hyperspace_count` are ignored.
pub fn resolve_warm_start(
    hyperspace_count: usize,
    checkpoints: &BTreeMap<usize, Trace>,
) -> Vec<Option<Trace>> {
    if let Some((&rank, _)) = checkpoints.range(hyperspace_count..).next() {
        warn!(
            rank,
            hyperspace_count,
            "ignoring checkpoints beyond the last hyperspace"
        );
    }
    (0..hyperspace_count)
        .map(|rank| checkpoints.get(&rank).cloned())
        .collect()
}

/// Step callback that rewrites a worker's checkpoint after every evaluation.
#[derive(Debug, Clone)]
pub struct CheckpointSaver {
    store: CheckpointStore,
    rank: usize,
}

impl CheckpointSaver {
    pub fn new(store: CheckpointStore, rank: usize) -> Self {
        Self { store, rank }
    }
}

impl StepCallback for CheckpointSaver {
    fn on_step(&mut self, trace: &Trace) -> HsResult<StepControl> {
        self.store.save(self.rank, trace)?;
        Ok(StepControl::Continue)
    }

    fn name(&self) -> &str {
        "checkpoint"
    }
}
