//! # hs-store
//!
//! Persistence for hyperspace search: rank-named result and checkpoint files,
//! warm-start resolution on resume, and result aggregation.

mod checkpoint;
mod naming;
mod results;

pub use checkpoint::{resolve_warm_start, CheckpointRecord, CheckpointSaver, CheckpointStore};
pub use naming::{benchmark_dir, hyperspace_filename, list_ranked, parse_rank, FILE_PREFIX};
pub use results::{ResultRecord, ResultStore, ResultSummary, SortOrder};
