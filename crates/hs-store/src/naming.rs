//! File naming for per-hyperspace result and checkpoint files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use hs_types::{HsResult, Model};
use serde::Serialize;

pub const FILE_PREFIX: &str = "hyperspace";

/// `hyperspace00` … `hyperspace09`, then `hyperspace10`, `hyperspace11`, …
pub fn hyperspace_filename(rank: usize) -> String {
    format!("{FILE_PREFIX}{rank:02}")
}

/// Recover the rank from a file name produced by [`hyperspace_filename`].
pub fn parse_rank(file_name: &str) -> Option<usize> {
    let digits = file_name.strip_prefix(FILE_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// `<results>/<model>/run<seed>`, the layout used for benchmark sweeps.
pub fn benchmark_dir(results: &Path, model: Model, seed: u64) -> PathBuf {
    results.join(model.as_str()).join(format!("run{seed}"))
}

/// Ranked files in `dir`, sorted by rank. A missing directory is empty.
pub fn list_ranked(dir: &Path) -> HsResult<Vec<(usize, PathBuf)>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let rank = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_rank);
        if let Some(rank) = rank {
            files.push((rank, path));
        }
    }

    files.sort_by_key(|(rank, _)| *rank);
    Ok(files)
}

/// Serialize `value` to `path` through a temporary file and a rename, so
/// readers never observe a half-written file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> HsResult<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        serde_json::to_writer(&mut file, value)?;
        file.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn filenames_pad_single_digits() {
        assert_eq!(hyperspace_filename(0), "hyperspace00");
        assert_eq!(hyperspace_filename(9), "hyperspace09");
        assert_eq!(hyperspace_filename(10), "hyperspace10");
        assert_eq!(hyperspace_filename(128), "hyperspace128");
    }

    #[test]
    fn ranks_parse_back() {
        for rank in [0, 7, 10, 63, 1000] {
            assert_eq!(parse_rank(&hyperspace_filename(rank)), Some(rank));
        }
        assert_eq!(parse_rank("hyperspace"), None);
        assert_eq!(parse_rank("hyperspace03.tmp"), None);
        assert_eq!(parse_rank("results.json"), None);
    }

    #[test]
    fn listing_is_sorted_numerically() {
        let dir = tempdir().unwrap();
        for rank in [10, 2, 0, 11, 1] {
            fs::write(dir.path().join(hyperspace_filename(rank)), "{}").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let ranks: Vec<usize> = list_ranked(dir.path())
            .unwrap()
            .into_iter()
            .map(|(rank, _)| rank)
            .collect();
        assert_eq!(ranks, vec![0, 1, 2, 10, 11]);
        assert!(list_ranked(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn benchmark_layout() {
        let dir = benchmark_dir(Path::new("results"), Model::Gbrt, 3);
        assert_eq!(dir, Path::new("results").join("GBRT").join("run3"));
    }
}
