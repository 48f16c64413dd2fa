//! On-disk layout of round and aggregate artifacts.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{aggregate::RoundSource, error::BenchError, round::RoundResult};

pub const ROUND_DIR_PREFIX: &str = "round-";
pub const ROUND_FILE: &str = "results.json";
pub const AGGREGATE_FILE: &str = "aggregate.json";

/// `<output>/round-<n>/results.json`
pub fn round_path(output_dir: &Path, round: u32) -> PathBuf {
    output_dir.join(format!("{ROUND_DIR_PREFIX}{round}")).join(ROUND_FILE)
}

pub fn aggregate_path(output_dir: &Path) -> PathBuf {
    output_dir.join(AGGREGATE_FILE)
}

pub fn write_round(output_dir: &Path, round: &RoundResult) -> Result<PathBuf, BenchError> {
    let path = round_path(output_dir, round.round);
    write_json(&path, round)?;
    info!(round = round.round, path = %path.display(), "Wrote round results");
    Ok(path)
}

pub fn load_round(path: &Path) -> Result<RoundResult, BenchError> {
    let contents = fs::read(path).map_err(|e| BenchError::io(path, e))?;
    Ok(serde_json::from_slice(&contents)?)
}

/// Writes `value` as pretty JSON, creating parent directories.
pub fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), BenchError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BenchError::io(parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).map_err(|e| BenchError::io(path, e))
}

/// Lists the `round-<n>` directories under `output_dir` in round order.
///
/// The returned paths point at each round's results file whether or not it
/// exists, so a directory left behind by an interrupted run surfaces as a gap.
pub fn discover_rounds(output_dir: &Path) -> Result<Vec<PathBuf>, BenchError> {
    let entries = fs::read_dir(output_dir).map_err(|e| BenchError::io(output_dir, e))?;

    let mut rounds = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| BenchError::io(output_dir, e))?;
        let name = entry.file_name();
        let Some(number) = name
            .to_str()
            .and_then(|n| n.strip_prefix(ROUND_DIR_PREFIX))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if entry.path().is_dir() {
            rounds.push((number, entry.path().join(ROUND_FILE)));
        }
    }
    rounds.sort_by_key(|(number, _)| *number);
    debug!(dir = %output_dir.display(), rounds = rounds.len(), "Discovered round artifacts");
    Ok(rounds.into_iter().map(|(_, path)| path).collect())
}

/// Loads each path, keeping failures as gaps rather than errors.
pub fn load_sources(paths: &[PathBuf]) -> Vec<RoundSource> {
    paths
        .iter()
        .map(|path| RoundSource { label: path.display().to_string(), round: load_round(path) })
        .collect()
}

/// Writes every round that has not been persisted yet. Errors are logged, not
/// returned; the count of rounds written is.
pub fn flush_rounds(output_dir: &Path, rounds: &[RoundResult]) -> usize {
    let mut written = 0;
    for round in rounds {
        if round_path(output_dir, round.round).exists() {
            continue;
        }
        match write_round(output_dir, round) {
            Ok(_) => written += 1,
            Err(e) => warn!(round = round.round, error = %e, "Failed to flush round"),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use anyhow::Result;
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;

    fn empty_round(n: u32) -> RoundResult {
        RoundResult { round: n, timestamp: Utc::now(), categories: BTreeMap::new(), skipped: Vec::new() }
    }

    #[test]
    fn test_write_and_discover_rounds() -> Result<()> {
        let dir = TempDir::new()?;
        for n in [10, 2, 1] {
            write_round(dir.path(), &empty_round(n))?;
        }
        fs::create_dir_all(dir.path().join("round-x"))?;
        fs::write(dir.path().join("round-7"), b"not a directory")?;

        let found = discover_rounds(dir.path())?;
        assert_eq!(found, vec![round_path(dir.path(), 1), round_path(dir.path(), 2), round_path(dir.path(), 10)]);

        let loaded = load_round(&found[2])?;
        assert_eq!(loaded.round, 10);
        Ok(())
    }

    #[test]
    fn test_missing_and_malformed_rounds_are_gaps() -> Result<()> {
        let dir = TempDir::new()?;
        write_round(dir.path(), &empty_round(1))?;
        fs::create_dir_all(dir.path().join("round-2"))?;
        fs::create_dir_all(dir.path().join("round-3"))?;
        fs::write(round_path(dir.path(), 3), b"{\"round\": 3, \"timestamp\": ")?;

        let sources = load_sources(&discover_rounds(dir.path())?);
        assert_eq!(sources.len(), 3);
        assert!(sources[0].round.is_ok());
        assert!(matches!(sources[1].round, Err(BenchError::Io { .. })));
        assert!(matches!(sources[2].round, Err(BenchError::Json(_))));
        Ok(())
    }

    #[test]
    fn test_discover_missing_dir_is_io_error() {
        let err = discover_rounds(Path::new("/nonexistent/ratebench-out")).unwrap_err();
        assert!(matches!(err, BenchError::Io { .. }));
    }

    #[test]
    fn test_flush_skips_persisted_rounds() -> Result<()> {
        let dir = TempDir::new()?;
        write_round(dir.path(), &empty_round(1))?;

        let written = flush_rounds(dir.path(), &[empty_round(1), empty_round(2)]);
        assert_eq!(written, 1);
        assert!(round_path(dir.path(), 2).exists());
        Ok(())
    }
}
