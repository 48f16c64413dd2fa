use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the benchmark engine.
///
/// Operation failures never reach callers as `Err`: the executor folds them
/// into failed outcomes. The `Operation` variant exists for backends and test
/// bodies that want to report a typed failure before it is folded.
#[derive(Debug, Error)]
pub enum BenchError {
    /// The backend under test could not be prepared.
    #[error("setup failed: {0}")]
    Setup(String),

    /// A single operation against the backend failed.
    #[error("operation failed: {0}")]
    Operation(String),

    /// Statistics were requested over an empty outcome set.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A round artifact was missing or malformed during aggregation.
    #[error("aggregation gap in {source_label}: {reason}")]
    AggregationGap { source_label: String, reason: String },

    /// Load or run parameters were rejected before any call was made.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem access failed.
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artifact could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BenchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Returns true for failures that happened while preparing the backend.
    pub const fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BenchError::InsufficientData("category 'roles' has no outcomes".into());
        assert_eq!(err.to_string(), "insufficient data: category 'roles' has no outcomes");

        let err = BenchError::AggregationGap {
            source_label: "round-3".into(),
            reason: "file not found".into(),
        };
        assert_eq!(err.to_string(), "aggregation gap in round-3: file not found");

        let err = BenchError::io(
            "/tmp/out/round-1/results.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.to_string(), "i/o error at /tmp/out/round-1/results.json: missing");
    }

    #[test]
    fn test_is_setup() {
        assert!(BenchError::Setup("no admin".into()).is_setup());
        assert!(!BenchError::InvalidConfig("rate".into()).is_setup());
    }
}
