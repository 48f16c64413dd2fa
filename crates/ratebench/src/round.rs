use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{error::BenchError, metrics::CategoryMetrics, outcome::Outcome};

/// Outcomes of one category together with their summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReport {
    pub results: Vec<Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CategoryMetrics>,
}

impl CategoryReport {
    /// Builds the report, leaving metrics empty when there is nothing to summarise.
    pub fn from_results(category: &str, results: Vec<Outcome>) -> Self {
        let metrics = match CategoryMetrics::compute(category, &results) {
            Ok(metrics) => Some(metrics),
            Err(e @ BenchError::InsufficientData(_)) => {
                warn!(category, error = %e, "Skipping metrics for category");
                None
            }
            Err(e) => {
                warn!(category, error = %e, "Failed to compute category metrics");
                None
            }
        };
        Self { results, metrics }
    }
}

/// A test that did not run, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTest {
    pub category: String,
    pub name: String,
    pub reason: String,
}

/// Everything one full execution of a suite produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    pub categories: BTreeMap<String, CategoryReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedTest>,
}

impl RoundResult {
    pub fn total(&self) -> usize {
        self.categories.values().map(|c| c.results.len()).sum()
    }

    pub fn passed(&self) -> usize {
        self.categories
            .values()
            .flat_map(|c| c.results.iter())
            .filter(|o| o.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::outcome::Payload;

    #[test]
    fn test_empty_category_has_no_metrics() {
        let report = CategoryReport::from_results("empty", Vec::new());
        assert!(report.metrics.is_none());

        let outcome = Outcome::success("t", "c", Duration::from_millis(4), None, Payload::new());
        let report = CategoryReport::from_results("c", vec![outcome]);
        assert_eq!(report.metrics.unwrap().total_tests, 1);
    }

    #[test]
    fn test_round_totals() {
        let ok = Outcome::success("a", "c", Duration::ZERO, None, Payload::new());
        let bad = Outcome::failure("b", "c", Duration::ZERO, "nope");
        let round = RoundResult {
            round: 1,
            timestamp: Utc::now(),
            categories: BTreeMap::from([
                ("c".to_string(), CategoryReport::from_results("c", vec![ok.clone(), bad])),
                ("d".to_string(), CategoryReport::from_results("d", vec![ok])),
            ]),
            skipped: Vec::new(),
        };
        assert_eq!(round.total(), 3);
        assert_eq!(round.passed(), 2);
        assert_eq!(round.failed(), 1);
    }
}
