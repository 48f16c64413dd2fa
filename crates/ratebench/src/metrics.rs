//! Descriptive statistics over a set of outcomes.

use serde::{Deserialize, Serialize};

use crate::{error::BenchError, outcome::Outcome};

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    /// Population standard deviation.
    pub std_dev: f64,
}

impl LatencyStats {
    /// Computes the distribution of `samples`, which must be non-empty.
    fn from_samples(samples: &[f64]) -> Self {
        let count = samples.len() as f64;
        let sum: f64 = samples.iter().sum();
        let avg = sum / count;
        let variance = samples.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / count;

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        Self {
            avg,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            std_dev: variance.sqrt(),
        }
    }
}

/// Value at index `floor(len * p)`, clamped to the last element.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Per-category summary of a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMetrics {
    pub total_tests: usize,
    pub successful_tests: usize,
    pub failed_tests: usize,
    /// Percentage of successful outcomes.
    pub success_rate: f64,
    pub latency: LatencyStats,
    pub total_resource_cost: f64,
    /// Total cost divided by all outcomes, failed ones included.
    pub avg_resource_cost: f64,
}

impl CategoryMetrics {
    /// Summarises `outcomes`. Durations of failed outcomes are included in the
    /// latency figures.
    pub fn compute(category: &str, outcomes: &[Outcome]) -> Result<Self, BenchError> {
        if outcomes.is_empty() {
            return Err(BenchError::InsufficientData(format!(
                "category '{category}' has no outcomes"
            )));
        }

        let total_tests = outcomes.len();
        let successful_tests = outcomes.iter().filter(|o| o.is_success()).count();
        let durations: Vec<f64> = outcomes.iter().map(Outcome::duration_ms).collect();
        let total_resource_cost: f64 = outcomes.iter().filter_map(Outcome::resource_cost).sum();

        Ok(Self {
            total_tests,
            successful_tests,
            failed_tests: total_tests - successful_tests,
            success_rate: successful_tests as f64 / total_tests as f64 * 100.0,
            latency: LatencyStats::from_samples(&durations),
            total_resource_cost,
            avg_resource_cost: total_resource_cost / total_tests as f64,
        })
    }

    /// Named scalar view used for cross-round aggregation.
    pub fn scalars(&self) -> [(&'static str, f64); 12] {
        [
            ("totalTests", self.total_tests as f64),
            ("successfulTests", self.successful_tests as f64),
            ("failedTests", self.failed_tests as f64),
            ("successRate", self.success_rate),
            ("avgLatencyMs", self.latency.avg),
            ("minLatencyMs", self.latency.min),
            ("maxLatencyMs", self.latency.max),
            ("p50LatencyMs", self.latency.p50),
            ("p95LatencyMs", self.latency.p95),
            ("p99LatencyMs", self.latency.p99),
            ("totalResourceCost", self.total_resource_cost),
            ("avgResourceCost", self.avg_resource_cost),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::outcome::Payload;

    fn ok(ms: u64, cost: Option<f64>) -> Outcome {
        Outcome::success("t", "c", Duration::from_millis(ms), cost, Payload::new())
    }

    fn failed(ms: u64) -> Outcome {
        Outcome::failure("t", "c", Duration::from_millis(ms), "reverted")
    }

    #[test]
    fn test_empty_input_is_insufficient() {
        let err = CategoryMetrics::compute("roles", &[]).unwrap_err();
        assert!(matches!(err, BenchError::InsufficientData(_)));
    }

    #[test]
    fn test_counts_and_success_rate() {
        let outcomes = vec![ok(10, None), failed(30), ok(20, None), failed(5)];
        let metrics = CategoryMetrics::compute("c", &outcomes).unwrap();

        assert_eq!(metrics.total_tests, 4);
        assert_eq!(metrics.successful_tests + metrics.failed_tests, metrics.total_tests);
        assert_eq!(metrics.failed_tests, 2);
        assert_eq!(metrics.success_rate, 50.0);
        assert_eq!(metrics.latency.min, 5.0);
        assert_eq!(metrics.latency.max, 30.0);
        assert_eq!(metrics.latency.avg, 16.25);
    }

    #[test]
    fn test_p95_small_sample_is_max() {
        let outcomes: Vec<_> = (1..=19).map(|ms| ok(ms, None)).collect();
        let metrics = CategoryMetrics::compute("c", &outcomes).unwrap();
        assert_eq!(metrics.latency.p95, 19.0);
        assert_eq!(metrics.latency.p50, 10.0);
    }

    #[test]
    fn test_p95_uses_floor_index() {
        // 40 samples: floor(0.95 * 40) = 38, the 39th smallest value.
        let outcomes: Vec<_> = (1..=40).rev().map(|ms| ok(ms, None)).collect();
        let metrics = CategoryMetrics::compute("c", &outcomes).unwrap();
        assert_eq!(metrics.latency.p95, 39.0);
        assert_eq!(metrics.latency.p99, 40.0);
    }

    #[test]
    fn test_resource_cost_counts_absent_as_zero() {
        let outcomes = vec![ok(1, Some(100.0)), ok(1, None), failed(1), ok(1, Some(50.0))];
        let metrics = CategoryMetrics::compute("c", &outcomes).unwrap();
        assert_eq!(metrics.total_resource_cost, 150.0);
        assert_eq!(metrics.avg_resource_cost, 37.5);
    }

    #[test]
    fn test_population_std_dev() {
        let outcomes: Vec<_> = [2, 4, 4, 4, 5, 5, 7, 9].into_iter().map(|ms| ok(ms, None)).collect();
        let metrics = CategoryMetrics::compute("c", &outcomes).unwrap();
        assert!((metrics.latency.std_dev - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_computation_is_bit_identical() {
        let outcomes: Vec<_> = [0.1, 0.2, 0.3, 1e9, 7.7]
            .into_iter()
            .map(|ms: f64| {
                Outcome::success("t", "c", Duration::from_secs_f64(ms / 1000.0), Some(ms), Payload::new())
            })
            .collect();
        let first = CategoryMetrics::compute("c", &outcomes).unwrap();
        let second = CategoryMetrics::compute("c", &outcomes).unwrap();
        assert_eq!(first.latency.avg.to_bits(), second.latency.avg.to_bits());
        assert_eq!(first.latency.std_dev.to_bits(), second.latency.std_dev.to_bits());
        assert_eq!(first.total_resource_cost.to_bits(), second.total_resource_cost.to_bits());
    }

    #[test]
    fn test_percentile_helper() {
        assert_eq!(percentile(&[], 0.5), 0.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 0.5), 3.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 1.0), 4.0);
    }
}
