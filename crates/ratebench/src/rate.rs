//! Rate-controlled load generation.

use std::{fmt, fmt::Display, future::Future, time::Duration};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    error::BenchError,
    executor::TimedExecutor,
    metrics::CategoryMetrics,
    outcome::{OperationOutput, Outcome, Payload},
};

/// Rates above this are dispatched as one concurrent batch.
pub const DEFAULT_SEQUENTIAL_THRESHOLD: f64 = 100.0;

/// How a load run issues its calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One call at a time, paced to the target rate.
    Sequential,
    /// Every call created up front and joined together.
    ConcurrentBatch,
}

impl DispatchMode {
    pub fn for_rate(rate: f64, sequential_threshold: f64) -> Self {
        if rate <= sequential_threshold { Self::Sequential } else { Self::ConcurrentBatch }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::ConcurrentBatch => write!(f, "concurrent_batch"),
        }
    }
}

/// Everything observed during one load run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub rate: f64,
    pub mode: DispatchMode,
    pub outcomes: Vec<Outcome>,
    /// Milliseconds from the start of the run to each call's issue, in outcome order.
    pub issue_offsets_ms: Vec<f64>,
    pub wall_clock_ms: f64,
    /// Calls per second over the wall clock, failures included.
    pub throughput: f64,
}

impl LoadReport {
    fn new(rate: f64, mode: DispatchMode, issued: Vec<(f64, Outcome)>, wall_clock: Duration) -> Self {
        let wall_clock_ms = wall_clock.as_secs_f64() * 1000.0;
        let throughput = if wall_clock_ms > 0.0 {
            issued.len() as f64 * 1000.0 / wall_clock_ms
        } else {
            0.0
        };
        let (issue_offsets_ms, outcomes) = issued.into_iter().unzip();
        Self { rate, mode, outcomes, issue_offsets_ms, wall_clock_ms, throughput }
    }

    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.successful()
    }

    pub fn metrics(&self, category: &str) -> Result<CategoryMetrics, BenchError> {
        CategoryMetrics::compute(category, &self.outcomes)
    }

    /// Summary fields suitable for an outcome payload.
    pub fn summary_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("rate".into(), json!(self.rate));
        payload.insert("mode".into(), json!(self.mode.to_string()));
        payload.insert("requests".into(), json!(self.outcomes.len()));
        payload.insert("successful".into(), json!(self.successful()));
        payload.insert("failed".into(), json!(self.failed()));
        payload.insert("totalTimeMs".into(), json!(self.wall_clock_ms));
        payload.insert("throughputTps".into(), json!(self.throughput));
        if let Ok(metrics) = self.metrics("load") {
            payload.insert("successRate".into(), json!(metrics.success_rate));
            payload.insert("avgLatencyMs".into(), json!(metrics.latency.avg));
            payload.insert("p95LatencyMs".into(), json!(metrics.latency.p95));
            payload.insert("totalResourceCost".into(), json!(metrics.total_resource_cost));
        }
        payload
    }
}

/// Drives repeated invocations of an operation at a target rate.
#[derive(Debug, Clone, Copy)]
pub struct RateController {
    executor: TimedExecutor,
    sequential_threshold: f64,
    contention_factor: f64,
}

impl Default for RateController {
    fn default() -> Self {
        Self {
            executor: TimedExecutor::new(),
            sequential_threshold: DEFAULT_SEQUENTIAL_THRESHOLD,
            contention_factor: 0.0,
        }
    }
}

impl RateController {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_sequential_threshold(mut self, threshold: f64) -> Self {
        self.sequential_threshold = threshold;
        self
    }

    /// Milliseconds of extra delay per call per decade of rate. Zero disables it.
    pub const fn with_contention_factor(mut self, factor: f64) -> Self {
        self.contention_factor = factor;
        self
    }

    pub const fn with_executor(mut self, executor: TimedExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub const fn executor(&self) -> &TimedExecutor {
        &self.executor
    }

    pub const fn sequential_threshold(&self) -> f64 {
        self.sequential_threshold
    }

    pub const fn contention_factor(&self) -> f64 {
        self.contention_factor
    }

    /// Simulated queuing delay added to every call at `rate`.
    pub fn contention_delay(&self, rate: f64) -> Duration {
        if self.contention_factor <= 0.0 || rate <= 1.0 {
            return Duration::ZERO;
        }
        let ms = rate.log10() * self.contention_factor;
        if ms.is_finite() && ms > 0.0 { Duration::from_secs_f64(ms / 1000.0) } else { Duration::ZERO }
    }

    /// Issues `count` calls at `rate` per second, picking the dispatch mode from the rate.
    pub async fn run<F, Fut, T, E>(
        &self,
        name: &str,
        category: &str,
        rate: f64,
        count: usize,
        factory: F,
    ) -> Result<LoadReport, BenchError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: OperationOutput,
        E: Display,
    {
        validate(rate, count)?;
        match DispatchMode::for_rate(rate, self.sequential_threshold) {
            DispatchMode::Sequential => self.dispatch_sequential(name, category, rate, count, factory).await,
            DispatchMode::ConcurrentBatch => {
                self.dispatch_concurrent(name, category, rate, count, factory).await
            }
        }
    }

    /// Issues `count` calls at once, regardless of the sequential threshold.
    pub async fn run_batch<F, Fut, T, E>(
        &self,
        name: &str,
        category: &str,
        count: usize,
        factory: F,
    ) -> Result<LoadReport, BenchError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: OperationOutput,
        E: Display,
    {
        let rate = count as f64;
        validate(rate, count)?;
        self.dispatch_concurrent(name, category, rate, count, factory).await
    }

    async fn dispatch_sequential<F, Fut, T, E>(
        &self,
        name: &str,
        category: &str,
        rate: f64,
        count: usize,
        mut factory: F,
    ) -> Result<LoadReport, BenchError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: OperationOutput,
        E: Display,
    {
        let interval = Duration::from_secs_f64(1.0 / rate);
        let delay = self.contention_delay(rate);
        info!(name, category, rate, count, mode = %DispatchMode::Sequential, "Starting load run");

        let start = Instant::now();
        let mut issued = Vec::with_capacity(count);
        for i in 0..count {
            let offset = start.elapsed().as_secs_f64() * 1000.0;
            let call = format!("{name}#{i}");
            let outcome = self.executor.run(&call, category, || delayed(delay, factory(i))).await;
            let latency = Duration::from_secs_f64(outcome.duration_ms() / 1000.0);
            issued.push((offset, outcome));

            if i + 1 < count
                && let Some(remaining) = interval.checked_sub(latency)
            {
                tokio::time::sleep(remaining).await;
            }
        }

        let report = LoadReport::new(rate, DispatchMode::Sequential, issued, start.elapsed());
        log_report(name, &report);
        Ok(report)
    }

    async fn dispatch_concurrent<F, Fut, T, E>(
        &self,
        name: &str,
        category: &str,
        rate: f64,
        count: usize,
        mut factory: F,
    ) -> Result<LoadReport, BenchError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: OperationOutput,
        E: Display,
    {
        let delay = self.contention_delay(rate);
        info!(name, category, rate, count, mode = %DispatchMode::ConcurrentBatch, "Starting load run");

        let start = Instant::now();
        let calls = (0..count).map(|i| {
            let op = factory(i);
            let executor = self.executor;
            async move {
                let offset = start.elapsed().as_secs_f64() * 1000.0;
                let call = format!("{name}#{i}");
                let outcome = executor.run(&call, category, || delayed(delay, op)).await;
                (offset, outcome)
            }
        });
        let issued = join_all(calls.collect::<Vec<_>>()).await;

        let report = LoadReport::new(rate, DispatchMode::ConcurrentBatch, issued, start.elapsed());
        log_report(name, &report);
        Ok(report)
    }
}

fn validate(rate: f64, count: usize) -> Result<(), BenchError> {
    if !rate.is_finite() || rate < 1.0 {
        return Err(BenchError::InvalidConfig(format!("rate must be at least 1 op/s, got {rate}")));
    }
    if count == 0 {
        return Err(BenchError::InvalidConfig("request count must be at least 1".into()));
    }
    Ok(())
}

async fn delayed<Fut: Future>(delay: Duration, op: Fut) -> Fut::Output {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    op.await
}

fn log_report(name: &str, report: &LoadReport) {
    debug!(
        name,
        rate = report.rate,
        successful = report.successful(),
        failed = report.failed(),
        wall_clock_ms = report.wall_clock_ms,
        throughput = report.throughput,
        "Load run complete"
    );
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};

    use super::*;

    async fn instant(_: usize) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_dispatch_mode_threshold() {
        assert_eq!(DispatchMode::for_rate(1.0, 100.0), DispatchMode::Sequential);
        assert_eq!(DispatchMode::for_rate(100.0, 100.0), DispatchMode::Sequential);
        assert_eq!(DispatchMode::for_rate(100.5, 100.0), DispatchMode::ConcurrentBatch);
    }

    #[test]
    fn test_contention_delay() {
        let controller = RateController::new();
        assert_eq!(controller.contention_delay(500.0), Duration::ZERO);

        let controller = RateController::new().with_contention_factor(10.0);
        assert_eq!(controller.contention_delay(1.0), Duration::ZERO);
        let delay = controller.contention_delay(100.0);
        assert!((delay.as_secs_f64() * 1000.0 - 20.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_rejects_invalid_parameters() {
        let controller = RateController::new();
        let err = controller.run("x", "c", 0.5, 5, instant).await.unwrap_err();
        assert!(matches!(err, BenchError::InvalidConfig(_)));
        let err = controller.run("x", "c", f64::NAN, 5, instant).await.unwrap_err();
        assert!(matches!(err, BenchError::InvalidConfig(_)));
        let err = controller.run("x", "c", 10.0, 0, instant).await.unwrap_err();
        assert!(matches!(err, BenchError::InvalidConfig(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_pacing() {
        let report = RateController::new().run("pace", "load", 1.0, 5, instant).await.unwrap();

        assert_eq!(report.mode, DispatchMode::Sequential);
        assert_eq!(report.outcomes.len(), 5);
        for pair in report.issue_offsets_ms.windows(2) {
            assert!(pair[1] - pair[0] >= 999.0, "calls issued {}ms apart", pair[1] - pair[0]);
        }
        assert!(report.wall_clock_ms >= 4000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_skips_sleep_when_latency_exceeds_interval() {
        let report = RateController::new()
            .run("slow", "load", 10.0, 3, |_| async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok::<_, anyhow::Error>(())
            })
            .await
            .unwrap();

        // 100ms interval, 150ms latency: calls follow each other back to back.
        assert!((report.issue_offsets_ms[1] - 150.0).abs() < 1.0);
        assert!((report.issue_offsets_ms[2] - 300.0).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_batch_issues_without_pacing() {
        let report = RateController::new()
            .run("burst", "load", 500.0, 500, |_| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, anyhow::Error>(())
            })
            .await
            .unwrap();

        assert_eq!(report.mode, DispatchMode::ConcurrentBatch);
        assert_eq!(report.outcomes.len(), 500);
        assert!(report.issue_offsets_ms.iter().all(|offset| *offset < 1.0));
        assert!(report.wall_clock_ms < 100.0);
        assert!(report.throughput > 5000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_count_toward_total() {
        let report = RateController::new()
            .run("mixed", "load", 200.0, 10, |i| async move {
                if i % 2 == 0 {
                    bail!("reverted at call {i}");
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 10);
        assert_eq!(report.failed(), 5);
        assert_eq!(report.successful(), 5);
        let payload = report.summary_payload();
        assert_eq!(payload.get("failed"), Some(&json!(5)));
        assert_eq!(payload.get("successRate"), Some(&json!(50.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contention_delay_is_measured() {
        let report = RateController::new()
            .with_contention_factor(10.0)
            .run("contended", "load", 100.0, 2, instant)
            .await
            .unwrap();

        for outcome in &report.outcomes {
            assert!(outcome.duration_ms() >= 20.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_batch_ignores_threshold() {
        let report = RateController::new().run_batch("batch", "load", 4, instant).await.unwrap();
        assert_eq!(report.mode, DispatchMode::ConcurrentBatch);
        assert_eq!(report.rate, 4.0);
    }
}
