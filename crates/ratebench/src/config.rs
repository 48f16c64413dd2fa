use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{DimensionSpec, FieldSpec},
    error::BenchError,
    executor::TimedExecutor,
    rate::{DEFAULT_SEQUENTIAL_THRESHOLD, RateController},
    suites,
};

const fn default_rounds() -> u32 {
    3
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

const fn default_sequential_threshold() -> f64 {
    DEFAULT_SEQUENTIAL_THRESHOLD
}

const fn default_requests_per_rate() -> usize {
    10
}

fn default_rates() -> Vec<f64> {
    vec![1.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0]
}

fn default_batch_sizes() -> Vec<usize> {
    vec![1, 2, 4, 8, 16, 32]
}

fn default_data_sizes_kb() -> Vec<u32> {
    vec![1, 4, 16, 64]
}

fn default_base_latency() -> String {
    "5ms".to_string()
}

fn default_jitter() -> String {
    "3ms".to_string()
}

const fn default_seed() -> u64 {
    42
}

/// Parameters of the load sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_rates")]
    pub rates: Vec<f64>,
    #[serde(default = "default_requests_per_rate")]
    pub requests_per_rate: usize,
    #[serde(default = "default_batch_sizes")]
    pub batch_sizes: Vec<usize>,
    #[serde(default = "default_data_sizes_kb")]
    pub data_sizes_kb: Vec<u32>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            rates: default_rates(),
            requests_per_rate: default_requests_per_rate(),
            batch_sizes: default_batch_sizes(),
            data_sizes_kb: default_data_sizes_kb(),
        }
    }
}

/// Behaviour of the in-memory backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_base_latency")]
    pub base_latency: String,
    #[serde(default = "default_jitter")]
    pub jitter: String,
    /// Probability in `[0, 1]` that a mutating call reverts.
    #[serde(default)]
    pub failure_rate: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_latency: default_base_latency(),
            jitter: default_jitter(),
            failure_rate: 0.0,
            seed: default_seed(),
        }
    }
}

impl SimulatorConfig {
    pub fn parse_base_latency(&self) -> Result<Duration> {
        parse_duration("simulator.base_latency", &self.base_latency)
    }

    pub fn parse_jitter(&self) -> Result<Duration> {
        parse_duration("simulator.jitter", &self.jitter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Milliseconds of simulated queuing per call per decade of rate. Zero disables it.
    #[serde(default)]
    pub contention_factor: f64,
    #[serde(default = "default_sequential_threshold")]
    pub sequential_threshold: f64,
    /// Limit on each backend call and on single-call tests, e.g. "30s".
    pub op_timeout: Option<String>,
    /// Limit on a whole load sweep. Unset means sweeps run to completion.
    pub sweep_timeout: Option<String>,
    /// Pause between consecutive tests, e.g. "200ms".
    pub cooldown: Option<String>,
    pub filter: Option<String>,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<DimensionSpec>,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            output_dir: default_output_dir(),
            contention_factor: 0.0,
            sequential_threshold: default_sequential_threshold(),
            op_timeout: None,
            sweep_timeout: None,
            cooldown: None,
            filter: None,
            load: LoadConfig::default(),
            dimensions: default_dimensions(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&contents).context("failed to parse config YAML")
    }

    pub fn parse_op_timeout(&self) -> Result<Option<Duration>> {
        self.op_timeout.as_deref().map(|d| parse_duration("op_timeout", d)).transpose()
    }

    pub fn parse_sweep_timeout(&self) -> Result<Option<Duration>> {
        self.sweep_timeout.as_deref().map(|d| parse_duration("sweep_timeout", d)).transpose()
    }

    pub fn parse_cooldown(&self) -> Result<Option<Duration>> {
        self.cooldown.as_deref().map(|d| parse_duration("cooldown", d)).transpose()
    }

    /// Checks every parameter before anything touches the backend.
    pub fn validate(&self) -> Result<(), BenchError> {
        let invalid = |msg: String| Err(BenchError::InvalidConfig(msg));

        if self.rounds == 0 {
            return invalid("rounds must be at least 1".into());
        }
        if !self.contention_factor.is_finite() || self.contention_factor < 0.0 {
            return invalid(format!("contention_factor must be >= 0, got {}", self.contention_factor));
        }
        if !self.sequential_threshold.is_finite() || self.sequential_threshold < 1.0 {
            return invalid(format!(
                "sequential_threshold must be >= 1, got {}",
                self.sequential_threshold
            ));
        }
        if let Some(rate) = self.load.rates.iter().find(|r| !r.is_finite() || **r < 1.0) {
            return invalid(format!("load.rates entries must be >= 1, got {rate}"));
        }
        if self.load.requests_per_rate == 0 {
            return invalid("load.requests_per_rate must be at least 1".into());
        }
        if self.load.batch_sizes.contains(&0) {
            return invalid("load.batch_sizes entries must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.simulator.failure_rate) {
            return invalid(format!(
                "simulator.failure_rate must be within [0, 1], got {}",
                self.simulator.failure_rate
            ));
        }
        for (name, value) in [
            ("op_timeout", self.parse_op_timeout().map(|_| ())),
            ("sweep_timeout", self.parse_sweep_timeout().map(|_| ())),
            ("cooldown", self.parse_cooldown().map(|_| ())),
            ("simulator.base_latency", self.simulator.parse_base_latency().map(|_| ())),
            ("simulator.jitter", self.simulator.parse_jitter().map(|_| ())),
        ] {
            if let Err(e) = value {
                return invalid(format!("{name}: {e:#}"));
            }
        }
        for dimension in &self.dimensions {
            if dimension.fields.is_empty() {
                return invalid(format!("dimension '{}' has no fields", dimension.name));
            }
        }
        Ok(())
    }

    /// Load generator configured from this file.
    pub fn rate_controller(&self) -> Result<RateController> {
        Ok(RateController::new()
            .with_sequential_threshold(self.sequential_threshold)
            .with_contention_factor(self.contention_factor)
            .with_executor(self.executor()?))
    }

    /// Executor bounded by `op_timeout`, used per call and for single-call tests.
    pub fn executor(&self) -> Result<TimedExecutor> {
        Ok(TimedExecutor::with_timeout(self.parse_op_timeout()?))
    }

    /// Executor bounded by `sweep_timeout`, used for whole sweep tests.
    pub fn sweep_executor(&self) -> Result<TimedExecutor> {
        Ok(TimedExecutor::with_timeout(self.parse_sweep_timeout()?))
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .with_context(|| format!("invalid {name} format: {value}"))
}

/// Tables exported for the built-in suite.
pub fn default_dimensions() -> Vec<DimensionSpec> {
    vec![
        DimensionSpec {
            name: "responsiveness".into(),
            category: suites::RESPONSIVENESS.into(),
            key_field: "rate".into(),
            key_label: Some("Rate".into()),
            fields: vec![
                FieldSpec::new("avgLatencyMs", "Latency", "ms"),
                FieldSpec::new("p95LatencyMs", "P95Latency", "ms"),
                FieldSpec::new("throughputTps", "Throughput", "tps"),
                FieldSpec::new("successRate", "SuccessRate", "%"),
            ],
        },
        DimensionSpec {
            name: "concurrency".into(),
            category: suites::CONCURRENCY.into(),
            key_field: "batchSize".into(),
            key_label: Some("ConcurrentTxs".into()),
            fields: vec![
                FieldSpec::new("totalTimeMs", "TotalTime", "ms"),
                FieldSpec::new("avgLatencyMs", "Latency", "ms"),
                FieldSpec::new("throughputTps", "Throughput", "tps"),
            ],
        },
        DimensionSpec {
            name: "storage".into(),
            category: suites::STORAGE.into(),
            key_field: "dataSizeKb".into(),
            key_label: Some("SizeKB".into()),
            fields: vec![
                FieldSpec::new("durationMs", "Latency", "ms"),
                FieldSpec::new("resourceCost", "Gas", "gas"),
            ],
        },
    ]
}
