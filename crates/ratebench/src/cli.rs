use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::BenchConfig;

#[derive(Debug, Parser)]
#[command(name = "ratebench")]
#[command(about = "Rate-controlled benchmark runner with cross-round aggregation")]
pub struct Cli {
    /// YAML configuration file
    #[arg(short = 'c', long = "config", env = "RATEBENCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the built-in scenario for one or more rounds, then aggregate them
    Run(RunArgs),
    /// Merge previously written rounds into aggregate exports
    Aggregate(AggregateArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Number of independent rounds
    #[arg(short = 'r', long)]
    pub rounds: Option<u32>,

    /// Directory for round and aggregate artifacts
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Extra milliseconds per call per decade of request rate
    #[arg(long)]
    pub contention_factor: Option<f64>,

    /// Rates above this many ops/s are dispatched concurrently
    #[arg(long)]
    pub sequential_threshold: Option<f64>,

    /// Only run tests matching this substring or `*` glob
    #[arg(short = 'f', long)]
    pub filter: Option<String>,

    /// Fail backend calls and single-call tests that take longer than this (e.g. "30s")
    #[arg(long)]
    pub op_timeout: Option<String>,

    /// Fail a whole load sweep that takes longer than this (e.g. "10m")
    #[arg(long)]
    pub sweep_timeout: Option<String>,

    /// Pause between consecutive tests (e.g. "200ms")
    #[arg(long)]
    pub cooldown: Option<String>,

    /// Seed for simulated latency and failures
    #[arg(long)]
    pub seed: Option<u64>,

    /// Probability that a simulated mutating call reverts
    #[arg(long)]
    pub failure_rate: Option<f64>,

    /// Skip the aggregation step after the last round
    #[arg(long)]
    pub no_aggregate: bool,
}

impl RunArgs {
    /// Overrides file settings with the flags that were given.
    pub fn apply(&self, config: &mut BenchConfig) {
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(factor) = self.contention_factor {
            config.contention_factor = factor;
        }
        if let Some(threshold) = self.sequential_threshold {
            config.sequential_threshold = threshold;
        }
        if self.filter.is_some() {
            config.filter = self.filter.clone();
        }
        if self.op_timeout.is_some() {
            config.op_timeout = self.op_timeout.clone();
        }
        if self.sweep_timeout.is_some() {
            config.sweep_timeout = self.sweep_timeout.clone();
        }
        if self.cooldown.is_some() {
            config.cooldown = self.cooldown.clone();
        }
        if let Some(seed) = self.seed {
            config.simulator.seed = seed;
        }
        if let Some(rate) = self.failure_rate {
            config.simulator.failure_rate = rate;
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct AggregateArgs {
    /// Directory holding `round-<n>` folders; exports are written here too
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Explicit round files to merge instead of discovering them
    pub files: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::parse_from(["ratebench", "run"]);
        assert_eq!(cli.log_level, "info");
        assert!(cli.config.is_none());
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert!(args.rounds.is_none());
        assert!(!args.no_aggregate);
    }

    #[test]
    fn test_run_overrides_config() {
        let cli = Cli::parse_from([
            "ratebench",
            "run",
            "--config",
            "bench.yaml",
            "-r",
            "5",
            "-o",
            "out",
            "--contention-factor",
            "2.5",
            "--filter",
            "rate_*",
            "--seed",
            "9",
            "--sweep-timeout",
            "10m",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("bench.yaml")));
        assert_eq!(cli.log_level, "debug");
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };

        let mut config = BenchConfig::default();
        args.apply(&mut config);
        assert_eq!(config.rounds, 5);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.contention_factor, 2.5);
        assert_eq!(config.filter.as_deref(), Some("rate_*"));
        assert_eq!(config.simulator.seed, 9);
        assert_eq!(config.sweep_timeout.as_deref(), Some("10m"));
        assert!(config.op_timeout.is_none());
        assert_eq!(config.sequential_threshold, 100.0);
    }

    #[test]
    fn test_aggregate_files() {
        let cli = Cli::parse_from(["ratebench", "aggregate", "a/results.json", "b/results.json"]);
        let Commands::Aggregate(args) = cli.command else {
            panic!("expected aggregate command");
        };
        assert_eq!(args.files.len(), 2);
        assert!(args.output_dir.is_none());
    }
}
