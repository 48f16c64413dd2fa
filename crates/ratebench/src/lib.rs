//! Rate-controlled load generation and cross-round statistics.
//!
//! A [`scenario::ScenarioRunner`] executes categorised test cases against a
//! [`scenario::Backend`], timing each one through the [`executor`]. Tests may
//! drive sweeps with the [`rate::RateController`]. Each round becomes a
//! [`round::RoundResult`] written by [`artifacts`], and any number of rounds are
//! merged by the [`aggregate::Aggregator`] and written out by [`export`].

pub mod aggregate;
pub mod artifacts;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod export;
pub mod metrics;
pub mod outcome;
pub mod rate;
pub mod report;
pub mod round;
pub mod runner;
pub mod scenario;
pub mod sim;
pub mod suites;

pub use aggregate::{AggregateDocument, Aggregator, DimensionKey, DimensionSpec, FieldSpec, KeyedStat, RoundSource};
pub use cli::{AggregateArgs, Cli, Commands, RunArgs};
pub use config::BenchConfig;
pub use error::BenchError;
pub use executor::{TimedExecutor, measure};
pub use metrics::{CategoryMetrics, LatencyStats};
pub use outcome::{OperationOutput, Outcome, Payload, TestOutput};
pub use rate::{DispatchMode, LoadReport, RateController};
pub use round::{CategoryReport, RoundResult};
pub use runner::{exit_code, run_aggregate, run_bench};
pub use scenario::{Backend, ScenarioRunner, Step, TestCase, TestCategory, TestContext, TestEvent, TestSuite};
