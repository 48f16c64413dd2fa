use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    aggregate::{AggregateDocument, Aggregator, RoundSource},
    artifacts,
    cli::{AggregateArgs, RunArgs},
    config::BenchConfig,
    error::BenchError,
    export,
    report,
    round::RoundResult,
    scenario::{ScenarioRunner, TestEvent},
    sim::Deployment,
    suites::build_suite,
};

/// Exit status for a failed command: 2 when the backend could not be set up, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    let setup = err
        .chain()
        .any(|cause| cause.downcast_ref::<BenchError>().is_some_and(BenchError::is_setup));
    if setup { 2 } else { 1 }
}

fn load_config(path: Option<&Path>) -> Result<BenchConfig> {
    match path {
        Some(path) => BenchConfig::load(path),
        None => Ok(BenchConfig::default()),
    }
}

/// Runs the built-in scenario for every configured round and aggregates the results.
pub async fn run_bench(config_path: Option<&Path>, args: &RunArgs) -> Result<()> {
    info!("Starting ratebench");

    let mut config = load_config(config_path)?;
    args.apply(&mut config);
    config.validate()?;

    let simulator = config.simulator.clone();
    run_rounds(&config, args, |_| Deployment::deploy(&simulator)).await
}

/// Runs every round against a backend from `deploy`, which is called once per round.
async fn run_rounds<F>(config: &BenchConfig, args: &RunArgs, mut deploy: F) -> Result<()>
where
    F: FnMut(u32) -> Result<Deployment, BenchError>,
{
    let load = config.rate_controller()?;
    let executor = config.executor()?;
    let sweep_executor = config.sweep_executor()?;
    let cooldown = config.parse_cooldown()?;
    let suite = build_suite(config);

    info!(
        rounds = config.rounds,
        output_dir = %config.output_dir.display(),
        tests = suite.test_count(config.filter.as_deref()),
        contention_factor = config.contention_factor,
        sequential_threshold = config.sequential_threshold,
        "Configuration loaded"
    );

    let (event_tx, event_rx) = mpsc::channel(256);
    let printer = tokio::spawn(print_events(event_rx));

    let mut completed: Vec<RoundResult> = Vec::new();
    let mut setup_failure = None;
    for round in 1..=config.rounds {
        let deployment = match deploy(round) {
            Ok(deployment) => deployment,
            Err(e) => {
                error!(round, error = %e, "Backend setup failed");
                setup_failure = Some((round, e));
                break;
            }
        };

        let result = ScenarioRunner::new(&deployment)
            .with_load(load)
            .with_executor(executor)
            .with_sweep_executor(sweep_executor)
            .with_cooldown(cooldown)
            .with_filter(config.filter.clone())
            .with_events(event_tx.clone())
            .run_round(&suite, round)
            .await;

        if let Err(e) = artifacts::write_round(&config.output_dir, &result) {
            warn!(round, error = %e, "Failed to persist round; will retry at run end");
        }
        completed.push(result);
    }

    drop(event_tx);
    let _ = printer.await;

    for round in &completed {
        println!("{}", report::round_table(round));
    }

    if let Some((round, e)) = setup_failure {
        let flushed = artifacts::flush_rounds(&config.output_dir, &completed);
        if !completed.is_empty()
            && !args.no_aggregate
            && let Err(agg) = aggregate_rounds(config, &completed)
        {
            let reason = format!("{agg:#}");
            warn!(error = %reason, "Partial aggregate failed");
        }
        info!(completed = completed.len(), flushed, "Flushed completed rounds after setup failure");
        return Err(e).with_context(|| format!("round {round}: backend setup failed"));
    }

    let flushed = artifacts::flush_rounds(&config.output_dir, &completed);
    if flushed > 0 {
        info!(flushed, "Persisted rounds that failed to write earlier");
    }

    if !args.no_aggregate {
        aggregate_rounds(config, &completed)?;
    }
    info!("Run complete");
    Ok(())
}

fn aggregate_rounds(config: &BenchConfig, rounds: &[RoundResult]) -> Result<AggregateDocument> {
    let sources = rounds
        .iter()
        .map(|r| {
            let label = artifacts::round_path(&config.output_dir, r.round).display().to_string();
            RoundSource::loaded(label, r.clone())
        })
        .collect::<Vec<_>>();
    export_aggregate(&config.output_dir, config, sources)
}

fn export_aggregate(
    output_dir: &Path,
    config: &BenchConfig,
    sources: Vec<RoundSource>,
) -> Result<AggregateDocument> {
    let doc = Aggregator::new(config.dimensions.clone())
        .aggregate(sources)
        .context("failed to aggregate rounds")?;
    let written = export::write_exports(output_dir, &doc).context("failed to write exports")?;
    println!("{}", report::aggregate_table(&doc));
    for path in written {
        info!(path = %path.display(), "Export written");
    }
    Ok(doc)
}

/// Merges rounds already on disk.
pub fn run_aggregate(config_path: Option<&Path>, args: &AggregateArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let output_dir = args.output_dir.clone().unwrap_or_else(|| config.output_dir.clone());

    let paths: Vec<PathBuf> = if args.files.is_empty() {
        artifacts::discover_rounds(&output_dir)
            .with_context(|| format!("failed to list rounds in {}", output_dir.display()))?
    } else {
        args.files.clone()
    };
    info!(sources = paths.len(), dir = %output_dir.display(), "Aggregating rounds");

    let sources = artifacts::load_sources(&paths);
    export_aggregate(&output_dir, &config, sources)?;
    Ok(())
}

async fn print_events(mut rx: mpsc::Receiver<TestEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TestEvent::TestStarted { .. } => {}
            TestEvent::TestPassed { category, name, duration } => {
                println!("  PASS {category}/{name} ({:.1}ms)", duration.as_secs_f64() * 1000.0);
            }
            TestEvent::TestFailed { category, name, duration, error } => {
                println!("  FAIL {category}/{name} ({:.1}ms): {error}", duration.as_secs_f64() * 1000.0);
            }
            TestEvent::TestSkipped { category, name, reason } => {
                println!("  SKIP {category}/{name}: {reason}");
            }
            TestEvent::TimeAdvanced { category, by } => {
                println!("  ---- {category}: ledger time +{}", humantime::format_duration(by));
            }
            TestEvent::RoundComplete { round, passed, failed, skipped } => {
                println!("Round {round}: {passed} passed, {failed} failed, {skipped} skipped");
            }
        }
    }
}
