use std::process::ExitCode;

use clap::Parser;
use ratebench::{Cli, Commands, exit_code, run_aggregate, run_bench};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.config.as_deref();
    let result = match &cli.command {
        Commands::Run(args) => run_bench(config, args).await,
        Commands::Aggregate(args) => run_aggregate(config, args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let reason = format!("{err:#}");
            error!(error = %reason, "ratebench failed");
            ExitCode::from(exit_code(&err))
        }
    }
}
