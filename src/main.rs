//! Turf backtest CLI
//!
//! Chronological backtesting of win-probability models against staking strategies.

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays usable for JSON output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turf_backtest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_file = cli.config;

    match cli.command {
        Commands::Backtest(args) => cli::run_backtest(config_file, args),
        Commands::Analyze {
            ledger,
            bankroll,
            format,
        } => cli::run_analyze(config_file, ledger, bankroll, format),
        Commands::Split {
            data,
            train_ratio,
            scaler_out,
            format,
        } => cli::run_split(config_file, data, train_ratio, scaler_out, format),
    }
}
