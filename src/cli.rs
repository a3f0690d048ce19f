//! CLI commands for turf-backtest.
//!
//! `backtest` runs the full pipeline, `analyze` re-reads an exported ledger,
//! `split` inspects the chronological split and exports the fitted scaler.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use turf_backtest::analysis::analyze_segments;
use turf_backtest::model::load_classifier;
use turf_backtest::report::{
    print_comparison_table, print_metrics_table, print_segment_report, print_split_summary,
    read_ledger_csv, write_backtest_outputs,
};
use turf_backtest::{
    load_dataset, AppConfig, Backtester, Calibrator, ChronologicalSplitter, PerformanceAnalyzer,
    StrategyKind,
};

#[derive(Parser)]
#[command(name = "turf-backtest")]
#[command(version, about = "Chronological backtesting of horse racing win models", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to backtest.toml/json/yaml if present)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split, score and simulate staking strategies over the test segment
    Backtest(BacktestArgs),

    /// Print metrics and segment analysis for an exported ledger CSV
    Analyze {
        /// Ledger CSV written by `backtest`
        #[arg(value_name = "LEDGER_CSV")]
        ledger: PathBuf,

        /// Initial bankroll, used when the ledger has no running columns
        #[arg(short, long)]
        bankroll: Option<f64>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show the chronological split and optionally export the fitted scaler
    Split {
        /// Feature/outcome CSV or Parquet file
        #[arg(value_name = "DATA")]
        data: Option<PathBuf>,

        /// Fraction of runners used for training
        #[arg(short, long)]
        train_ratio: Option<f64>,

        /// Write the scaler parameters as JSON
        #[arg(short, long, value_name = "FILE")]
        scaler_out: Option<PathBuf>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[derive(Args)]
pub struct BacktestArgs {
    /// Feature/outcome CSV or Parquet file
    #[arg(value_name = "DATA")]
    pub data: Option<PathBuf>,

    /// Classifier file (.json logistic or .onnx)
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Calibration config JSON file
    #[arg(long)]
    pub calibration: Option<PathBuf>,

    /// Strategies to simulate (flat, kelly, value, confidence, all); defaults to strategies.enabled
    #[arg(short, long, value_delimiter = ',')]
    pub strategies: Option<Vec<String>>,

    /// Fraction of runners used for training
    #[arg(short, long)]
    pub train_ratio: Option<f64>,

    /// Exclusive lower odds bound
    #[arg(long)]
    pub min_odds: Option<f64>,

    /// Inclusive upper odds bound
    #[arg(long)]
    pub max_odds: Option<f64>,

    /// Initial bankroll for every strategy
    #[arg(short, long)]
    pub bankroll: Option<f64>,

    /// Directory for ledger, metrics and comparison CSVs
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Skip writing CSV files
    #[arg(long)]
    pub no_export: bool,

    /// Output format (json, table)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Simulate strategies in parallel
    #[arg(long)]
    pub parallel: bool,
}

fn load_config(config_file: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load_from(config_file.as_deref())?;
    Ok(config)
}

fn parse_strategies(names: &[String]) -> anyhow::Result<Vec<StrategyKind>> {
    if names.iter().any(|n| n.eq_ignore_ascii_case("all")) {
        return Ok(StrategyKind::ALL.to_vec());
    }
    let mut kinds = Vec::new();
    for name in names {
        let kind: StrategyKind = name.parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn data_path(cli_path: Option<PathBuf>, config: &AppConfig) -> anyhow::Result<PathBuf> {
    cli_path
        .or_else(|| config.data.path.as_ref().map(PathBuf::from))
        .context("no feature data given: pass DATA or set data.path")
}

fn load_calibrator(cli_path: Option<&Path>, config: &AppConfig) -> anyhow::Result<Calibrator> {
    if let Some(path) = cli_path {
        info!("Loading calibrator from: {}", path.display());
        let calibrator = Calibrator::from_file(path)
            .with_context(|| format!("failed to load calibrator {}", path.display()))?;
        return Ok(calibrator);
    }

    if !config.calibration.enabled {
        return Ok(Calibrator::None);
    }

    match config.calibration.config_file {
        Some(ref path) => match Calibrator::from_file(path) {
            Ok(cal) => {
                info!("Calibrator loaded: {:?}", cal);
                Ok(cal)
            }
            Err(e) => {
                warn!("Failed to load calibrator: {}, using None", e);
                Ok(Calibrator::None)
            }
        },
        None => {
            warn!("Calibration enabled but no config_file specified");
            Ok(Calibrator::None)
        }
    }
}

/// Override loaded config values with the flags that were given.
fn apply_overrides(config: &mut AppConfig, args: &BacktestArgs) -> anyhow::Result<()> {
    if let Some(path) = &args.model {
        config.model.path = path.to_string_lossy().to_string();
    }
    if let Some(ratio) = args.train_ratio {
        config.split.train_ratio = ratio;
    }
    if let Some(min_odds) = args.min_odds {
        config.simulator.min_odds = min_odds;
    }
    if let Some(max_odds) = args.max_odds {
        config.simulator.max_odds = max_odds;
    }
    if let Some(bankroll) = args.bankroll {
        config.backtest.initial_bankroll = bankroll;
    }
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.to_string_lossy().to_string();
    }
    if args.parallel {
        config.backtest.parallel = true;
    }
    if let Some(names) = &args.strategies {
        config.strategies.enabled = parse_strategies(names)?;
    }
    Ok(())
}

/// Run the full backtest pipeline.
pub fn run_backtest(config_file: Option<PathBuf>, args: BacktestArgs) -> anyhow::Result<()> {
    let mut config = load_config(config_file)?;
    apply_overrides(&mut config, &args)?;
    config.validate()?;

    let data = data_path(args.data, &config)?;

    info!("Loading model from: {}", config.model.path);
    let classifier = load_classifier(&config.model.path)?;

    let dataset = load_dataset(&data, classifier.feature_names())?;
    let split = ChronologicalSplitter::new(config.split.train_ratio, config.split.missing_features)?
        .split(dataset)?;

    let calibrator = load_calibrator(args.calibration.as_deref(), &config)?;
    let strategies = config.strategies.build(config.backtest.initial_bankroll)?;

    let backtester = Backtester::from_config(&config, calibrator)?;
    let report = backtester.run(classifier.as_ref(), &split, strategies)?;

    if !args.no_export {
        let written = write_backtest_outputs(&report, Path::new(&config.output.dir))?;
        for path in &written {
            info!("Saved {}", path.display());
        }
    }

    match args.format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "table" => {
            print_split_summary(&report.split);
            for run in &report.runs {
                print_metrics_table(&run.strategy_name, &run.metrics);
            }
            print_comparison_table(&report.comparison);
        }
        other => {
            warn!("Unknown format: {}. Using JSON.", other);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Analyze an exported ledger.
pub fn run_analyze(
    config_file: Option<PathBuf>,
    ledger_path: PathBuf,
    bankroll: Option<f64>,
    format: String,
) -> anyhow::Result<()> {
    let config = load_config(config_file)?;
    let fallback = bankroll.unwrap_or(config.backtest.initial_bankroll);

    let ledger = read_ledger_csv(&ledger_path, fallback)
        .with_context(|| format!("failed to read ledger {}", ledger_path.display()))?;

    let analyzer = PerformanceAnalyzer::new(config.backtest.sharpe_annualization)?;
    let metrics = analyzer.analyze(&ledger);
    let segments = analyze_segments(ledger.bets());

    match format.as_str() {
        "json" => {
            let output = serde_json::json!({
                "ledger": ledger_path.display().to_string(),
                "metrics": metrics,
                "segments": segments,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            print_metrics_table(&ledger.strategy_name, &metrics);
            print_segment_report(&segments);
        }
    }

    Ok(())
}

/// Split the data chronologically and report on it.
pub fn run_split(
    config_file: Option<PathBuf>,
    data: Option<PathBuf>,
    train_ratio: Option<f64>,
    scaler_out: Option<PathBuf>,
    format: String,
) -> anyhow::Result<()> {
    let mut config = load_config(config_file)?;
    if let Some(ratio) = train_ratio {
        config.split.train_ratio = ratio;
    }
    config.validate()?;

    let data = data_path(data, &config)?;
    let dataset = load_dataset(&data, None)?;
    let split = ChronologicalSplitter::new(config.split.train_ratio, config.split.missing_features)?
        .split(dataset)?;

    if let Some(path) = &scaler_out {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(split.scaler())?)?;
        info!("Saved scaler to {}", path.display());
    }

    match format.as_str() {
        "json" => {
            let output = serde_json::json!({
                "summary": split.summary(),
                "feature_names": split.feature_names(),
                "zero_variance_features": split.scaler().constant_features(),
                "scaler": split.scaler(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            print_split_summary(split.summary());
            println!("Features ({}):", split.feature_names().len());
            for name in split.feature_names() {
                println!("  {}", name);
            }
            let constant = split.scaler().constant_features();
            if !constant.is_empty() {
                println!();
                println!("Zero-variance features: {}", constant.join(", "));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strategies() {
        let all = parse_strategies(&["all".to_string()]).unwrap();
        assert_eq!(all.len(), 4);

        let some = parse_strategies(&["kelly".to_string(), "flat".to_string(), "kelly".to_string()])
            .unwrap();
        assert_eq!(some, vec![StrategyKind::Kelly, StrategyKind::Flat]);

        assert!(parse_strategies(&["martingale".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_backtest_args() {
        let cli = Cli::try_parse_from([
            "turf-backtest",
            "backtest",
            "data/features.csv",
            "--model",
            "models/win.json",
            "--strategies",
            "flat,value",
            "--train-ratio",
            "0.7",
            "--parallel",
        ])
        .unwrap();

        match cli.command {
            Commands::Backtest(args) => {
                assert_eq!(
                    args.strategies,
                    Some(vec!["flat".to_string(), "value".to_string()])
                );
                assert_eq!(args.train_ratio, Some(0.7));
                assert!(args.parallel);
                assert_eq!(args.format, "table");
            }
            _ => panic!("Expected Backtest command"),
        }
    }

    fn backtest_args(argv: &[&str]) -> BacktestArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Backtest(args) => args,
            _ => panic!("Expected Backtest command"),
        }
    }

    #[test]
    fn test_configured_strategies_kept_without_flag() {
        let mut config = AppConfig::default();
        config.strategies.enabled = vec![StrategyKind::Flat];

        let args = backtest_args(&["turf-backtest", "backtest", "data/features.csv"]);
        assert!(args.strategies.is_none());
        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.strategies.enabled, vec![StrategyKind::Flat]);
    }

    #[test]
    fn test_strategies_flag_overrides_config() {
        let mut config = AppConfig::default();
        config.strategies.enabled = vec![StrategyKind::Flat];

        let args = backtest_args(&[
            "turf-backtest",
            "backtest",
            "--strategies",
            "kelly,value",
            "--bankroll",
            "500",
        ]);
        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(
            config.strategies.enabled,
            vec![StrategyKind::Kelly, StrategyKind::Value]
        );
        assert_eq!(config.backtest.initial_bankroll, 500.0);
    }
}
