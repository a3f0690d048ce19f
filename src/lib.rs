//! Turf backtest: leakage-free evaluation of horse racing win models.
//!
//! This library provides:
//! - Chronological train/test splitting with a train-only feature scaler
//! - Flat, Kelly, value and confidence staking strategies
//! - Race-by-race betting simulation with a running bankroll ledger
//! - Performance metrics, strategy comparison and segment analysis
//!
//! # Example
//!
//! ```no_run
//! use turf_backtest::{load_dataset, AppConfig, Backtester, Calibrator, ChronologicalSplitter};
//! use turf_backtest::model::load_classifier;
//!
//! # fn main() -> turf_backtest::Result<()> {
//! let config = AppConfig::load()?;
//! let classifier = load_classifier(&config.model.path)?;
//! let dataset = load_dataset("data/features.parquet", classifier.feature_names())?;
//! let split = ChronologicalSplitter::new(config.split.train_ratio, config.split.missing_features)?
//!     .split(dataset)?;
//!
//! let backtester = Backtester::from_config(&config, Calibrator::None)?;
//! let strategies = config.strategies.build(config.backtest.initial_bankroll)?;
//! let report = backtester.run(classifier.as_ref(), &split, strategies)?;
//! println!("Best: {:?}", report.comparison.best());
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod backtest;
pub mod calibration;
pub mod config;
pub mod dataset;
pub mod error;
pub mod metrics;
pub mod model;
pub mod report;
pub mod simulator;
pub mod split;
pub mod strategy;
pub mod types;

// Re-export commonly used types
pub use backtest::{BacktestReport, Backtester, StrategyRun};
pub use calibration::Calibrator;
pub use config::AppConfig;
pub use dataset::{load_dataset, Dataset};
pub use error::{BacktestError, Result};
pub use metrics::{PerformanceAnalyzer, PerformanceMetrics, ProfitFactor, StrategyComparison};
pub use model::{LogisticClassifier, SharedClassifier, WinClassifier};
pub use simulator::{BetRecord, Ledger, Simulator};
pub use split::{ChronologicalSplitter, DatasetSplit, FeatureScaler, MissingFeaturePolicy};
pub use strategy::{StakingPolicy, StakingStrategy, StrategyKind};
pub use types::{HistoricalRunner, Outcome};
