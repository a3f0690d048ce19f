//! Configuration for the backtesting engine.
//!
//! Values are layered: built-in defaults, then an optional `backtest.toml`
//! (or `.json`/`.yaml`) file, then `TURF_` environment variables such as
//! `TURF_SPLIT__TRAIN_RATIO=0.75`. CLI flags override the result.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{validate_positive, BacktestError, Result};
use crate::split::MissingFeaturePolicy;
use crate::strategy::{StakingPolicy, StakingStrategy, StrategyKind, CONFIDENCE_CEILING};

/// Feature/outcome source location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    /// CSV or Parquet feature table
    #[serde(default)]
    pub path: Option<String>,
}

/// Classifier artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub path: String,
}

fn default_model_path() -> String {
    "models/win_classifier.json".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
        }
    }
}

/// Calibration configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Whether calibration is enabled
    #[serde(default)]
    pub enabled: bool,
    /// Path to calibration JSON config file
    #[serde(default)]
    pub config_file: Option<String>,
}

/// Chronological split configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    #[serde(default = "default_train_ratio")]
    pub train_ratio: f64,
    #[serde(default)]
    pub missing_features: MissingFeaturePolicy,
}

fn default_train_ratio() -> f64 {
    0.8
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_ratio: default_train_ratio(),
            missing_features: MissingFeaturePolicy::default(),
        }
    }
}

/// Race-level simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Odds at or below this are not bet (exclusive lower bound)
    #[serde(default = "default_min_odds")]
    pub min_odds: f64,
    /// Odds above this are not bet (inclusive upper bound)
    #[serde(default = "default_max_odds")]
    pub max_odds: f64,
    /// Stake unit that `win_payoff` is quoted against
    #[serde(default = "default_payoff_unit")]
    pub payoff_unit: f64,
}

fn default_min_odds() -> f64 {
    1.0
}

fn default_max_odds() -> f64 {
    50.0
}

fn default_payoff_unit() -> f64 {
    2.0
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            min_odds: default_min_odds(),
            max_odds: default_max_odds(),
            payoff_unit: default_payoff_unit(),
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.min_odds.is_finite() || self.min_odds < 0.0 {
            return Err(BacktestError::config(format!(
                "min_odds must be non-negative, got {}",
                self.min_odds
            )));
        }
        if !(self.min_odds < self.max_odds) {
            return Err(BacktestError::config(format!(
                "min_odds ({}) must be below max_odds ({})",
                self.min_odds, self.max_odds
            )));
        }
        validate_positive("payoff_unit", self.payoff_unit)
    }
}

/// Run-level backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_initial_bankroll")]
    pub initial_bankroll: f64,
    /// Bets-per-year factor used to annualize the Sharpe ratio
    #[serde(default = "default_sharpe_annualization")]
    pub sharpe_annualization: f64,
    /// Simulate strategies on separate threads
    #[serde(default)]
    pub parallel: bool,
}

fn default_initial_bankroll() -> f64 {
    1000.0
}

fn default_sharpe_annualization() -> f64 {
    // ~252 racing days with ~10 bets a day
    252.0 * 10.0
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_bankroll: default_initial_bankroll(),
            sharpe_annualization: default_sharpe_annualization(),
            parallel: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatConfig {
    #[serde(default = "default_unit_bet")]
    pub bet_amount: f64,
}

fn default_unit_bet() -> f64 {
    2.0
}

impl Default for FlatConfig {
    fn default() -> Self {
        Self {
            bet_amount: default_unit_bet(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyConfig {
    /// Fraction of full Kelly to stake (0.25 = quarter Kelly)
    #[serde(default = "default_kelly_fraction")]
    pub fraction: f64,
    #[serde(default = "default_unit_bet")]
    pub min_bet: f64,
    #[serde(default = "default_max_bet_fraction")]
    pub max_bet_fraction: f64,
    /// Absolute dollar ceiling on any single Kelly stake
    #[serde(default = "default_max_bet_absolute")]
    pub max_bet_absolute: f64,
}

fn default_kelly_fraction() -> f64 {
    0.25
}

fn default_max_bet_fraction() -> f64 {
    0.10
}

fn default_max_bet_absolute() -> f64 {
    50.0
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            fraction: default_kelly_fraction(),
            min_bet: default_unit_bet(),
            max_bet_fraction: default_max_bet_fraction(),
            max_bet_absolute: default_max_bet_absolute(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueConfig {
    #[serde(default = "default_min_edge")]
    pub min_edge: f64,
    #[serde(default = "default_unit_bet")]
    pub bet_amount: f64,
}

fn default_min_edge() -> f64 {
    0.05
}

impl Default for ValueConfig {
    fn default() -> Self {
        Self {
            min_edge: default_min_edge(),
            bet_amount: default_unit_bet(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    #[serde(default = "default_min_probability")]
    pub min_probability: f64,
    #[serde(default = "default_unit_bet")]
    pub base_bet: f64,
    #[serde(default = "default_confidence_max_bet")]
    pub max_bet: f64,
}

fn default_min_probability() -> f64 {
    0.30
}

fn default_confidence_max_bet() -> f64 {
    20.0
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            min_probability: default_min_probability(),
            base_bet: default_unit_bet(),
            max_bet: default_confidence_max_bet(),
        }
    }
}

/// Staking strategy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategiesConfig {
    /// Strategies simulated by a backtest run, in report order
    #[serde(default = "default_enabled_strategies")]
    pub enabled: Vec<StrategyKind>,
    #[serde(default)]
    pub flat: FlatConfig,
    #[serde(default)]
    pub kelly: KellyConfig,
    #[serde(default)]
    pub value: ValueConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
}

fn default_enabled_strategies() -> Vec<StrategyKind> {
    StrategyKind::ALL.to_vec()
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_strategies(),
            flat: FlatConfig::default(),
            kelly: KellyConfig::default(),
            value: ValueConfig::default(),
            confidence: ConfidenceConfig::default(),
        }
    }
}

impl StrategiesConfig {
    /// Staking policy for one strategy kind.
    pub fn policy(&self, kind: StrategyKind) -> StakingPolicy {
        match kind {
            StrategyKind::Flat => StakingPolicy::Flat {
                bet_amount: self.flat.bet_amount,
            },
            StrategyKind::Kelly => StakingPolicy::Kelly {
                fraction: self.kelly.fraction,
                min_bet: self.kelly.min_bet,
                max_bet_fraction: self.kelly.max_bet_fraction,
                max_bet_absolute: self.kelly.max_bet_absolute,
            },
            StrategyKind::Value => StakingPolicy::Value {
                min_edge: self.value.min_edge,
                bet_amount: self.value.bet_amount,
            },
            StrategyKind::Confidence => StakingPolicy::Confidence {
                min_probability: self.confidence.min_probability,
                base_bet: self.confidence.base_bet,
                max_bet: self.confidence.max_bet,
            },
        }
    }

    /// Build fresh strategy instances for the enabled kinds.
    pub fn build(&self, initial_bankroll: f64) -> Result<Vec<StakingStrategy>> {
        if self.enabled.is_empty() {
            return Err(BacktestError::config("no strategies enabled"));
        }
        self.enabled
            .iter()
            .map(|&kind| StakingStrategy::new(kind.display_name(), self.policy(kind), initial_bankroll))
            .collect()
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for ledger, metrics and comparison CSV files
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

fn default_output_dir() -> String {
    "data/backtesting".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl AppConfig {
    /// Load configuration from `backtest.*` in the working directory and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, reading `file` instead of the default `backtest.*` when given
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("backtest").required(false),
        };

        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default()).map_err(config_error)?)
            .add_source(file_source)
            // Override with environment variables (TURF_BACKTEST__INITIAL_BANKROLL, etc.)
            .add_source(
                config::Environment::with_prefix("TURF")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        let app: AppConfig = config.try_deserialize().map_err(config_error)?;
        app.validate()?;
        Ok(app)
    }

    /// Check every section before any simulation work begins.
    pub fn validate(&self) -> Result<()> {
        if !(self.split.train_ratio > 0.0 && self.split.train_ratio < 1.0) {
            return Err(BacktestError::config(format!(
                "split.train_ratio must be in (0, 1), got {}",
                self.split.train_ratio
            )));
        }

        self.simulator.validate()?;
        validate_positive("backtest.initial_bankroll", self.backtest.initial_bankroll)?;
        validate_positive(
            "backtest.sharpe_annualization",
            self.backtest.sharpe_annualization,
        )?;

        if self.strategies.confidence.min_probability >= CONFIDENCE_CEILING {
            return Err(BacktestError::config(format!(
                "strategies.confidence.min_probability must be below {}",
                CONFIDENCE_CEILING
            )));
        }

        for kind in StrategyKind::ALL {
            self.strategies.policy(kind).validate()?;
        }

        Ok(())
    }
}

fn config_error(err: config::ConfigError) -> BacktestError {
    BacktestError::config(err.to_string())
}
