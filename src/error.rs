//! Error types for the backtesting core.
//!
//! Configuration and data-shape problems are fatal and surface here. Per-row
//! anomalies are not errors: the simulator logs and skips them.

use thiserror::Error;

/// Backtest error taxonomy
#[derive(Error, Debug)]
pub enum BacktestError {
    /// Invalid train ratio, odds bounds or strategy parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Empty input, missing columns, unorderable race ids
    #[error("Data error: {0}")]
    Data(String),

    /// Classifier or calibrator could not be loaded or evaluated
    #[error("Model error: {0}")]
    Model(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BacktestError>;

impl BacktestError {
    pub fn config(msg: impl Into<String>) -> Self {
        BacktestError::Configuration(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        BacktestError::Data(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        BacktestError::Model(msg.into())
    }

    /// True for errors that indicate a caller mistake rather than bad input data.
    pub fn is_configuration(&self) -> bool {
        matches!(self, BacktestError::Configuration(_))
    }
}

/// Validate that a probability lies in [0, 1]
pub fn validate_probability(name: &str, prob: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&prob) {
        return Err(BacktestError::config(format!(
            "{} must be between 0 and 1, got {}",
            name, prob
        )));
    }
    Ok(())
}

/// Validate that an amount is finite and strictly positive
pub fn validate_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(BacktestError::config(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_probability_valid() {
        assert!(validate_probability("p", 0.0).is_ok());
        assert!(validate_probability("p", 0.5).is_ok());
        assert!(validate_probability("p", 1.0).is_ok());
    }

    #[test]
    fn test_validate_probability_invalid() {
        assert!(validate_probability("p", -0.1).is_err());
        assert!(validate_probability("p", 1.1).is_err());
        assert!(validate_probability("p", f64::NAN).is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive("bet_amount", 2.0).is_ok());
        assert!(validate_positive("bet_amount", 0.0).is_err());
        assert!(validate_positive("bet_amount", -5.0).is_err());
        assert!(validate_positive("bet_amount", f64::INFINITY).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = BacktestError::config("train_ratio must be in (0, 1)");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.is_configuration());

        let err = BacktestError::data("empty dataset");
        assert!(err.to_string().contains("Data error"));
        assert!(!err.is_configuration());
    }
}
