//! Post-hoc probability calibration.
//!
//! A calibrator is fitted offline and stored as JSON; the backtest applies it
//! to classifier output before any stake is sized.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{validate_probability, BacktestError, Result};

/// Temperature scaling: `sigmoid(logit(p) / temperature)`.
///
/// Temperatures above 1 pull probabilities toward 0.5, below 1 push them out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureScaling {
    pub temperature: f64,
}

impl Default for TemperatureScaling {
    fn default() -> Self {
        Self { temperature: 1.0 }
    }
}

impl TemperatureScaling {
    pub fn new(temperature: f64) -> Result<Self> {
        let scaling = Self { temperature };
        scaling.validate()?;
        Ok(scaling)
    }

    fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(BacktestError::model(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    pub fn calibrate(&self, prob: f64) -> f64 {
        let eps = 1e-10;
        let p = prob.clamp(eps, 1.0 - eps);
        let logit = (p / (1.0 - p)).ln();
        1.0 / (1.0 + (-logit / self.temperature).exp())
    }
}

/// Histogram binning: each probability maps to the observed win rate of its bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinningCalibration {
    /// Ascending edges, `bin_values.len() + 1` of them
    pub bin_edges: Vec<f64>,
    pub bin_values: Vec<f64>,
}

impl BinningCalibration {
    /// Equal-width bins over [0, 1] with the given per-bin values.
    pub fn from_values(bin_values: Vec<f64>) -> Result<Self> {
        let n_bins = bin_values.len();
        let bin_edges = (0..=n_bins).map(|i| i as f64 / n_bins as f64).collect();
        let binning = Self {
            bin_edges,
            bin_values,
        };
        binning.validate()?;
        Ok(binning)
    }

    fn validate(&self) -> Result<()> {
        if self.bin_values.is_empty() {
            return Err(BacktestError::model("binning calibration has no bins"));
        }
        if self.bin_edges.len() != self.bin_values.len() + 1 {
            return Err(BacktestError::model(format!(
                "{} bin edges for {} bins",
                self.bin_edges.len(),
                self.bin_values.len()
            )));
        }
        if self.bin_edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(BacktestError::model("bin edges must be strictly ascending"));
        }
        for (i, &value) in self.bin_values.iter().enumerate() {
            validate_probability(&format!("bin_values[{}]", i), value)?;
        }
        Ok(())
    }

    pub fn n_bins(&self) -> usize {
        self.bin_values.len()
    }

    fn find_bin(&self, prob: f64) -> usize {
        // Number of interior edges at or below prob; values past either end
        // fall into the first or last bin.
        let interior = &self.bin_edges[1..self.bin_edges.len() - 1];
        interior.partition_point(|&edge| edge <= prob)
    }

    pub fn calibrate(&self, prob: f64) -> f64 {
        self.bin_values[self.find_bin(prob)]
    }
}

/// Calibrator selected at runtime from a JSON file.
///
/// ```json
/// {"type": "temperature", "temperature": 1.15}
/// {"type": "binning", "bin_edges": [0.0, 0.5, 1.0], "bin_values": [0.1, 0.6]}
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Calibrator {
    Temperature(TemperatureScaling),
    Binning(BinningCalibration),
    #[default]
    None,
}

impl Calibrator {
    /// Calibrated probability, clamped to [0, 1]. Non-finite input passes
    /// through so the simulator can skip the row.
    pub fn calibrate(&self, prob: f64) -> f64 {
        if !prob.is_finite() {
            return prob;
        }
        let calibrated = match self {
            Calibrator::Temperature(t) => t.calibrate(prob),
            Calibrator::Binning(b) => b.calibrate(prob),
            Calibrator::None => prob,
        };
        calibrated.clamp(0.0, 1.0)
    }

    pub fn calibrate_vec(&self, probs: &[f64]) -> Vec<f64> {
        if !self.is_enabled() {
            return probs.to_vec();
        }
        probs.iter().map(|&p| self.calibrate(p)).collect()
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Calibrator::None)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let calibrator: Calibrator = serde_json::from_str(&content)?;
        match &calibrator {
            Calibrator::Temperature(t) => t.validate()?,
            Calibrator::Binning(b) => b.validate()?,
            Calibrator::None => {}
        }
        Ok(calibrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_scaling_identity() {
        let ts = TemperatureScaling::new(1.0).unwrap();
        assert!((ts.calibrate(0.5) - 0.5).abs() < 1e-9);
        assert!((ts.calibrate(0.2) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_temperature_scaling_direction() {
        let sharpen = TemperatureScaling::new(0.5).unwrap();
        assert!(sharpen.calibrate(0.7) > 0.7);

        let soften = TemperatureScaling::new(2.0).unwrap();
        assert!(soften.calibrate(0.9) < 0.9);
        assert!(soften.calibrate(0.1) > 0.1);
    }

    #[test]
    fn test_temperature_must_be_positive() {
        assert!(TemperatureScaling::new(0.0).is_err());
        assert!(TemperatureScaling::new(-1.0).is_err());
    }

    #[test]
    fn test_binning_lookup() {
        let bins = vec![0.02, 0.08, 0.15, 0.25, 0.4, 0.55, 0.65, 0.75, 0.85, 0.95];
        let bc = BinningCalibration::from_values(bins).unwrap();

        assert_eq!(bc.n_bins(), 10);
        assert!((bc.calibrate(0.05) - 0.02).abs() < 1e-12);
        assert!((bc.calibrate(0.1) - 0.08).abs() < 1e-12);
        assert!((bc.calibrate(0.95) - 0.95).abs() < 1e-12);
        assert!((bc.calibrate(1.0) - 0.95).abs() < 1e-12);
        assert!((bc.calibrate(-0.5) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_calibrator_none_passthrough() {
        let calibrator = Calibrator::default();
        assert!(!calibrator.is_enabled());
        assert_eq!(calibrator.calibrate_vec(&[0.1, 0.7]), vec![0.1, 0.7]);
    }

    #[test]
    fn test_calibrator_keeps_nan() {
        let calibrator = Calibrator::Temperature(TemperatureScaling::new(1.5).unwrap());
        assert!(calibrator.calibrate(f64::NAN).is_nan());
    }

    #[test]
    fn test_calibrator_json() {
        let json = r#"{"type": "temperature", "temperature": 1.5}"#;
        let calibrator: Calibrator = serde_json::from_str(json).unwrap();
        assert!(matches!(calibrator, Calibrator::Temperature(ref t) if (t.temperature - 1.5).abs() < 1e-12));

        let json = r#"{"type": "binning", "bin_edges": [0.0, 0.33, 0.66, 1.0], "bin_values": [0.1, 0.5, 0.9]}"#;
        let calibrator: Calibrator = serde_json::from_str(json).unwrap();
        assert!((calibrator.calibrate(0.5) - 0.5).abs() < 1e-12);

        let calibrator: Calibrator = serde_json::from_str(r#"{"type": "none"}"#).unwrap();
        assert!(!calibrator.is_enabled());
    }

    #[test]
    fn test_calibrator_file_roundtrip_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");

        let calibrator = Calibrator::Binning(BinningCalibration::from_values(vec![0.1, 0.6]).unwrap());
        std::fs::write(&path, serde_json::to_string(&calibrator).unwrap()).unwrap();
        let loaded = Calibrator::from_file(&path).unwrap();
        assert!((loaded.calibrate(0.75) - 0.6).abs() < 1e-12);

        std::fs::write(&path, r#"{"type": "binning", "bin_edges": [0.0, 1.0], "bin_values": [0.1, 0.6]}"#).unwrap();
        assert!(Calibrator::from_file(&path).is_err());
    }

    #[test]
    fn test_bin_values_must_be_probabilities() {
        let err = BinningCalibration::from_values(vec![0.1, 1.2]).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("bin_values[1]"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        std::fs::write(&path, r#"{"type": "binning", "bin_edges": [0.0, 0.5, 1.0], "bin_values": [-0.1, 0.6]}"#).unwrap();
        assert!(Calibrator::from_file(&path).is_err());
    }
}
