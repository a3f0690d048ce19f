//! Win classifiers: map a standardized feature matrix to per-runner win
//! probabilities.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::{BacktestError, Result};

/// A fitted binary win/lose classifier.
///
/// Called once per backtest with the whole test matrix. Implementations are
/// read-only after loading so strategies can share one instance across threads.
pub trait WinClassifier: Send + Sync {
    /// One probability per matrix row, in row order.
    fn predict_probabilities(&self, features: &Array2<f64>) -> Result<Vec<f64>>;

    /// Feature columns the classifier was trained on, in matrix order, if known.
    fn feature_names(&self) -> Option<&[String]>;

    fn name(&self) -> &str;
}

/// Thread-safe classifier handle.
pub type SharedClassifier = Arc<dyn WinClassifier>;

/// Logistic regression exported as JSON:
///
/// ```json
/// {"intercept": -2.1, "coefficients": [0.4, -0.2], "feature_names": ["a", "b"]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticClassifier {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
}

impl LogisticClassifier {
    pub fn new(intercept: f64, coefficients: Vec<f64>) -> Self {
        Self {
            intercept,
            coefficients,
            feature_names: None,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let model: LogisticClassifier = serde_json::from_str(&content)?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if self.coefficients.is_empty() {
            return Err(BacktestError::model("logistic model has no coefficients"));
        }
        if let Some(names) = &self.feature_names {
            if names.len() != self.coefficients.len() {
                return Err(BacktestError::model(format!(
                    "{} feature names for {} coefficients",
                    names.len(),
                    self.coefficients.len()
                )));
            }
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(BacktestError::model("logistic model has non-finite weights"));
        }
        Ok(())
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl WinClassifier for LogisticClassifier {
    fn predict_probabilities(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
        check_width(features, self.coefficients.len())?;
        let weights = Array1::from(self.coefficients.clone());
        let logits = features.dot(&weights);
        Ok(logits.iter().map(|z| sigmoid(z + self.intercept)).collect())
    }

    fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn name(&self) -> &str {
        "logistic"
    }
}

fn check_width(features: &Array2<f64>, expected: usize) -> Result<()> {
    if features.ncols() != expected {
        return Err(BacktestError::data(format!(
            "feature matrix has {} columns, classifier expects {}",
            features.ncols(),
            expected
        )));
    }
    Ok(())
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

#[cfg(feature = "onnx")]
mod onnx {
    use ndarray::Array2;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::path::Path;
    use std::sync::Mutex;

    use super::WinClassifier;
    use crate::error::{BacktestError, Result};

    /// Binary classifier exported to ONNX (e.g. LightGBM via onnxmltools).
    ///
    /// Output 1 holds class probabilities; column 1 is the win class.
    pub struct OnnxClassifier {
        session: Mutex<Session>,
        feature_names: Option<Vec<String>>,
    }

    fn ort_error(err: ort::Error) -> BacktestError {
        BacktestError::model(err.to_string())
    }

    impl OnnxClassifier {
        pub fn load<P: AsRef<Path>>(path: P, feature_names: Option<Vec<String>>) -> Result<Self> {
            let session = Session::builder()
                .map_err(ort_error)?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(ort_error)?
                .with_intra_threads(4)
                .map_err(ort_error)?
                .commit_from_file(path.as_ref())
                .map_err(|e| {
                    BacktestError::model(format!(
                        "failed to load ONNX model {}: {}",
                        path.as_ref().display(),
                        e
                    ))
                })?;

            Ok(Self {
                session: Mutex::new(session),
                feature_names,
            })
        }
    }

    impl WinClassifier for OnnxClassifier {
        fn predict_probabilities(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
            let n_rows = features.nrows();
            if let Some(names) = &self.feature_names {
                super::check_width(features, names.len())?;
            }

            let input_tensor = Tensor::from_array(features.mapv(|v| v as f32)).map_err(ort_error)?;

            let mut session = self
                .session
                .lock()
                .map_err(|e| BacktestError::model(format!("failed to lock session: {}", e)))?;

            let outputs = session.run(ort::inputs![input_tensor]).map_err(ort_error)?;
            if outputs.len() < 2 {
                return Err(BacktestError::model(
                    "expected label and probability outputs from model",
                ));
            }

            let (shape, probs) = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(ort_error)?;

            let dims: Vec<i64> = shape.iter().copied().collect();
            if dims.len() != 2 || dims[0] as usize != n_rows || dims[1] < 2 {
                return Err(BacktestError::model(format!(
                    "unexpected probability shape {:?}, expected [{}, 2]",
                    dims, n_rows
                )));
            }

            let n_cols = dims[1] as usize;
            Ok((0..n_rows).map(|i| probs[i * n_cols + 1] as f64).collect())
        }

        fn feature_names(&self) -> Option<&[String]> {
            self.feature_names.as_deref()
        }

        fn name(&self) -> &str {
            "onnx"
        }
    }
}

/// Load a classifier, choosing the format from the file extension.
///
/// `.json` is a [`LogisticClassifier`]; `.onnx` requires the `onnx` feature.
pub fn load_classifier<P: AsRef<Path>>(path: P) -> Result<SharedClassifier> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "json" => Ok(Arc::new(LogisticClassifier::from_file(path)?)),
        #[cfg(feature = "onnx")]
        "onnx" => Ok(Arc::new(OnnxClassifier::load(path, None)?)),
        #[cfg(not(feature = "onnx"))]
        "onnx" => Err(BacktestError::model(
            "ONNX models require building with the `onnx` feature",
        )),
        other => Err(BacktestError::model(format!(
            "unsupported model format '{}' for {}",
            other,
            path.display()
        ))),
    }
}
