//! Chronological train/test split with a train-only feature scaler.
//!
//! The backtest must see the same split the classifier was fitted on: rows
//! sorted by `race_id`, first `floor(N * train_ratio)` rows for training, the
//! remainder held out. Scaling parameters come from the training rows only and
//! are applied unchanged to the test rows.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::error::{BacktestError, Result};
use crate::types::{filter_resolved, HistoricalRunner};

/// Standard deviations at or below this are treated as zero variance.
pub const ZERO_STD_TOLERANCE: f64 = 1e-12;

/// How rows with missing feature values are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFeaturePolicy {
    /// Impute with per-feature medians taken from the training rows
    #[default]
    Median,
    /// Drop the row before splitting
    Skip,
}

/// Per-feature standardization fitted on training rows.
///
/// Missing values are imputed with the training median before centering.
/// Zero-variance features get a scale of 1.0, so they are centered but not
/// scaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub feature_names: Vec<String>,
    pub medians: Vec<f64>,
    pub means: Vec<f64>,
    /// Population standard deviations of the imputed training values
    pub stds: Vec<f64>,
    /// Divisors applied by `transform`; 1.0 where `stds` is zero
    pub scales: Vec<f64>,
}

impl FeatureScaler {
    /// Fit on training feature rows.
    pub fn fit(feature_names: &[String], rows: &[&[f64]]) -> Result<Self> {
        if rows.is_empty() {
            return Err(BacktestError::data("cannot fit scaler on an empty training set"));
        }

        let n_features = feature_names.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != n_features) {
            return Err(BacktestError::data(format!(
                "feature row has {} values, expected {}",
                bad.len(),
                n_features
            )));
        }

        let mut medians = Vec::with_capacity(n_features);
        let mut means = Vec::with_capacity(n_features);
        let mut stds = Vec::with_capacity(n_features);
        let mut scales = Vec::with_capacity(n_features);

        for j in 0..n_features {
            let mut observed: Vec<f64> = rows
                .iter()
                .map(|r| r[j])
                .filter(|v| v.is_finite())
                .collect();
            let median = median(&mut observed).unwrap_or(0.0);

            let n = rows.len() as f64;
            let column = rows.iter().map(|r| impute(r[j], median));
            let mean = column.clone().sum::<f64>() / n;
            let variance = column.map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();

            medians.push(median);
            means.push(mean);
            stds.push(std);
            scales.push(if std > ZERO_STD_TOLERANCE { std } else { 1.0 });
        }

        Ok(Self {
            feature_names: feature_names.to_vec(),
            medians,
            means,
            stds,
            scales,
        })
    }

    pub fn num_features(&self) -> usize {
        self.means.len()
    }

    /// Names of features with zero variance in the training rows.
    pub fn constant_features(&self) -> Vec<&str> {
        self.feature_names
            .iter()
            .zip(&self.stds)
            .filter(|(_, s)| **s <= ZERO_STD_TOLERANCE)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Impute and standardize one feature row.
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, &v)| (impute(v, self.medians[j]) - self.means[j]) / self.scales[j])
            .collect()
    }

    /// Transform a set of runners into a dense (n_runners, n_features) matrix.
    pub fn transform(&self, runners: &[HistoricalRunner]) -> Array2<f64> {
        let mut matrix = Array2::<f64>::zeros((runners.len(), self.num_features()));
        for (i, runner) in runners.iter().enumerate() {
            for (j, v) in self.transform_row(&runner.features).into_iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }
        matrix
    }
}

fn impute(value: f64, median: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        median
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Summary statistics of a split, for logging and reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSummary {
    pub train_ratio: f64,
    pub train_size: usize,
    pub test_size: usize,
    pub train_wins: usize,
    pub test_wins: usize,
    pub train_win_rate: f64,
    pub test_win_rate: f64,
    pub last_train_race: Option<i64>,
    pub first_test_race: Option<i64>,
    pub pending_dropped: usize,
    pub incomplete_dropped: usize,
}

/// Train/test partition produced once per backtest run.
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    train: Vec<HistoricalRunner>,
    test: Vec<HistoricalRunner>,
    scaler: FeatureScaler,
    train_features: Array2<f64>,
    test_features: Array2<f64>,
    summary: SplitSummary,
}

impl DatasetSplit {
    pub fn train(&self) -> &[HistoricalRunner] {
        &self.train
    }

    pub fn test(&self) -> &[HistoricalRunner] {
        &self.test
    }

    pub fn scaler(&self) -> &FeatureScaler {
        &self.scaler
    }

    /// Scaled training matrix
    pub fn train_features(&self) -> &Array2<f64> {
        &self.train_features
    }

    /// Scaled test matrix, transformed with training parameters
    pub fn test_features(&self) -> &Array2<f64> {
        &self.test_features
    }

    pub fn summary(&self) -> &SplitSummary {
        &self.summary
    }

    pub fn feature_names(&self) -> &[String] {
        &self.scaler.feature_names
    }
}

/// Time-ordered splitter.
#[derive(Debug, Clone)]
pub struct ChronologicalSplitter {
    train_ratio: f64,
    missing_features: MissingFeaturePolicy,
}

impl ChronologicalSplitter {
    pub fn new(train_ratio: f64, missing_features: MissingFeaturePolicy) -> Result<Self> {
        if !(train_ratio > 0.0 && train_ratio < 1.0) {
            return Err(BacktestError::config(format!(
                "train_ratio must be in (0, 1), got {}",
                train_ratio
            )));
        }
        Ok(Self {
            train_ratio,
            missing_features,
        })
    }

    pub fn train_ratio(&self) -> f64 {
        self.train_ratio
    }

    /// Split a dataset and fit the scaler on the training segment.
    pub fn split(&self, dataset: Dataset) -> Result<DatasetSplit> {
        let Dataset {
            feature_names,
            runners,
        } = dataset;

        if runners.is_empty() {
            return Err(BacktestError::data("cannot split an empty dataset"));
        }

        let (mut runners, pending_dropped) = filter_resolved(runners);
        if pending_dropped > 0 {
            info!("Dropped {} runners with pending results", pending_dropped);
        }

        let mut incomplete_dropped = 0;
        if self.missing_features == MissingFeaturePolicy::Skip {
            let before = runners.len();
            runners.retain(|r| {
                let keep = !r.has_missing_features();
                if !keep {
                    debug!(
                        "Race {} runner {}: missing feature values, skipping",
                        r.race_id, r.runner_id
                    );
                }
                keep
            });
            incomplete_dropped = before - runners.len();
            if incomplete_dropped > 0 {
                warn!(
                    "Dropped {} runners with missing feature values",
                    incomplete_dropped
                );
            }
        }

        if runners.is_empty() {
            return Err(BacktestError::data(
                "no resolved runners left to split after filtering",
            ));
        }

        // Stable: runners of the same race keep their source order
        runners.sort_by_key(|r| r.race_id);

        let split_idx = (runners.len() as f64 * self.train_ratio).floor() as usize;
        let test = runners.split_off(split_idx);
        let train = runners;

        if train.is_empty() {
            return Err(BacktestError::data(format!(
                "train_ratio {} leaves no training rows out of {}",
                self.train_ratio,
                test.len()
            )));
        }

        let train_rows: Vec<&[f64]> = train.iter().map(|r| r.features.as_slice()).collect();
        let scaler = FeatureScaler::fit(&feature_names, &train_rows)?;
        let constant = scaler.constant_features();
        if !constant.is_empty() {
            warn!("Zero-variance features left unscaled: {:?}", constant);
        }

        let train_features = scaler.transform(&train);
        let test_features = scaler.transform(&test);

        let wins = |rows: &[HistoricalRunner]| rows.iter().filter(|r| r.outcome.won()).count();
        let rate = |w: usize, n: usize| if n > 0 { w as f64 / n as f64 } else { 0.0 };
        let train_wins = wins(train.as_slice());
        let test_wins = wins(test.as_slice());

        let summary = SplitSummary {
            train_ratio: self.train_ratio,
            train_size: train.len(),
            test_size: test.len(),
            train_wins,
            test_wins,
            train_win_rate: rate(train_wins, train.len()),
            test_win_rate: rate(test_wins, test.len()),
            last_train_race: train.last().map(|r| r.race_id),
            first_test_race: test.first().map(|r| r.race_id),
            pending_dropped,
            incomplete_dropped,
        };

        info!(
            "Time-based split: {} train runners ({:.1}% wins), {} test runners ({:.1}% wins)",
            summary.train_size,
            summary.train_win_rate * 100.0,
            summary.test_size,
            summary.test_win_rate * 100.0
        );
        if test.is_empty() {
            warn!("Test segment is empty; backtests will place no bets");
        }

        Ok(DatasetSplit {
            train,
            test,
            scaler,
            train_features,
            test_features,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;

    fn runner(race_id: i64, runner_id: i64, features: Vec<f64>, won: bool) -> HistoricalRunner {
        HistoricalRunner {
            race_id,
            runner_id,
            features,
            decimal_odds: Some(3.0),
            outcome: if won { Outcome::Won } else { Outcome::Lost },
            win_payoff: 0.0,
        }
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    fn sample_dataset() -> Dataset {
        // Deliberately out of order
        let runners = vec![
            runner(5, 51, vec![5.0, 1.0], false),
            runner(1, 11, vec![1.0, 1.0], true),
            runner(3, 31, vec![3.0, 1.0], false),
            runner(2, 21, vec![2.0, 1.0], false),
            runner(4, 41, vec![4.0, 1.0], true),
        ];
        Dataset::new(names(2), runners)
    }

    #[test]
    fn test_invalid_train_ratio() {
        for ratio in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            let err = ChronologicalSplitter::new(ratio, MissingFeaturePolicy::Median).unwrap_err();
            assert!(err.is_configuration());
        }
    }

    #[test]
    fn test_empty_dataset() {
        let splitter = ChronologicalSplitter::new(0.8, MissingFeaturePolicy::Median).unwrap();
        let err = splitter.split(Dataset::new(names(2), vec![])).unwrap_err();
        assert!(matches!(err, BacktestError::Data(_)));
    }

    #[test]
    fn test_split_is_chronological() {
        let splitter = ChronologicalSplitter::new(0.6, MissingFeaturePolicy::Median).unwrap();
        let split = splitter.split(sample_dataset()).unwrap();

        // floor(5 * 0.6) = 3
        assert_eq!(split.train().len(), 3);
        assert_eq!(split.test().len(), 2);

        let max_train = split.train().iter().map(|r| r.race_id).max().unwrap();
        let min_test = split.test().iter().map(|r| r.race_id).min().unwrap();
        assert!(max_train <= min_test);
        assert_eq!(split.summary().last_train_race, Some(3));
        assert_eq!(split.summary().first_test_race, Some(4));
    }

    #[test]
    fn test_pending_rows_never_split() {
        let mut dataset = sample_dataset();
        dataset.runners.push(HistoricalRunner {
            outcome: Outcome::Pending,
            ..runner(6, 61, vec![6.0, 1.0], false)
        });

        let splitter = ChronologicalSplitter::new(0.6, MissingFeaturePolicy::Median).unwrap();
        let split = splitter.split(dataset).unwrap();

        assert_eq!(split.summary().pending_dropped, 1);
        assert!(split
            .train()
            .iter()
            .chain(split.test())
            .all(|r| r.outcome.is_resolved()));
    }

    #[test]
    fn test_scaler_fitted_on_train_only() {
        let splitter = ChronologicalSplitter::new(0.6, MissingFeaturePolicy::Median).unwrap();
        let split_a = splitter.split(sample_dataset()).unwrap();

        // Same training rows, very different test rows
        let mut other = sample_dataset();
        for r in other.runners.iter_mut().filter(|r| r.race_id > 3) {
            r.features = vec![1000.0, -50.0];
        }
        let split_b = splitter.split(other).unwrap();

        assert_eq!(split_a.scaler(), split_b.scaler());
        // Train feature 0 is [1, 2, 3]: mean 2, population std sqrt(2/3)
        assert!((split_a.scaler().means[0] - 2.0).abs() < 1e-12);
        assert!((split_a.scaler().scales[0] - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_test_rows_use_train_parameters() {
        let splitter = ChronologicalSplitter::new(0.6, MissingFeaturePolicy::Median).unwrap();
        let split = splitter.split(sample_dataset()).unwrap();

        let scale = (2.0f64 / 3.0).sqrt();
        let expected = (4.0 - 2.0) / scale;
        assert!((split.test_features()[[0, 0]] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_feature_is_centered() {
        let splitter = ChronologicalSplitter::new(0.6, MissingFeaturePolicy::Median).unwrap();
        let split = splitter.split(sample_dataset()).unwrap();

        assert_eq!(split.scaler().scales[1], 1.0);
        assert_eq!(split.scaler().constant_features(), vec!["f1"]);
        for v in split.train_features().column(1) {
            assert_eq!(*v, 0.0);
        }
        assert!(split.test_features().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_median_imputation_uses_train_rows() {
        let runners = vec![
            runner(1, 11, vec![1.0], false),
            runner(2, 21, vec![f64::NAN], true),
            runner(3, 31, vec![5.0], false),
            runner(4, 41, vec![f64::NAN], false),
            runner(5, 51, vec![100.0], false),
        ];
        let splitter = ChronologicalSplitter::new(0.6, MissingFeaturePolicy::Median).unwrap();
        let split = splitter.split(Dataset::new(names(1), runners)).unwrap();

        // Train observed [1, 5] -> median 3; test value 100 must not leak in
        assert!((split.scaler().medians[0] - 3.0).abs() < 1e-12);
        assert!(split.test_features().iter().all(|v| v.is_finite()));
        let imputed = split.scaler().transform_row(&[f64::NAN]);
        let expected = split.scaler().transform_row(&[3.0]);
        assert_eq!(imputed, expected);
    }

    #[test]
    fn test_skip_policy_drops_incomplete_rows() {
        let runners = vec![
            runner(1, 11, vec![1.0], false),
            runner(2, 21, vec![f64::NAN], true),
            runner(3, 31, vec![5.0], false),
        ];
        let splitter = ChronologicalSplitter::new(0.5, MissingFeaturePolicy::Skip).unwrap();
        let split = splitter.split(Dataset::new(names(1), runners)).unwrap();

        assert_eq!(split.summary().incomplete_dropped, 1);
        assert_eq!(split.train().len() + split.test().len(), 2);
    }

    #[test]
    fn test_train_ratio_edges() {
        let runners = vec![runner(1, 11, vec![1.0], false)];
        let splitter = ChronologicalSplitter::new(0.99, MissingFeaturePolicy::Median).unwrap();
        // floor(1 * 0.99) = 0 leaves no training rows
        let err = splitter.split(Dataset::new(names(1), runners)).unwrap_err();
        assert!(matches!(err, BacktestError::Data(_)));

        let runners = vec![
            runner(1, 11, vec![1.0], false),
            runner(2, 21, vec![2.0], true),
        ];
        // floor(2 * 0.99) = 1
        let split = splitter.split(Dataset::new(names(1), runners)).unwrap();
        assert_eq!(split.train().len(), 1);
        assert_eq!(split.test().len(), 1);
    }

    #[test]
    fn test_split_keeps_race_rows_in_source_order() {
        let runners = vec![
            runner(2, 22, vec![1.0], false),
            runner(1, 12, vec![1.0], false),
            runner(2, 21, vec![2.0], true),
            runner(1, 11, vec![3.0], true),
        ];
        let splitter = ChronologicalSplitter::new(0.5, MissingFeaturePolicy::Median).unwrap();
        let split = splitter.split(Dataset::new(names(1), runners)).unwrap();

        let train_ids: Vec<i64> = split.train().iter().map(|r| r.runner_id).collect();
        let test_ids: Vec<i64> = split.test().iter().map(|r| r.runner_id).collect();
        assert_eq!(train_ids, vec![12, 11]);
        assert_eq!(test_ids, vec![22, 21]);
    }
}
