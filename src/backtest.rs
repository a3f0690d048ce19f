//! Backtest runner: score the test segment once, simulate every strategy on
//! the same probabilities, then analyze and rank the results.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::analysis::{analyze_segments, SegmentReport};
use crate::calibration::Calibrator;
use crate::config::AppConfig;
use crate::error::{BacktestError, Result};
use crate::metrics::{compare_strategies, PerformanceAnalyzer, PerformanceMetrics, StrategyComparison};
use crate::model::WinClassifier;
use crate::simulator::{Ledger, Simulator};
use crate::split::{DatasetSplit, SplitSummary};
use crate::strategy::StakingStrategy;

/// Result of simulating one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRun {
    pub strategy_name: String,
    #[serde(skip)]
    pub ledger: Ledger,
    pub metrics: PerformanceMetrics,
    pub segments: SegmentReport,
}

/// Everything a backtest produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub generated_at: DateTime<Utc>,
    pub classifier: String,
    pub calibrated: bool,
    pub split: SplitSummary,
    pub runs: Vec<StrategyRun>,
    pub comparison: StrategyComparison,
}

impl BacktestReport {
    pub fn run(&self, strategy_name: &str) -> Option<&StrategyRun> {
        self.runs.iter().find(|r| r.strategy_name == strategy_name)
    }
}

pub struct Backtester {
    simulator: Simulator,
    analyzer: PerformanceAnalyzer,
    calibrator: Calibrator,
    parallel: bool,
}

impl Backtester {
    pub fn new(
        simulator: Simulator,
        analyzer: PerformanceAnalyzer,
        calibrator: Calibrator,
        parallel: bool,
    ) -> Self {
        Self {
            simulator,
            analyzer,
            calibrator,
            parallel,
        }
    }

    pub fn from_config(config: &AppConfig, calibrator: Calibrator) -> Result<Self> {
        Ok(Self::new(
            Simulator::new(config.simulator.clone())?,
            PerformanceAnalyzer::new(config.backtest.sharpe_annualization)?,
            calibrator,
            config.backtest.parallel,
        ))
    }

    /// Win probabilities for the test segment, one classifier call.
    pub fn score(&self, classifier: &dyn WinClassifier, split: &DatasetSplit) -> Result<Vec<f64>> {
        if let Some(names) = classifier.feature_names() {
            if names != split.feature_names() {
                return Err(BacktestError::data(format!(
                    "classifier features {:?} do not match dataset features {:?}",
                    names,
                    split.feature_names()
                )));
            }
        }

        let probabilities = classifier.predict_probabilities(split.test_features())?;
        if probabilities.len() != split.test().len() {
            return Err(BacktestError::model(format!(
                "{} returned {} probabilities for {} runners",
                classifier.name(),
                probabilities.len(),
                split.test().len()
            )));
        }

        if self.calibrator.is_enabled() {
            info!("Applying probability calibration");
            Ok(self.calibrator.calibrate_vec(&probabilities))
        } else {
            Ok(probabilities)
        }
    }

    fn run_strategy(
        &self,
        split: &DatasetSplit,
        probabilities: &[f64],
        mut strategy: StakingStrategy,
    ) -> Result<StrategyRun> {
        let ledger = self.simulator.simulate(split.test(), probabilities, &mut strategy)?;
        let metrics = self.analyzer.analyze(&ledger);
        let segments = analyze_segments(ledger.bets());

        Ok(StrategyRun {
            strategy_name: strategy.name().to_string(),
            ledger,
            metrics,
            segments,
        })
    }

    /// Simulate every strategy over the test segment and rank them.
    ///
    /// Each strategy owns its bankroll; results only meet in the comparison.
    pub fn run(
        &self,
        classifier: &dyn WinClassifier,
        split: &DatasetSplit,
        strategies: Vec<StakingStrategy>,
    ) -> Result<BacktestReport> {
        if strategies.is_empty() {
            return Err(BacktestError::config("no strategies to backtest"));
        }
        if split.test().is_empty() {
            warn!("Test segment is empty; every strategy will have an empty ledger");
        }

        let probabilities = self.score(classifier, split)?;
        info!(
            "Scored {} test runners with {}, simulating {} strategies{}",
            probabilities.len(),
            classifier.name(),
            strategies.len(),
            if self.parallel { " in parallel" } else { "" }
        );

        let runs: Vec<StrategyRun> = if self.parallel {
            strategies
                .into_par_iter()
                .map(|s| self.run_strategy(split, &probabilities, s))
                .collect::<Result<_>>()?
        } else {
            strategies
                .into_iter()
                .map(|s| self.run_strategy(split, &probabilities, s))
                .collect::<Result<_>>()?
        };

        let by_name: BTreeMap<String, PerformanceMetrics> = runs
            .iter()
            .map(|r| (r.strategy_name.clone(), r.metrics.clone()))
            .collect();
        let comparison = compare_strategies(&by_name);

        if let Some(best) = comparison.best() {
            info!("Best strategy: {} (ROI {:+.2}%)", best.strategy, best.roi);
        }

        Ok(BacktestReport {
            generated_at: Utc::now(),
            classifier: classifier.name().to_string(),
            calibrated: self.calibrator.is_enabled(),
            split: split.summary().clone(),
            runs,
            comparison,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::TemperatureScaling;
    use crate::config::SimulatorConfig;
    use crate::dataset::Dataset;
    use crate::split::{ChronologicalSplitter, MissingFeaturePolicy};
    use crate::types::{HistoricalRunner, Outcome};
    use ndarray::Array2;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed probability per test row and counts calls.
    struct StubClassifier {
        probability: f64,
        calls: AtomicUsize,
        names: Option<Vec<String>>,
    }

    impl StubClassifier {
        fn new(probability: f64) -> Self {
            Self {
                probability,
                calls: AtomicUsize::new(0),
                names: None,
            }
        }
    }

    impl WinClassifier for StubClassifier {
        fn predict_probabilities(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![self.probability; features.nrows()])
        }

        fn feature_names(&self) -> Option<&[String]> {
            self.names.as_deref()
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn sample_split() -> DatasetSplit {
        let runners: Vec<HistoricalRunner> = (0..40)
            .map(|i| HistoricalRunner {
                race_id: i / 4,
                runner_id: i,
                features: vec![(i % 4) as f64, (i % 3) as f64],
                decimal_odds: Some(2.0 + (i % 4) as f64 * 2.0),
                outcome: if i % 4 == 0 { Outcome::Won } else { Outcome::Lost },
                win_payoff: 0.0,
            })
            .collect();
        let dataset = Dataset::new(vec!["a".to_string(), "b".to_string()], runners);
        ChronologicalSplitter::new(0.5, MissingFeaturePolicy::Median)
            .unwrap()
            .split(dataset)
            .unwrap()
    }

    fn backtester(parallel: bool) -> Backtester {
        Backtester::new(
            Simulator::new(SimulatorConfig::default()).unwrap(),
            PerformanceAnalyzer::new(2520.0).unwrap(),
            Calibrator::None,
            parallel,
        )
    }

    fn strategies() -> Vec<StakingStrategy> {
        vec![
            StakingStrategy::flat(2.0, 1000.0).unwrap(),
            StakingStrategy::kelly(0.25, 2.0, 0.10, 50.0, 1000.0).unwrap(),
            StakingStrategy::value(0.05, 2.0, 1000.0).unwrap(),
            StakingStrategy::confidence(0.30, 2.0, 20.0, 1000.0).unwrap(),
        ]
    }

    #[test]
    fn test_run_scores_once() {
        let split = sample_split();
        let classifier = StubClassifier::new(0.35);
        let report = backtester(false)
            .run(&classifier, &split, strategies())
            .unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.runs.len(), 4);
        assert_eq!(report.split.test_size, 20);
        assert!(!report.calibrated);

        let flat = report.run("Flat Betting").unwrap();
        assert_eq!(flat.metrics.total_bets, 20);
        assert_eq!(flat.metrics.final_bankroll, flat.ledger.final_bankroll());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let split = sample_split();
        let classifier = StubClassifier::new(0.35);
        let sequential = backtester(false).run(&classifier, &split, strategies()).unwrap();
        let parallel = backtester(true).run(&classifier, &split, strategies()).unwrap();

        assert_eq!(sequential.comparison, parallel.comparison);
        for (a, b) in sequential.runs.iter().zip(&parallel.runs) {
            assert_eq!(a.strategy_name, b.strategy_name);
            assert_eq!(a.ledger.rows(), b.ledger.rows());
        }
    }

    #[test]
    fn test_comparison_sorted_by_roi() {
        let split = sample_split();
        let report = backtester(false)
            .run(&StubClassifier::new(0.35), &split, strategies())
            .unwrap();

        let rois: Vec<f64> = report.comparison.rows.iter().map(|r| r.roi).collect();
        assert!(rois.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_feature_name_mismatch() {
        let split = sample_split();
        let mut classifier = StubClassifier::new(0.35);
        classifier.names = Some(vec!["b".to_string(), "a".to_string()]);

        let err = backtester(false)
            .run(&classifier, &split, strategies())
            .unwrap_err();
        assert!(matches!(err, BacktestError::Data(_)));
    }

    #[test]
    fn test_calibrator_applied_before_staking() {
        let split = sample_split();
        let calibrated = Backtester::new(
            Simulator::new(SimulatorConfig::default()).unwrap(),
            PerformanceAnalyzer::new(2520.0).unwrap(),
            Calibrator::Temperature(TemperatureScaling::new(2.0).unwrap()),
            false,
        );

        let probabilities = calibrated.score(&StubClassifier::new(0.2), &split).unwrap();
        assert!(probabilities.iter().all(|&p| p > 0.2 && p < 0.5));
    }

    #[test]
    fn test_no_strategies() {
        let split = sample_split();
        assert!(backtester(false)
            .run(&StubClassifier::new(0.35), &split, Vec::new())
            .unwrap_err()
            .is_configuration());
    }
}
