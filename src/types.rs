//! Historical runner types shared by the loader, splitter and simulator.

use serde::{Deserialize, Serialize};

/// Chronological sort key column
pub const RACE_ID_COLUMN: &str = "race_id";
/// Runner identifier column
pub const RUNNER_ID_COLUMN: &str = "runner_id";
/// Ternary outcome column (1 = win, 0 = loss, -1 = pending)
pub const TARGET_COLUMN: &str = "target_win";
/// Market decimal odds column
pub const ODDS_COLUMN: &str = "ml_odds_decimal";
/// Optional realized payoff per $2 unit
pub const PAYOFF_COLUMN: &str = "win_payoff";

/// Columns every feature/outcome source must provide
pub const REQUIRED_COLUMNS: [&str; 4] = [RACE_ID_COLUMN, RUNNER_ID_COLUMN, TARGET_COLUMN, ODDS_COLUMN];

/// Numeric columns that are never model features.
///
/// `win_payoff` is only known after the race, so it stays out of the feature
/// vector even though it is numeric.
pub const NON_FEATURE_COLUMNS: [&str; 6] = [
    RUNNER_ID_COLUMN,
    RACE_ID_COLUMN,
    "meet_id",
    TARGET_COLUMN,
    "target_finish_position",
    PAYOFF_COLUMN,
];

/// Race outcome for a single runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Won,
    Lost,
    /// Result not yet known; never used for splitting, training or testing
    Pending,
}

impl Outcome {
    /// Decode the `target_win` label. Negative values mark pending results.
    pub fn from_target(target: i64) -> Option<Self> {
        match target {
            1 => Some(Outcome::Won),
            0 => Some(Outcome::Lost),
            t if t < 0 => Some(Outcome::Pending),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }

    pub fn won(&self) -> bool {
        matches!(self, Outcome::Won)
    }
}

/// One (race, horse) row from the feature/outcome source.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalRunner {
    pub race_id: i64,
    pub runner_id: i64,
    /// Feature values in dataset column order; missing values are NaN
    pub features: Vec<f64>,
    /// Market decimal odds; `None` or 0 means no market price
    pub decimal_odds: Option<f64>,
    pub outcome: Outcome,
    /// Dollar payoff per $2 unit, 0 when unknown
    pub win_payoff: f64,
}

impl HistoricalRunner {
    pub fn has_missing_features(&self) -> bool {
        self.features.iter().any(|v| !v.is_finite())
    }

    /// Odds usable for wagering, if the runner had a market price.
    pub fn market_odds(&self) -> Option<f64> {
        self.decimal_odds.filter(|o| o.is_finite() && *o > 0.0)
    }
}

/// Drop runners whose outcome is still pending.
///
/// Returns the resolved runners and the number that were removed.
pub fn filter_resolved(runners: Vec<HistoricalRunner>) -> (Vec<HistoricalRunner>, usize) {
    let before = runners.len();
    let resolved: Vec<HistoricalRunner> = runners
        .into_iter()
        .filter(|r| r.outcome.is_resolved())
        .collect();
    let dropped = before - resolved.len();
    (resolved, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(race_id: i64, outcome: Outcome) -> HistoricalRunner {
        HistoricalRunner {
            race_id,
            runner_id: race_id * 10,
            features: vec![1.0, 2.0],
            decimal_odds: Some(3.0),
            outcome,
            win_payoff: 0.0,
        }
    }

    #[test]
    fn test_outcome_from_target() {
        assert_eq!(Outcome::from_target(1), Some(Outcome::Won));
        assert_eq!(Outcome::from_target(0), Some(Outcome::Lost));
        assert_eq!(Outcome::from_target(-1), Some(Outcome::Pending));
        assert_eq!(Outcome::from_target(2), None);
    }

    #[test]
    fn test_filter_resolved() {
        let runners = vec![
            runner(1, Outcome::Won),
            runner(2, Outcome::Pending),
            runner(3, Outcome::Lost),
        ];
        let (resolved, dropped) = filter_resolved(runners);
        assert_eq!(dropped, 1);
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|r| r.outcome.is_resolved()));
    }

    #[test]
    fn test_market_odds() {
        let mut r = runner(1, Outcome::Won);
        assert_eq!(r.market_odds(), Some(3.0));
        r.decimal_odds = Some(0.0);
        assert_eq!(r.market_odds(), None);
        r.decimal_odds = None;
        assert_eq!(r.market_odds(), None);
        r.decimal_odds = Some(f64::NAN);
        assert_eq!(r.market_odds(), None);
    }

    #[test]
    fn test_missing_features() {
        let mut r = runner(1, Outcome::Lost);
        assert!(!r.has_missing_features());
        r.features[1] = f64::NAN;
        assert!(r.has_missing_features());
    }
}
