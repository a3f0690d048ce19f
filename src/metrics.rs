//! Performance metrics for a completed ledger and cross-strategy comparison.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

use crate::error::{validate_positive, Result};
use crate::simulator::{BetRecord, Ledger};

/// Gross winnings over gross losses.
///
/// `Infinite` when there were winning bets but no losing ones. Serialized as a
/// number, or the string `"inf"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfitFactor {
    Finite(f64),
    Infinite,
}

impl ProfitFactor {
    pub fn is_infinite(&self) -> bool {
        matches!(self, ProfitFactor::Infinite)
    }

    /// Value as f64, with `Infinite` mapped to `f64::INFINITY`.
    pub fn as_f64(&self) -> f64 {
        match self {
            ProfitFactor::Finite(v) => *v,
            ProfitFactor::Infinite => f64::INFINITY,
        }
    }
}

impl Default for ProfitFactor {
    fn default() -> Self {
        ProfitFactor::Finite(0.0)
    }
}

impl fmt::Display for ProfitFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfitFactor::Finite(v) => fmt::Display::fmt(v, f),
            ProfitFactor::Infinite => fmt::Display::fmt(&f64::INFINITY, f),
        }
    }
}

impl Serialize for ProfitFactor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ProfitFactor::Finite(v) => serializer.serialize_f64(*v),
            ProfitFactor::Infinite => serializer.serialize_str("inf"),
        }
    }
}

impl<'de> Deserialize<'de> for ProfitFactor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(v) if v.is_infinite() && v > 0.0 => Ok(ProfitFactor::Infinite),
            Repr::Number(v) => Ok(ProfitFactor::Finite(v)),
            Repr::Text(s) => match s.to_ascii_lowercase().as_str() {
                "inf" | "infinity" | "+inf" => Ok(ProfitFactor::Infinite),
                other => other
                    .parse::<f64>()
                    .map(ProfitFactor::Finite)
                    .map_err(serde::de::Error::custom),
            },
        }
    }
}

/// Aggregate, risk and streak statistics of one strategy run.
///
/// Percentages (`win_rate`, `roi`, `bankroll_growth`, `max_drawdown`) are
/// expressed in percent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_bets: usize,
    pub winning_bets: usize,
    pub losing_bets: usize,
    pub win_rate: f64,
    pub total_wagered: f64,
    pub total_returned: f64,
    pub total_profit: f64,
    pub roi: f64,
    pub initial_bankroll: f64,
    pub final_bankroll: f64,
    pub bankroll_growth: f64,
    pub avg_bet: f64,
    pub avg_odds: f64,
    pub avg_win_probability: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: ProfitFactor,
    pub max_win_streak: usize,
    pub max_loss_streak: usize,
}

impl PerformanceMetrics {
    /// Metrics of a run that placed no bets.
    pub fn empty(initial_bankroll: f64) -> Self {
        Self {
            initial_bankroll,
            final_bankroll: initial_bankroll,
            ..Default::default()
        }
    }

    /// `(metric, value)` pairs in export order.
    pub fn to_rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("total_bets", self.total_bets.to_string()),
            ("winning_bets", self.winning_bets.to_string()),
            ("losing_bets", self.losing_bets.to_string()),
            ("win_rate", self.win_rate.to_string()),
            ("total_wagered", self.total_wagered.to_string()),
            ("total_returned", self.total_returned.to_string()),
            ("total_profit", self.total_profit.to_string()),
            ("roi", self.roi.to_string()),
            ("initial_bankroll", self.initial_bankroll.to_string()),
            ("final_bankroll", self.final_bankroll.to_string()),
            ("bankroll_growth", self.bankroll_growth.to_string()),
            ("avg_bet", self.avg_bet.to_string()),
            ("avg_odds", self.avg_odds.to_string()),
            ("avg_win_probability", self.avg_win_probability.to_string()),
            ("max_drawdown", self.max_drawdown.to_string()),
            ("sharpe_ratio", self.sharpe_ratio.to_string()),
            ("profit_factor", self.profit_factor.to_string()),
            ("max_win_streak", self.max_win_streak.to_string()),
            ("max_loss_streak", self.max_loss_streak.to_string()),
        ]
    }
}

/// Computes [`PerformanceMetrics`] from ledgers. Never mutates its input.
#[derive(Debug, Clone)]
pub struct PerformanceAnalyzer {
    sharpe_annualization: f64,
}

impl PerformanceAnalyzer {
    pub fn new(sharpe_annualization: f64) -> Result<Self> {
        validate_positive("sharpe_annualization", sharpe_annualization)?;
        Ok(Self {
            sharpe_annualization,
        })
    }

    pub fn analyze(&self, ledger: &Ledger) -> PerformanceMetrics {
        let bets: Vec<&BetRecord> = ledger.bets().collect();
        self.analyze_bets(&bets, ledger.initial_bankroll)
    }

    /// Metrics for bets in ledger order, starting from `initial_bankroll`.
    pub fn analyze_bets(&self, bets: &[&BetRecord], initial_bankroll: f64) -> PerformanceMetrics {
        if bets.is_empty() {
            return PerformanceMetrics::empty(initial_bankroll);
        }

        let n = bets.len() as f64;
        let profits: Vec<f64> = bets.iter().map(|b| b.profit).collect();

        let winning_bets = bets.iter().filter(|b| b.won()).count();
        let losing_bets = bets.len() - winning_bets;
        let total_wagered: f64 = bets.iter().map(|b| b.bet_amount).sum();
        let total_returned: f64 = bets.iter().map(|b| b.return_amount).sum();

        // Same summation order as the ledger's cumulative profit column
        let mut total_profit = 0.0;
        let mut trace = Vec::with_capacity(profits.len());
        for p in &profits {
            total_profit += p;
            trace.push(initial_bankroll + total_profit);
        }
        let final_bankroll = initial_bankroll + total_profit;

        let roi = if total_wagered > 0.0 {
            total_profit / total_wagered * 100.0
        } else {
            0.0
        };

        let wins: Vec<bool> = bets.iter().map(|b| b.won()).collect();

        PerformanceMetrics {
            total_bets: bets.len(),
            winning_bets,
            losing_bets,
            win_rate: winning_bets as f64 / n * 100.0,
            total_wagered,
            total_returned,
            total_profit,
            roi,
            initial_bankroll,
            final_bankroll,
            bankroll_growth: (final_bankroll - initial_bankroll) / initial_bankroll * 100.0,
            avg_bet: total_wagered / n,
            avg_odds: bets.iter().map(|b| b.decimal_odds).sum::<f64>() / n,
            avg_win_probability: bets.iter().map(|b| b.win_probability).sum::<f64>() / n,
            max_drawdown: max_drawdown(&trace),
            sharpe_ratio: sharpe_ratio(&profits, self.sharpe_annualization),
            profit_factor: profit_factor(&profits),
            max_win_streak: max_streak(&wins, true),
            max_loss_streak: max_streak(&wins, false),
        }
    }
}

/// Largest peak-to-trough decline of the bankroll trace, in percent of the peak.
///
/// The running peak starts at the first ledger row. Non-positive peaks are ignored.
pub fn max_drawdown(trace: &[f64]) -> f64 {
    let Some(&first) = trace.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0;

    for &value in trace {
        if value > peak {
            peak = value;
        }
        if peak <= 0.0 {
            continue;
        }
        let dd = (peak - value) / peak * 100.0;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}

/// Annualized per-bet Sharpe ratio (population standard deviation).
pub fn sharpe_ratio(profits: &[f64], annualization: f64) -> f64 {
    if profits.len() < 2 {
        return 0.0;
    }
    let n = profits.len() as f64;
    let mean = profits.iter().sum::<f64>() / n;
    let variance = profits.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if !(std > 0.0) {
        return 0.0;
    }
    mean / std * annualization.sqrt()
}

pub fn profit_factor(profits: &[f64]) -> ProfitFactor {
    let gross_win: f64 = profits.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = profits.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();

    if profits.is_empty() {
        ProfitFactor::Finite(0.0)
    } else if gross_loss > 0.0 {
        ProfitFactor::Finite(gross_win / gross_loss)
    } else {
        ProfitFactor::Infinite
    }
}

/// Longest run of consecutive `target` values.
pub fn max_streak(outcomes: &[bool], target: bool) -> usize {
    let mut best = 0;
    let mut current = 0;
    for &o in outcomes {
        if o == target {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

/// One line of the strategy comparison table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub strategy: String,
    pub total_bets: usize,
    pub win_rate: f64,
    pub total_wagered: f64,
    pub total_profit: f64,
    pub roi: f64,
    pub final_bankroll: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: ProfitFactor,
}

impl ComparisonRow {
    fn new(strategy: &str, m: &PerformanceMetrics) -> Self {
        Self {
            strategy: strategy.to_string(),
            total_bets: m.total_bets,
            win_rate: m.win_rate,
            total_wagered: m.total_wagered,
            total_profit: m.total_profit,
            roi: m.roi,
            final_bankroll: m.final_bankroll,
            max_drawdown: m.max_drawdown,
            sharpe_ratio: m.sharpe_ratio,
            profit_factor: m.profit_factor,
        }
    }
}

/// Strategies ranked by ROI, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyComparison {
    pub rows: Vec<ComparisonRow>,
}

impl StrategyComparison {
    pub fn best(&self) -> Option<&ComparisonRow> {
        self.rows.first()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Rank strategies by ROI descending. Strategies that placed no bets are left out.
pub fn compare_strategies(results: &BTreeMap<String, PerformanceMetrics>) -> StrategyComparison {
    let mut rows: Vec<ComparisonRow> = results
        .iter()
        .filter(|(name, m)| {
            if m.total_bets == 0 {
                info!("{}: no bets placed, left out of comparison", name);
                false
            } else {
                true
            }
        })
        .map(|(name, m)| ComparisonRow::new(name, m))
        .collect();

    rows.sort_by(|a, b| b.roi.total_cmp(&a.roi));
    StrategyComparison { rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bet(amount: f64, odds: f64, won: bool) -> BetRecord {
        let return_amount = if won { amount * (odds + 1.0) } else { 0.0 };
        BetRecord {
            race_id: 1,
            runner_id: 1,
            bet_amount: amount,
            win_probability: 0.3,
            decimal_odds: odds,
            actual_win: won,
            win_payoff: 0.0,
            return_amount,
            profit: return_amount - amount,
        }
    }

    fn analyzer() -> PerformanceAnalyzer {
        PerformanceAnalyzer::new(2520.0).unwrap()
    }

    #[test]
    fn test_basic_metrics() {
        let ledger = Ledger::from_bets(
            "Flat Betting",
            1000.0,
            vec![bet(2.0, 2.0, true), bet(2.0, 4.0, false), bet(2.0, 9.0, false)],
        );
        let m = analyzer().analyze(&ledger);

        assert_eq!(m.total_bets, 3);
        assert_eq!(m.winning_bets, 1);
        assert_eq!(m.losing_bets, 2);
        assert!((m.win_rate - 100.0 / 3.0).abs() < 1e-9);
        assert!((m.total_wagered - 6.0).abs() < 1e-12);
        assert!((m.total_returned - 6.0).abs() < 1e-12);
        assert!(m.total_profit.abs() < 1e-12);
        assert!(m.roi.abs() < 1e-12);
        assert!((m.final_bankroll - 1000.0).abs() < 1e-12);
        assert!((m.avg_odds - 5.0).abs() < 1e-12);
        assert_eq!(m.profit_factor, ProfitFactor::Finite(1.0));
        assert_eq!(m.max_win_streak, 1);
        assert_eq!(m.max_loss_streak, 2);
    }

    #[test]
    fn test_final_bankroll_matches_ledger() {
        let bets: Vec<BetRecord> = (0..25)
            .map(|i| bet(1.3 + i as f64 * 0.7, 3.1, i % 4 == 0))
            .collect();
        let ledger = Ledger::from_bets("Kelly Criterion", 250.0, bets);
        let m = analyzer().analyze(&ledger);
        assert_eq!(m.final_bankroll, ledger.final_bankroll());
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = Ledger::from_bets("Value Betting", 500.0, Vec::new());
        let m = analyzer().analyze(&ledger);

        assert_eq!(m.total_bets, 0);
        assert_eq!(m.final_bankroll, 500.0);
        assert_eq!(m.roi, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.profit_factor, ProfitFactor::Finite(0.0));
    }

    #[test]
    fn test_analyze_is_idempotent() {
        let ledger = Ledger::from_bets(
            "Flat Betting",
            100.0,
            vec![bet(2.0, 5.0, false), bet(2.0, 3.0, true), bet(2.0, 7.0, false)],
        );
        let analyzer = analyzer();
        let first = analyzer.analyze(&ledger);
        let second = analyzer.analyze(&ledger);
        assert_eq!(first, second);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_profit_factor_infinite() {
        assert_eq!(profit_factor(&[4.0, 2.0]), ProfitFactor::Infinite);
        assert_eq!(profit_factor(&[]), ProfitFactor::Finite(0.0));
        assert_eq!(profit_factor(&[6.0, -2.0, -1.0]), ProfitFactor::Finite(2.0));
    }

    #[test]
    fn test_profit_factor_no_losses_without_gross_profit() {
        assert_eq!(profit_factor(&[0.0]), ProfitFactor::Infinite);
        assert_eq!(profit_factor(&[0.0, 0.0, 3.0]), ProfitFactor::Infinite);
    }

    #[test]
    fn test_profit_factor_serde() {
        let json = serde_json::to_string(&ProfitFactor::Infinite).unwrap();
        assert_eq!(json, "\"inf\"");
        let back: ProfitFactor = serde_json::from_str(&json).unwrap();
        assert!(back.is_infinite());

        let finite: ProfitFactor = serde_json::from_str("1.5").unwrap();
        assert_eq!(finite, ProfitFactor::Finite(1.5));
        assert_eq!(ProfitFactor::Infinite.to_string(), "inf");
        assert_eq!(format!("{:.2}", ProfitFactor::Finite(1.4567)), "1.46");
    }

    #[test]
    fn test_max_drawdown() {
        // peak 1200 -> 960 is 20%
        let trace = [900.0, 1200.0, 1100.0, 960.0, 1300.0];
        assert!((max_drawdown(&trace) - 20.0).abs() < 1e-9);
        assert_eq!(max_drawdown(&[1010.0, 1020.0]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_max_drawdown_first_bet_loses() {
        // peak is the first row (998), not the starting bankroll
        let dd = max_drawdown(&[998.0, 996.0]);
        assert!((dd - 2.0 / 998.0 * 100.0).abs() < 1e-9);

        let ledger = Ledger::from_bets(
            "Flat Betting",
            1000.0,
            vec![bet(2.0, 4.0, false), bet(2.0, 5.0, false)],
        );
        let m = analyzer().analyze(&ledger);
        assert!((m.max_drawdown - 2.0 / 998.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_sharpe_ratio() {
        assert_eq!(sharpe_ratio(&[5.0], 2520.0), 0.0);
        assert_eq!(sharpe_ratio(&[2.0, 2.0, 2.0], 2520.0), 0.0);

        // mean 1, population std 1
        let sharpe = sharpe_ratio(&[2.0, 0.0], 100.0);
        assert!((sharpe - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_streaks() {
        let outcomes = [true, true, false, false, false, true, false];
        assert_eq!(max_streak(&outcomes, true), 2);
        assert_eq!(max_streak(&outcomes, false), 3);
        assert_eq!(max_streak(&[], true), 0);
    }

    #[test]
    fn test_compare_strategies() {
        let analyzer = analyzer();
        let mut results = BTreeMap::new();
        results.insert(
            "Flat Betting".to_string(),
            analyzer.analyze(&Ledger::from_bets("Flat Betting", 100.0, vec![bet(2.0, 3.0, false)])),
        );
        results.insert(
            "Value Betting".to_string(),
            analyzer.analyze(&Ledger::from_bets("Value Betting", 100.0, vec![bet(2.0, 3.0, true)])),
        );
        results.insert(
            "Confidence Betting".to_string(),
            PerformanceMetrics::empty(100.0),
        );

        let comparison = compare_strategies(&results);
        assert_eq!(comparison.rows.len(), 2);
        assert_eq!(comparison.best().unwrap().strategy, "Value Betting");
        assert!(comparison.rows[0].profit_factor.is_infinite());
        assert!(comparison.rows[0].roi > comparison.rows[1].roi);
    }

    #[test]
    fn test_metric_rows() {
        let rows = PerformanceMetrics::empty(1000.0).to_rows();
        assert_eq!(rows[0], ("total_bets", "0".to_string()));
        assert!(rows.iter().any(|(k, v)| *k == "final_bankroll" && v == "1000"));
    }
}
