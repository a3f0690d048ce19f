//! Race-by-race betting simulation over the held-out test segment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::SimulatorConfig;
use crate::error::{BacktestError, Result};
use crate::model::WinClassifier;
use crate::split::DatasetSplit;
use crate::strategy::StakingStrategy;
use crate::types::HistoricalRunner;

/// One placed and settled win bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecord {
    pub race_id: i64,
    pub runner_id: i64,
    pub bet_amount: f64,
    pub win_probability: f64,
    pub decimal_odds: f64,
    pub actual_win: bool,
    pub win_payoff: f64,
    pub return_amount: f64,
    pub profit: f64,
}

impl BetRecord {
    /// Settle a bet. Winners are paid from the recorded payoff when there is
    /// one, otherwise from the odds.
    pub fn settle(
        runner: &HistoricalRunner,
        bet_amount: f64,
        win_probability: f64,
        decimal_odds: f64,
        payoff_unit: f64,
    ) -> Self {
        let actual_win = runner.outcome.won();
        let return_amount = if !actual_win {
            0.0
        } else if runner.win_payoff > 0.0 {
            (bet_amount / payoff_unit) * runner.win_payoff
        } else {
            bet_amount * (decimal_odds + 1.0)
        };

        Self {
            race_id: runner.race_id,
            runner_id: runner.runner_id,
            bet_amount,
            win_probability,
            decimal_odds,
            actual_win,
            win_payoff: runner.win_payoff,
            return_amount,
            profit: return_amount - bet_amount,
        }
    }

    pub fn won(&self) -> bool {
        self.actual_win
    }
}

/// A bet with the running totals after it settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    #[serde(flatten)]
    pub bet: BetRecord,
    pub bankroll: f64,
    pub cumulative_profit: f64,
    pub cumulative_stake: f64,
    /// Cumulative profit over cumulative stake, in percent
    pub running_roi: f64,
}

/// Ordered bet history of one strategy over the test segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    pub strategy_name: String,
    pub initial_bankroll: f64,
    rows: Vec<LedgerRow>,
}

impl Ledger {
    /// Build a ledger, deriving the running columns in bet order.
    ///
    /// The bankroll column is `initial_bankroll + cumulative_profit`, so the
    /// last row always equals the initial bankroll plus the summed profits.
    pub fn from_bets(
        strategy_name: impl Into<String>,
        initial_bankroll: f64,
        bets: Vec<BetRecord>,
    ) -> Self {
        let mut cumulative_profit = 0.0;
        let mut cumulative_stake = 0.0;

        let rows = bets
            .into_iter()
            .map(|bet| {
                cumulative_profit += bet.profit;
                cumulative_stake += bet.bet_amount;
                let running_roi = if cumulative_stake > 0.0 {
                    cumulative_profit / cumulative_stake * 100.0
                } else {
                    0.0
                };
                LedgerRow {
                    bet,
                    bankroll: initial_bankroll + cumulative_profit,
                    cumulative_profit,
                    cumulative_stake,
                    running_roi,
                }
            })
            .collect();

        Self {
            strategy_name: strategy_name.into(),
            initial_bankroll,
            rows,
        }
    }

    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }

    pub fn bets(&self) -> impl Iterator<Item = &BetRecord> {
        self.rows.iter().map(|r| &r.bet)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_profit(&self) -> f64 {
        self.rows.last().map(|r| r.cumulative_profit).unwrap_or(0.0)
    }

    pub fn final_bankroll(&self) -> f64 {
        self.rows
            .last()
            .map(|r| r.bankroll)
            .unwrap_or(self.initial_bankroll)
    }
}

/// Why a runner produced no bet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SkipCounts {
    pub no_market: usize,
    pub odds_out_of_range: usize,
    pub bad_probability: usize,
    pub unresolved: usize,
    pub declined: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.no_market + self.odds_out_of_range + self.bad_probability + self.unresolved + self.declined
    }
}

/// Applies one staking strategy to the test segment race by race.
#[derive(Debug, Clone)]
pub struct Simulator {
    config: SimulatorConfig,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Score the test segment once and simulate the strategy over it.
    pub fn run(
        &self,
        classifier: &dyn WinClassifier,
        split: &DatasetSplit,
        strategy: &mut StakingStrategy,
    ) -> Result<Ledger> {
        let probabilities = classifier.predict_probabilities(split.test_features())?;
        self.simulate(split.test(), &probabilities, strategy)
    }

    fn in_odds_range(&self, odds: f64) -> bool {
        odds > self.config.min_odds && odds <= self.config.max_odds
    }

    /// Simulate a strategy over pre-scored runners.
    ///
    /// `probabilities[i]` belongs to `runners[i]`. The strategy is reset first,
    /// so the same instance can be reused across runs.
    pub fn simulate(
        &self,
        runners: &[HistoricalRunner],
        probabilities: &[f64],
        strategy: &mut StakingStrategy,
    ) -> Result<Ledger> {
        if runners.len() != probabilities.len() {
            return Err(BacktestError::data(format!(
                "{} probabilities for {} runners",
                probabilities.len(),
                runners.len()
            )));
        }

        strategy.reset();

        let mut races: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, runner) in runners.iter().enumerate() {
            races.entry(runner.race_id).or_default().push(i);
        }

        let mut bets = Vec::new();
        let mut skips = SkipCounts::default();

        for (race_id, indices) in &races {
            for &i in indices {
                let runner = &runners[i];

                let odds = match runner.market_odds() {
                    Some(odds) => odds,
                    None => {
                        skips.no_market += 1;
                        continue;
                    }
                };
                if !self.in_odds_range(odds) {
                    skips.odds_out_of_range += 1;
                    continue;
                }

                let probability = probabilities[i];
                if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
                    warn!(
                        "Race {} runner {}: invalid win probability {}, skipping",
                        race_id, runner.runner_id, probability
                    );
                    skips.bad_probability += 1;
                    continue;
                }
                if !runner.outcome.is_resolved() {
                    warn!(
                        "Race {} runner {}: outcome pending, skipping",
                        race_id, runner.runner_id
                    );
                    skips.unresolved += 1;
                    continue;
                }

                let stake = strategy.calculate_bet(probability, odds);
                if stake <= 0.0 {
                    skips.declined += 1;
                    continue;
                }

                let bet = BetRecord::settle(runner, stake, probability, odds, self.config.payoff_unit);
                strategy.settle(bet.profit);
                debug!(
                    "Race {} runner {}: stake {:.2} @ {:.2} (p={:.3}) profit {:.2}, bankroll {:.2}",
                    race_id,
                    runner.runner_id,
                    bet.bet_amount,
                    odds,
                    probability,
                    bet.profit,
                    strategy.bankroll()
                );
                bets.push(bet);
            }
        }

        debug!("{}: skipped runners {:?}", strategy.name(), skips);

        if bets.is_empty() {
            warn!(
                "{}: no bets placed across {} races ({} runners skipped)",
                strategy.name(),
                races.len(),
                skips.total()
            );
        } else {
            info!(
                "{}: {} bets across {} races, bankroll {:.2} -> {:.2}",
                strategy.name(),
                bets.len(),
                races.len(),
                strategy.initial_bankroll(),
                strategy.bankroll()
            );
        }

        Ok(Ledger::from_bets(
            strategy.name(),
            strategy.initial_bankroll(),
            bets,
        ))
    }
}
