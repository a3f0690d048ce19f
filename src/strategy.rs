//! Staking strategies: how much to stake on a runner given its predicted win
//! probability and market odds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{validate_positive, BacktestError, Result};

/// Full-Kelly fractions above this are capped before the fractional multiplier.
pub const KELLY_FRACTION_CAP: f64 = 0.25;

/// Probability at which a confidence stake reaches its maximum.
pub const CONFIDENCE_CEILING: f64 = 0.60;

/// The four built-in staking strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Flat,
    Kelly,
    Value,
    Confidence,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Flat,
        StrategyKind::Kelly,
        StrategyKind::Value,
        StrategyKind::Confidence,
    ];

    /// Name used in reports and ledger file names.
    pub fn display_name(&self) -> &'static str {
        match self {
            StrategyKind::Flat => "Flat Betting",
            StrategyKind::Kelly => "Kelly Criterion",
            StrategyKind::Value => "Value Betting",
            StrategyKind::Confidence => "Confidence Betting",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Flat => "flat",
            StrategyKind::Kelly => "kelly",
            StrategyKind::Value => "value",
            StrategyKind::Confidence => "confidence",
        };
        f.write_str(s)
    }
}

impl FromStr for StrategyKind {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "flat" => Ok(StrategyKind::Flat),
            "kelly" => Ok(StrategyKind::Kelly),
            "value" => Ok(StrategyKind::Value),
            "confidence" => Ok(StrategyKind::Confidence),
            other => Err(BacktestError::config(format!(
                "unknown strategy '{}' (expected flat, kelly, value or confidence)",
                other
            ))),
        }
    }
}

/// Stake sizing rule and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum StakingPolicy {
    Flat {
        bet_amount: f64,
    },
    Kelly {
        fraction: f64,
        min_bet: f64,
        max_bet_fraction: f64,
        max_bet_absolute: f64,
    },
    Value {
        min_edge: f64,
        bet_amount: f64,
    },
    Confidence {
        min_probability: f64,
        base_bet: f64,
        max_bet: f64,
    },
}

impl StakingPolicy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StakingPolicy::Flat { .. } => StrategyKind::Flat,
            StakingPolicy::Kelly { .. } => StrategyKind::Kelly,
            StakingPolicy::Value { .. } => StrategyKind::Value,
            StakingPolicy::Confidence { .. } => StrategyKind::Confidence,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            StakingPolicy::Flat { bet_amount } => validate_positive("flat.bet_amount", bet_amount),
            StakingPolicy::Kelly {
                fraction,
                min_bet,
                max_bet_fraction,
                max_bet_absolute,
            } => {
                validate_unit_fraction("kelly.fraction", fraction)?;
                validate_unit_fraction("kelly.max_bet_fraction", max_bet_fraction)?;
                validate_positive("kelly.min_bet", min_bet)?;
                validate_positive("kelly.max_bet_absolute", max_bet_absolute)
            }
            StakingPolicy::Value {
                min_edge,
                bet_amount,
            } => {
                if !(0.0..1.0).contains(&min_edge) {
                    return Err(BacktestError::config(format!(
                        "value.min_edge must be in [0, 1), got {}",
                        min_edge
                    )));
                }
                validate_positive("value.bet_amount", bet_amount)
            }
            StakingPolicy::Confidence {
                min_probability,
                base_bet,
                max_bet,
            } => {
                if !(0.0..CONFIDENCE_CEILING).contains(&min_probability) {
                    return Err(BacktestError::config(format!(
                        "confidence.min_probability must be in [0, {}), got {}",
                        CONFIDENCE_CEILING, min_probability
                    )));
                }
                validate_positive("confidence.base_bet", base_bet)?;
                validate_positive("confidence.max_bet", max_bet)?;
                if base_bet > max_bet {
                    return Err(BacktestError::config(format!(
                        "confidence.base_bet ({}) exceeds max_bet ({})",
                        base_bet, max_bet
                    )));
                }
                Ok(())
            }
        }
    }

    /// Stake before the affordability check. Zero means decline.
    fn raw_stake(&self, probability: f64, odds: f64, bankroll: f64) -> f64 {
        match *self {
            StakingPolicy::Flat { bet_amount } => bet_amount,
            StakingPolicy::Kelly {
                fraction,
                min_bet,
                max_bet_fraction,
                max_bet_absolute,
            } => {
                let full_kelly = kelly_fraction(probability, odds);
                if full_kelly <= 0.0 {
                    return 0.0;
                }
                let stake = (full_kelly * fraction * bankroll).max(min_bet);
                stake.min((max_bet_fraction * bankroll).min(max_bet_absolute))
            }
            StakingPolicy::Value {
                min_edge,
                bet_amount,
            } => {
                if odds <= 1.0 {
                    return 0.0;
                }
                if probability - implied_probability(odds) < min_edge {
                    return 0.0;
                }
                bet_amount
            }
            StakingPolicy::Confidence {
                min_probability,
                base_bet,
                max_bet,
            } => {
                if probability < min_probability {
                    return 0.0;
                }
                let scale = ((probability - min_probability) / (CONFIDENCE_CEILING - min_probability))
                    .clamp(0.0, 1.0);
                base_bet + scale * (max_bet - base_bet)
            }
        }
    }
}

fn validate_unit_fraction(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(BacktestError::config(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

/// Capped full-Kelly fraction for a win bet at decimal odds.
///
/// `b = odds - 1`, `edge = b*p - (1-p)`, result `min(edge / b, KELLY_FRACTION_CAP)`.
/// Returns 0 when there is no net return or no positive edge.
pub fn kelly_fraction(probability: f64, odds: f64) -> f64 {
    if odds <= 1.0 {
        return 0.0;
    }
    let b = odds - 1.0;
    let edge = b * probability - (1.0 - probability);
    if edge <= 0.0 {
        return 0.0;
    }
    (edge / b).min(KELLY_FRACTION_CAP)
}

/// Market-implied win probability, `1 / (odds + 1)`.
pub fn implied_probability(odds: f64) -> f64 {
    1.0 / (odds + 1.0)
}

/// Bankroll tracked by a strategy during one simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bankroll {
    initial: f64,
    current: f64,
}

impl Bankroll {
    pub fn new(initial: f64) -> Self {
        Self {
            initial,
            current: initial,
        }
    }

    pub fn initial(&self) -> f64 {
        self.initial
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn apply(&mut self, profit: f64) {
        self.current += profit;
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// A named staking policy with its own bankroll.
#[derive(Debug, Clone)]
pub struct StakingStrategy {
    name: String,
    policy: StakingPolicy,
    bankroll: Bankroll,
}

impl StakingStrategy {
    pub fn new(name: impl Into<String>, policy: StakingPolicy, initial_bankroll: f64) -> Result<Self> {
        validate_positive("initial_bankroll", initial_bankroll)?;
        policy.validate()?;
        Ok(Self {
            name: name.into(),
            policy,
            bankroll: Bankroll::new(initial_bankroll),
        })
    }

    pub fn flat(bet_amount: f64, initial_bankroll: f64) -> Result<Self> {
        Self::new(
            StrategyKind::Flat.display_name(),
            StakingPolicy::Flat { bet_amount },
            initial_bankroll,
        )
    }

    pub fn kelly(
        fraction: f64,
        min_bet: f64,
        max_bet_fraction: f64,
        max_bet_absolute: f64,
        initial_bankroll: f64,
    ) -> Result<Self> {
        Self::new(
            StrategyKind::Kelly.display_name(),
            StakingPolicy::Kelly {
                fraction,
                min_bet,
                max_bet_fraction,
                max_bet_absolute,
            },
            initial_bankroll,
        )
    }

    pub fn value(min_edge: f64, bet_amount: f64, initial_bankroll: f64) -> Result<Self> {
        Self::new(
            StrategyKind::Value.display_name(),
            StakingPolicy::Value {
                min_edge,
                bet_amount,
            },
            initial_bankroll,
        )
    }

    pub fn confidence(
        min_probability: f64,
        base_bet: f64,
        max_bet: f64,
        initial_bankroll: f64,
    ) -> Result<Self> {
        Self::new(
            StrategyKind::Confidence.display_name(),
            StakingPolicy::Confidence {
                min_probability,
                base_bet,
                max_bet,
            },
            initial_bankroll,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StrategyKind {
        self.policy.kind()
    }

    pub fn policy(&self) -> &StakingPolicy {
        &self.policy
    }

    pub fn bankroll(&self) -> f64 {
        self.bankroll.current()
    }

    pub fn initial_bankroll(&self) -> f64 {
        self.bankroll.initial()
    }

    /// Stake for a runner, or 0.0 to decline.
    ///
    /// Non-finite inputs and stakes the bankroll cannot cover are declined.
    pub fn calculate_bet(&self, win_probability: f64, decimal_odds: f64) -> f64 {
        if !win_probability.is_finite() || !decimal_odds.is_finite() {
            return 0.0;
        }
        let stake = self
            .policy
            .raw_stake(win_probability, decimal_odds, self.bankroll.current());
        if self.can_bet(stake) {
            stake
        } else {
            0.0
        }
    }

    /// True iff `bankroll >= amount > 0`.
    pub fn can_bet(&self, amount: f64) -> bool {
        amount > 0.0 && self.bankroll.current() >= amount
    }

    /// Apply a settled bet's profit (negative for a loss).
    pub fn settle(&mut self, profit: f64) {
        self.bankroll.apply(profit);
    }

    pub fn reset(&mut self) {
        self.bankroll.reset();
    }
}
