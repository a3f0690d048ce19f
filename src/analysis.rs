//! Ledger breakdown by odds range and model confidence.

use serde::{Deserialize, Serialize};

use crate::simulator::BetRecord;

/// Odds ranges, lower bound inclusive, upper exclusive.
pub const ODDS_SEGMENTS: [(f64, f64, &str); 5] = [
    (1.0, 3.0, "Favorite (1-3)"),
    (3.0, 6.0, "2nd tier (3-6)"),
    (6.0, 10.0, "Mid (6-10)"),
    (10.0, 20.0, "Longshot (10-20)"),
    (20.0, 50.0, "Big shot (20-50)"),
];

/// Probability buckets. The last bucket also includes 1.0.
pub const PROBABILITY_SEGMENTS: [(f64, f64, &str); 5] = [
    (0.0, 0.1, "Very Low (<10%)"),
    (0.1, 0.2, "Low (10-20%)"),
    (0.2, 0.3, "Medium (20-30%)"),
    (0.3, 0.5, "High (30-50%)"),
    (0.5, 1.0, "Very High (>50%)"),
];

pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.25;

/// Buckets with fewer bets are left out of the calibration check.
pub const MIN_CALIBRATION_BETS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub label: String,
    pub bets: usize,
    pub wins: usize,
    /// Percent
    pub win_rate: f64,
    /// Percent
    pub roi: f64,
}

impl SegmentStats {
    fn from_bets(label: &str, bets: &[&BetRecord]) -> Option<Self> {
        if bets.is_empty() {
            return None;
        }
        let wins = bets.iter().filter(|b| b.won()).count();
        let wagered: f64 = bets.iter().map(|b| b.bet_amount).sum();
        let profit: f64 = bets.iter().map(|b| b.profit).sum();

        Some(Self {
            label: label.to_string(),
            bets: bets.len(),
            wins,
            win_rate: wins as f64 / bets.len() as f64 * 100.0,
            roi: if wagered > 0.0 {
                profit / wagered * 100.0
            } else {
                0.0
            },
        })
    }
}

/// Mean predicted probability against realized win rate for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub label: String,
    pub bets: usize,
    pub predicted: f64,
    pub actual: f64,
    /// `actual - predicted`, percentage points
    pub difference: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentReport {
    pub overall: Option<SegmentStats>,
    pub by_odds: Vec<SegmentStats>,
    pub by_probability: Vec<SegmentStats>,
    pub high_confidence: Option<SegmentStats>,
    pub calibration: Vec<CalibrationBucket>,
}

fn in_probability_bucket(p: f64, low: f64, high: f64) -> bool {
    if high >= 1.0 {
        p >= low && p <= high
    } else {
        p >= low && p < high
    }
}

fn select<'a>(bets: &[&'a BetRecord], pred: impl Fn(&BetRecord) -> bool) -> Vec<&'a BetRecord> {
    bets.iter().copied().filter(|b| pred(*b)).collect()
}

/// Break a ledger down by odds range and model confidence.
pub fn analyze_segments<'a, I>(bets: I) -> SegmentReport
where
    I: IntoIterator<Item = &'a BetRecord>,
{
    let bets: Vec<&BetRecord> = bets.into_iter().collect();

    let by_odds = ODDS_SEGMENTS
        .iter()
        .filter_map(|&(low, high, label)| {
            let subset = select(&bets, |b| b.decimal_odds >= low && b.decimal_odds < high);
            SegmentStats::from_bets(label, &subset)
        })
        .collect();

    let mut by_probability = Vec::new();
    let mut calibration = Vec::new();
    for &(low, high, label) in &PROBABILITY_SEGMENTS {
        let subset = select(&bets, |b| in_probability_bucket(b.win_probability, low, high));
        if let Some(stats) = SegmentStats::from_bets(label, &subset) {
            if subset.len() >= MIN_CALIBRATION_BETS {
                let predicted = subset.iter().map(|b| b.win_probability).sum::<f64>()
                    / subset.len() as f64
                    * 100.0;
                calibration.push(CalibrationBucket {
                    label: label.to_string(),
                    bets: subset.len(),
                    predicted,
                    actual: stats.win_rate,
                    difference: stats.win_rate - predicted,
                });
            }
            by_probability.push(stats);
        }
    }

    let high_confidence = SegmentStats::from_bets(
        "High confidence (>=25%)",
        &select(&bets, |b| b.win_probability >= HIGH_CONFIDENCE_THRESHOLD),
    );

    SegmentReport {
        overall: SegmentStats::from_bets("Overall", &bets),
        by_odds,
        by_probability,
        high_confidence,
        calibration,
    }
}
