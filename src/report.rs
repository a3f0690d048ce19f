//! Console tables and CSV export of backtest results.

use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::analysis::SegmentReport;
use crate::backtest::BacktestReport;
use crate::dataset::{float_column, integer_column, read_frame};
use crate::error::{BacktestError, Result};
use crate::metrics::{PerformanceMetrics, StrategyComparison};
use crate::simulator::{BetRecord, Ledger};
use crate::split::SplitSummary;
use crate::types::{PAYOFF_COLUMN, RACE_ID_COLUMN, RUNNER_ID_COLUMN};

pub const COMPARISON_FILE: &str = "strategy_comparison.csv";

/// Lowercase file-name stem for a strategy name ("Flat Betting" -> "flat_betting").
pub fn safe_file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            stem.push(c.to_ascii_lowercase());
        } else if !stem.ends_with('_') {
            stem.push('_');
        }
    }
    stem.trim_matches('_').to_string()
}

pub fn ledger_file_name(strategy_name: &str) -> String {
    format!("backtest_{}.csv", safe_file_stem(strategy_name))
}

pub fn metrics_file_name(strategy_name: &str) -> String {
    format!("metrics_{}.csv", safe_file_stem(strategy_name))
}

fn write_frame(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

fn ledger_frame(ledger: &Ledger) -> Result<DataFrame> {
    let rows = ledger.rows();
    let df = df!(
        RACE_ID_COLUMN => rows.iter().map(|r| r.bet.race_id).collect::<Vec<i64>>(),
        RUNNER_ID_COLUMN => rows.iter().map(|r| r.bet.runner_id).collect::<Vec<i64>>(),
        "bet_amount" => rows.iter().map(|r| r.bet.bet_amount).collect::<Vec<f64>>(),
        "win_probability" => rows.iter().map(|r| r.bet.win_probability).collect::<Vec<f64>>(),
        "decimal_odds" => rows.iter().map(|r| r.bet.decimal_odds).collect::<Vec<f64>>(),
        "actual_win" => rows.iter().map(|r| r.bet.actual_win as i64).collect::<Vec<i64>>(),
        PAYOFF_COLUMN => rows.iter().map(|r| r.bet.win_payoff).collect::<Vec<f64>>(),
        "return_amount" => rows.iter().map(|r| r.bet.return_amount).collect::<Vec<f64>>(),
        "profit" => rows.iter().map(|r| r.bet.profit).collect::<Vec<f64>>(),
        "bankroll" => rows.iter().map(|r| r.bankroll).collect::<Vec<f64>>(),
        "cumulative_profit" => rows.iter().map(|r| r.cumulative_profit).collect::<Vec<f64>>(),
        "cumulative_stake" => rows.iter().map(|r| r.cumulative_stake).collect::<Vec<f64>>(),
        "running_roi" => rows.iter().map(|r| r.running_roi).collect::<Vec<f64>>()
    )?;
    Ok(df)
}

pub fn write_ledger_csv(ledger: &Ledger, path: &Path) -> Result<()> {
    let mut df = ledger_frame(ledger)?;
    write_frame(&mut df, path)
}

pub fn write_metrics_csv(metrics: &PerformanceMetrics, path: &Path) -> Result<()> {
    let rows = metrics.to_rows();
    let mut df = df!(
        "metric" => rows.iter().map(|(k, _)| *k).collect::<Vec<&str>>(),
        "value" => rows.iter().map(|(_, v)| v.as_str()).collect::<Vec<&str>>()
    )?;
    write_frame(&mut df, path)
}

pub fn write_comparison_csv(comparison: &StrategyComparison, path: &Path) -> Result<()> {
    let rows = &comparison.rows;
    let mut df = df!(
        "strategy" => rows.iter().map(|r| r.strategy.as_str()).collect::<Vec<&str>>(),
        "total_bets" => rows.iter().map(|r| r.total_bets as u64).collect::<Vec<u64>>(),
        "win_rate" => rows.iter().map(|r| r.win_rate).collect::<Vec<f64>>(),
        "total_wagered" => rows.iter().map(|r| r.total_wagered).collect::<Vec<f64>>(),
        "total_profit" => rows.iter().map(|r| r.total_profit).collect::<Vec<f64>>(),
        "roi" => rows.iter().map(|r| r.roi).collect::<Vec<f64>>(),
        "final_bankroll" => rows.iter().map(|r| r.final_bankroll).collect::<Vec<f64>>(),
        "max_drawdown" => rows.iter().map(|r| r.max_drawdown).collect::<Vec<f64>>(),
        "sharpe_ratio" => rows.iter().map(|r| r.sharpe_ratio).collect::<Vec<f64>>(),
        "profit_factor" => rows.iter().map(|r| r.profit_factor.to_string()).collect::<Vec<String>>()
    )?;
    write_frame(&mut df, path)
}

/// Write every ledger, per-strategy metrics and the comparison table into `dir`.
pub fn write_backtest_outputs(report: &BacktestReport, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    for run in &report.runs {
        let ledger_path = dir.join(ledger_file_name(&run.strategy_name));
        write_ledger_csv(&run.ledger, &ledger_path)?;
        written.push(ledger_path);

        let metrics_path = dir.join(metrics_file_name(&run.strategy_name));
        write_metrics_csv(&run.metrics, &metrics_path)?;
        written.push(metrics_path);
    }

    let comparison_path = dir.join(COMPARISON_FILE);
    write_comparison_csv(&report.comparison, &comparison_path)?;
    written.push(comparison_path);

    info!("Wrote {} files to {}", written.len(), dir.display());
    Ok(written)
}

fn required_values<T: Copy>(values: Vec<Option<T>>, name: &str) -> Result<Vec<T>> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| BacktestError::data(format!("row {}: missing '{}'", i, name)))
        })
        .collect()
}

/// Read an exported ledger back.
///
/// The initial bankroll is recovered from the first row's `bankroll` and
/// `cumulative_profit` columns when present, else `fallback_bankroll` is used.
/// Running columns are recomputed from the bets.
pub fn read_ledger_csv(path: &Path, fallback_bankroll: f64) -> Result<Ledger> {
    let df = read_frame(path)?;

    let column = |name: &str| -> Result<Vec<f64>> { required_values(float_column(&df, name)?, name) };

    let race_ids = required_values(integer_column(&df, RACE_ID_COLUMN)?, RACE_ID_COLUMN)?;
    let runner_ids = required_values(integer_column(&df, RUNNER_ID_COLUMN)?, RUNNER_ID_COLUMN)?;
    let actual_win = required_values(integer_column(&df, "actual_win")?, "actual_win")?;
    let bet_amount = column("bet_amount")?;
    let win_probability = column("win_probability")?;
    let decimal_odds = column("decimal_odds")?;
    let return_amount = column("return_amount")?;
    let profit = column("profit")?;
    let win_payoff = if df.column(PAYOFF_COLUMN).is_ok() {
        float_column(&df, PAYOFF_COLUMN)?
            .into_iter()
            .map(|v| v.unwrap_or(0.0))
            .collect()
    } else {
        vec![0.0; df.height()]
    };

    let initial_bankroll = if df.column("bankroll").is_ok() && df.column("cumulative_profit").is_ok() {
        match (
            float_column(&df, "bankroll")?.first().copied().flatten(),
            float_column(&df, "cumulative_profit")?.first().copied().flatten(),
        ) {
            (Some(bankroll), Some(cumulative)) => bankroll - cumulative,
            _ => fallback_bankroll,
        }
    } else {
        fallback_bankroll
    };

    let bets: Vec<BetRecord> = (0..df.height())
        .map(|i| BetRecord {
            race_id: race_ids[i],
            runner_id: runner_ids[i],
            bet_amount: bet_amount[i],
            win_probability: win_probability[i],
            decimal_odds: decimal_odds[i],
            actual_win: actual_win[i] != 0,
            win_payoff: win_payoff[i],
            return_amount: return_amount[i],
            profit: profit[i],
        })
        .collect();

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("ledger")
        .to_string();

    info!("Read {} bets from {}", bets.len(), path.display());
    Ok(Ledger::from_bets(name, initial_bankroll, bets))
}

pub fn print_split_summary(summary: &SplitSummary) {
    println!("=== Chronological Split ===");
    println!();
    println!("  Train ratio:   {:.2}", summary.train_ratio);
    println!(
        "  Train:         {} runners, {} wins ({:.2}%)",
        summary.train_size,
        summary.train_wins,
        summary.train_win_rate * 100.0
    );
    println!(
        "  Test:          {} runners, {} wins ({:.2}%)",
        summary.test_size,
        summary.test_wins,
        summary.test_win_rate * 100.0
    );
    if let (Some(last), Some(first)) = (summary.last_train_race, summary.first_test_race) {
        println!("  Boundary:      race {} | race {}", last, first);
    }
    if summary.pending_dropped > 0 || summary.incomplete_dropped > 0 {
        println!(
            "  Dropped:       {} pending, {} incomplete",
            summary.pending_dropped, summary.incomplete_dropped
        );
    }
    println!();
}

pub fn print_metrics_table(strategy_name: &str, m: &PerformanceMetrics) {
    println!("=== {} ===", strategy_name);
    println!();
    println!("  Total Bets:      {}", m.total_bets);
    println!(
        "  Wins / Losses:   {} / {} ({:.2}%)",
        m.winning_bets, m.losing_bets, m.win_rate
    );
    println!("  Total Wagered:   ${:.2}", m.total_wagered);
    println!("  Total Returned:  ${:.2}", m.total_returned);
    println!("  Profit:          ${:+.2}", m.total_profit);
    println!("  ROI:             {:+.2}%", m.roi);
    println!(
        "  Bankroll:        ${:.2} -> ${:.2} ({:+.2}%)",
        m.initial_bankroll, m.final_bankroll, m.bankroll_growth
    );
    println!("  Avg Bet:         ${:.2}", m.avg_bet);
    println!("  Avg Odds:        {:.2}", m.avg_odds);
    println!("  Avg Win Prob:    {:.2}%", m.avg_win_probability * 100.0);
    println!("  Max Drawdown:    {:.2}%", m.max_drawdown);
    println!("  Sharpe Ratio:    {:.3}", m.sharpe_ratio);
    println!("  Profit Factor:   {:.3}", m.profit_factor);
    println!(
        "  Streaks:         {} wins / {} losses",
        m.max_win_streak, m.max_loss_streak
    );
    println!();
}

pub fn print_comparison_table(comparison: &StrategyComparison) {
    println!("=== Strategy Comparison (by ROI) ===");
    println!();
    if comparison.is_empty() {
        println!("  No strategy placed any bets.");
        println!();
        return;
    }

    println!(
        "  {:20} {:>6} {:>8} {:>10} {:>10} {:>8} {:>10} {:>8} {:>8} {:>8}",
        "Strategy", "Bets", "Win%", "Wagered", "Profit", "ROI", "Bankroll", "MaxDD", "Sharpe", "PF"
    );
    println!("  {}", "-".repeat(106));
    for row in &comparison.rows {
        println!(
            "  {:20} {:>6} {:>7.2}% {:>10.2} {:>+10.2} {:>+7.2}% {:>10.2} {:>7.2}% {:>8.3} {:>8.3}",
            row.strategy,
            row.total_bets,
            row.win_rate,
            row.total_wagered,
            row.total_profit,
            row.roi,
            row.final_bankroll,
            row.max_drawdown,
            row.sharpe_ratio,
            row.profit_factor
        );
    }
    println!();

    if let Some(best) = comparison.best() {
        println!("  Best: {} (ROI {:+.2}%)", best.strategy, best.roi);
        println!();
    }
}

pub fn print_segment_report(report: &SegmentReport) {
    let Some(overall) = &report.overall else {
        println!("No bets to analyze.");
        return;
    };

    println!(
        "OVERALL: {} bets, {} wins ({:.1}%), ROI: {:+.1}%",
        overall.bets, overall.wins, overall.win_rate, overall.roi
    );
    println!();

    for (title, segments) in [
        ("PERFORMANCE BY ODDS RANGE", &report.by_odds),
        ("PERFORMANCE BY MODEL CONFIDENCE", &report.by_probability),
    ] {
        println!("{}:", title);
        println!("  {:20} {:>6} {:>6} {:>7} {:>8}", "Segment", "Bets", "Wins", "Win%", "ROI");
        println!("  {}", "-".repeat(51));
        for s in segments {
            println!(
                "  {:20} {:>6} {:>6} {:>6.1}% {:>+7.1}%",
                s.label, s.bets, s.wins, s.win_rate, s.roi
            );
        }
        println!();
    }

    if let Some(high) = &report.high_confidence {
        println!("HIGH CONFIDENCE ONLY (>=25% probability):");
        println!(
            "  Bets: {}, Wins: {} ({:.1}%), ROI: {:+.1}%",
            high.bets, high.wins, high.win_rate, high.roi
        );
        println!();
    }

    if !report.calibration.is_empty() {
        println!("CALIBRATION CHECK:");
        println!("  {:20} {:>10} {:>10} {:>10}", "Bucket", "Predicted", "Actual", "Diff");
        println!("  {}", "-".repeat(53));
        for b in &report.calibration {
            println!(
                "  {:20} {:>9.1}% {:>9.1}% {:>+9.1}%",
                b.label, b.predicted, b.actual, b.difference
            );
        }
        println!();
    }
}
