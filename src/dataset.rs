//! Feature/outcome source loading.
//!
//! Reads the flat per-runner feature table (CSV or Parquet) produced by the
//! feature pipeline and turns it into [`HistoricalRunner`] rows.

use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{BacktestError, Result};
use crate::types::{
    HistoricalRunner, Outcome, NON_FEATURE_COLUMNS, ODDS_COLUMN, PAYOFF_COLUMN, RACE_ID_COLUMN,
    REQUIRED_COLUMNS, RUNNER_ID_COLUMN, TARGET_COLUMN,
};

/// Runners plus the feature column names, in vector order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub runners: Vec<HistoricalRunner>,
}

impl Dataset {
    pub fn new(feature_names: Vec<String>, runners: Vec<HistoricalRunner>) -> Self {
        Self {
            feature_names,
            runners,
        }
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Count of (wins, losses, pending) rows.
    pub fn outcome_counts(&self) -> (usize, usize, usize) {
        self.runners
            .iter()
            .fold((0, 0, 0), |(w, l, p), r| match r.outcome {
                Outcome::Won => (w + 1, l, p),
                Outcome::Lost => (w, l + 1, p),
                Outcome::Pending => (w, l, p + 1),
            })
    }

    /// Build a dataset from an in-memory frame.
    ///
    /// With `feature_names` the listed columns are used in that order (the
    /// classifier's training order); otherwise every numeric column outside
    /// [`NON_FEATURE_COLUMNS`] is a feature.
    pub fn from_frame(df: &DataFrame, feature_names: Option<&[String]>) -> Result<Self> {
        if df.height() == 0 {
            return Err(BacktestError::data("feature source contains no rows"));
        }

        for name in REQUIRED_COLUMNS {
            if df.column(name).is_err() {
                return Err(BacktestError::data(format!(
                    "missing required column '{}'",
                    name
                )));
            }
        }

        let feature_names: Vec<String> = match feature_names {
            Some(names) => names.to_vec(),
            None => infer_feature_columns(df),
        };

        let race_ids = integer_column(df, RACE_ID_COLUMN)?;
        let runner_ids = integer_column(df, RUNNER_ID_COLUMN)?;
        let targets = integer_column(df, TARGET_COLUMN)?;
        let odds = float_column(df, ODDS_COLUMN)?;
        let payoffs = if df.column(PAYOFF_COLUMN).is_ok() {
            Some(lenient_float_column(df, PAYOFF_COLUMN)?)
        } else {
            None
        };

        let mut feature_cols: Vec<Vec<Option<f64>>> = Vec::with_capacity(feature_names.len());
        for name in &feature_names {
            feature_cols.push(float_column(df, name)?);
        }

        let mut runners = Vec::with_capacity(df.height());
        let mut skipped = 0usize;

        for i in 0..df.height() {
            let (race_id, runner_id) = match (race_ids[i], runner_ids[i]) {
                (Some(race), Some(runner)) => (race, runner),
                _ => {
                    warn!("Row {}: missing race_id or runner_id, skipping", i);
                    skipped += 1;
                    continue;
                }
            };

            let outcome = match targets[i].and_then(Outcome::from_target) {
                Some(o) => o,
                None => {
                    warn!(
                        "Row {} (race {}, runner {}): unrecognized {} {:?}, skipping",
                        i, race_id, runner_id, TARGET_COLUMN, targets[i]
                    );
                    skipped += 1;
                    continue;
                }
            };

            let features: Vec<f64> = feature_cols
                .iter()
                .map(|col| col[i].unwrap_or(f64::NAN))
                .collect();

            let win_payoff = payoffs
                .as_ref()
                .and_then(|p| p[i])
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(0.0);

            runners.push(HistoricalRunner {
                race_id,
                runner_id,
                features,
                decimal_odds: odds[i],
                outcome,
                win_payoff,
            });
        }

        if skipped > 0 {
            warn!("Skipped {} malformed rows while loading", skipped);
        }

        Ok(Self::new(feature_names, runners))
    }
}

/// Load the feature/outcome table from a CSV or Parquet file.
pub fn load_dataset<P: AsRef<Path>>(path: P, feature_names: Option<&[String]>) -> Result<Dataset> {
    let path = path.as_ref();
    info!("Loading feature data from {}", path.display());

    let df = read_frame(path)?;
    debug!("Read {} rows, {} columns", df.height(), df.width());

    let dataset = Dataset::from_frame(&df, feature_names)?;
    let (wins, losses, pending) = dataset.outcome_counts();
    info!(
        "Loaded {} runners ({} wins, {} losses, {} pending), {} features",
        dataset.len(),
        wins,
        losses,
        pending,
        dataset.num_features()
    );

    Ok(dataset)
}

/// Read a frame, choosing the reader from the file extension.
pub fn read_frame(path: &Path) -> Result<DataFrame> {
    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("parquet"))
        .unwrap_or(false);

    let df = if is_parquet {
        LazyFrame::scan_parquet(path, Default::default())?.collect()?
    } else {
        CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?
    };

    Ok(df)
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Numeric columns that are not ids, labels or post-race values.
fn infer_feature_columns(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|c| is_numeric(c.dtype()))
        .map(|c| c.name().to_string())
        .filter(|name| !NON_FEATURE_COLUMNS.contains(&name.as_str()))
        .collect()
}

fn required_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column> {
    df.column(name)
        .map_err(|_| BacktestError::data(format!("missing required column '{}'", name)))
}

/// Read an id/label column as i64. String ids must parse as integers so they
/// keep a chronological ordering.
pub(crate) fn integer_column(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let series = required_column(df, name)?.as_materialized_series();

    let cast = match series.dtype() {
        dt if is_numeric(dt) => series.cast(&DataType::Int64)?,
        DataType::String => series.strict_cast(&DataType::Int64).map_err(|_| {
            BacktestError::data(format!(
                "column '{}' is not orderable: expected integer values",
                name
            ))
        })?,
        other => {
            return Err(BacktestError::data(format!(
                "column '{}' has unsupported type {}",
                name, other
            )))
        }
    };

    Ok(cast.i64()?.into_iter().collect())
}

pub(crate) fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = required_column(df, name)?.as_materialized_series();

    if !is_numeric(series.dtype()) {
        return Err(BacktestError::data(format!(
            "column '{}' must be numeric, got {}",
            name,
            series.dtype()
        )));
    }

    let cast = series.cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().collect())
}

/// Optional numeric column: non-numeric cells become null instead of failing the load.
fn lenient_float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = required_column(df, name)?.as_materialized_series();
    if is_numeric(series.dtype()) {
        return float_column(df, name);
    }

    let cast = series.cast(&DataType::Float64)?;
    let values: Vec<Option<f64>> = cast.f64()?.into_iter().collect();
    let unparsed = values
        .iter()
        .zip(series.is_null().into_iter())
        .filter(|(v, was_null)| v.is_none() && !was_null.unwrap_or(false))
        .count();
    warn!(
        "Column '{}' is {} rather than numeric ({} unparseable cells); missing values fall back to odds",
        name,
        series.dtype(),
        unparsed
    );
    Ok(values)
}
