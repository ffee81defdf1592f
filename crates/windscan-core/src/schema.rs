use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::Deserialize;
use tracing::warn;

use crate::error::{PipelineError, Result};

pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A numeric column and the range of values considered physically plausible
/// for it. Anything outside the range is nulled during normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct MeasureSpec {
    pub column: String,
    #[serde(default = "neg_infinity")]
    pub valid_min: f64,
    #[serde(default = "infinity")]
    pub valid_max: f64,
}

impl MeasureSpec {
    pub fn unbounded(column: &str) -> Self {
        Self {
            column: column.to_string(),
            valid_min: f64::NEG_INFINITY,
            valid_max: f64::INFINITY,
        }
    }
}

/// Declares how a raw SCADA export maps onto the typed table: which columns
/// carry the turbine identifier and the timestamp, and which columns are
/// numeric measures. Undeclared columns pass through untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSchema {
    #[serde(default = "default_turbine_column")]
    pub turbine_column: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    #[serde(default = "default_measures")]
    pub measures: Vec<MeasureSpec>,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            turbine_column: default_turbine_column(),
            timestamp_column: default_timestamp_column(),
            timestamp_format: default_timestamp_format(),
            measures: default_measures(),
        }
    }
}

fn default_turbine_column() -> String {
    "turbine_id".to_string()
}

fn default_timestamp_column() -> String {
    "timestamp".to_string()
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

fn default_measures() -> Vec<MeasureSpec> {
    vec![
        MeasureSpec {
            column: "actual_power".to_string(),
            valid_min: -5_000.0,
            valid_max: 50_000.0,
        },
        MeasureSpec {
            column: "expected_power".to_string(),
            valid_min: -5_000.0,
            valid_max: 50_000.0,
        },
    ]
}

fn neg_infinity() -> f64 {
    f64::NEG_INFINITY
}

fn infinity() -> f64 {
    f64::INFINITY
}

/// Per-column counts of values nulled because they failed to parse or fell
/// outside the declared range.
#[derive(Debug, Clone, Default)]
pub struct CoercionReport {
    pub rejected: BTreeMap<String, usize>,
}

impl CoercionReport {
    pub fn total(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Reads a raw export with schema inference disabled so every column arrives
/// as a string; typing is the normalizer's job.
pub fn read_raw_csv(path: &Path) -> Result<DataFrame> {
    let file = std::fs::File::open(path)?;
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(file)
        .finish()?;
    Ok(df)
}

/// Turns a raw record set into a typed one: timestamps become Datetime[us]
/// (unparseable values abort with row context), declared measures become
/// Float64 with out-of-range and mistyped cells nulled and tallied. Row
/// count and row order are preserved.
pub fn normalize(raw: &DataFrame, schema: &TableSchema) -> Result<(DataFrame, CoercionReport)> {
    let height = raw.height();
    let mut output = raw.clone();
    let mut report = CoercionReport::default();

    let turbine = raw.column(&schema.turbine_column)?.cast(&DataType::String)?;
    output.replace(
        &schema.turbine_column,
        turbine.as_materialized_series().clone(),
    )?;

    let ts_raw = raw.column(&schema.timestamp_column)?.str()?;
    let mut ts_micros: Vec<i64> = Vec::with_capacity(height);
    for idx in 0..height {
        let value = ts_raw.get(idx).unwrap_or("");
        let parsed = NaiveDateTime::parse_from_str(value.trim(), &schema.timestamp_format)
            .map_err(|_| PipelineError::TimestampParse {
                row: idx,
                value: value.to_string(),
            })?;
        ts_micros.push(naive_to_micros(parsed));
    }
    let ts_series = Series::new(schema.timestamp_column.as_str().into(), ts_micros)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?;
    output.replace(&schema.timestamp_column, ts_series)?;

    for measure in &schema.measures {
        let column = raw.column(&measure.column)?;
        let (values, rejected) = coerce_measure(column, measure)?;
        if rejected > 0 {
            warn!(
                column = measure.column.as_str(),
                rejected, "nulled out-of-range or mistyped values"
            );
            report.rejected.insert(measure.column.clone(), rejected);
        }
        output.replace(
            &measure.column,
            Series::new(measure.column.as_str().into(), values),
        )?;
    }

    Ok((output, report))
}

fn coerce_measure(column: &Column, spec: &MeasureSpec) -> Result<(Vec<Option<f64>>, usize)> {
    let mut values: Vec<Option<f64>> = Vec::with_capacity(column.len());
    let mut rejected = 0usize;

    match column.dtype() {
        DataType::String => {
            let chunked = column.str()?;
            for idx in 0..chunked.len() {
                match chunked.get(idx) {
                    None => values.push(None),
                    Some(text) => {
                        let trimmed = text.trim();
                        if trimmed.is_empty() {
                            // missing, not mistyped
                            values.push(None);
                            continue;
                        }
                        match trimmed.parse::<f64>() {
                            Ok(parsed) if parsed >= spec.valid_min && parsed <= spec.valid_max => {
                                values.push(Some(parsed));
                            }
                            _ => {
                                values.push(None);
                                rejected += 1;
                            }
                        }
                    }
                }
            }
        }
        _ => {
            let casted = column.cast(&DataType::Float64)?;
            let chunked = casted.f64()?;
            for idx in 0..chunked.len() {
                match chunked.get(idx) {
                    None => values.push(None),
                    Some(value) if value >= spec.valid_min && value <= spec.valid_max => {
                        values.push(Some(value));
                    }
                    Some(_) => {
                        values.push(None);
                        rejected += 1;
                    }
                }
            }
        }
    }

    Ok((values, rejected))
}

fn naive_to_micros(value: NaiveDateTime) -> i64 {
    let dt_utc = value.and_utc();
    dt_utc.timestamp() * 1_000_000 + i64::from(dt_utc.timestamp_subsec_nanos() / 1_000)
}
