use polars::prelude::DataFrame;
use tracing::info;

use crate::config::ScanConfig;
use crate::detector::{self, DetectionStats};
use crate::deviation;
use crate::error::Result;
use crate::reconcile;
use crate::schema::{self, CoercionReport};

pub struct ScanOutput {
    pub dataframe: DataFrame,
    pub coercions: CoercionReport,
    pub stats: DetectionStats,
}

/// Runs the full batch transform: normalize the raw records, reconcile each
/// turbine onto the nominal cadence, compute per-row power differences, then
/// apply the two-stage anomaly scan. The output table keeps every
/// reconciled row and appends the four derived columns.
pub fn run_scan(raw: &DataFrame, config: &ScanConfig) -> Result<ScanOutput> {
    config.validate()?;

    let (typed, coercions) = schema::normalize(raw, &config.schema)?;
    let reconciled = reconcile::reconcile_cadence(
        &typed,
        &config.schema.turbine_column,
        &config.schema.timestamp_column,
        config.cadence(),
    )?;
    let with_diff = deviation::with_power_diff(
        &reconciled,
        &config.actual_power_column,
        &config.expected_power_column,
    )?;
    let detection = detector::detect_anomalies(
        &with_diff,
        &config.schema.turbine_column,
        &config.schema.timestamp_column,
        &config.detector,
    )?;

    info!(
        rows = detection.stats.total_records,
        stage1_candidates = detection.stats.stage1_candidates,
        confirmed_anomalies = detection.stats.confirmed_anomalies,
        coerced = coercions.total(),
        "scan complete"
    );

    Ok(ScanOutput {
        dataframe: detection.dataframe,
        coercions,
        stats: detection.stats,
    })
}
