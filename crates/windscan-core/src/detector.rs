use std::collections::{BTreeMap, HashMap};

use polars::prelude::*;

use crate::config::DetectorConfig;
use crate::deviation::POWER_DIFF_COLUMN;

pub const STAGE1_COLUMN: &str = "stage1_flag";
pub const CROSS_DEVIATION_COLUMN: &str = "cross_turbine_deviation";
pub const ANOMALY_COLUMN: &str = "anomaly_flag";

#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub dataframe: DataFrame,
    pub stats: DetectionStats,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionStats {
    pub total_records: usize,
    pub stage1_candidates: usize,
    pub confirmed_anomalies: usize,
    pub anomalies_by_turbine: BTreeMap<String, usize>,
}

/// Two-stage anomaly scan over a record set carrying `power_diff`.
///
/// Stage 1 flags any record whose absolute power difference exceeds
/// `abs_threshold`. Stage 2 re-examines each flagged record against all
/// turbines sharing its timestamp: the record is confirmed only if its
/// deviation from the group median exceeds `mad_multiplier` MADs. Groups
/// that are too small to compare, or whose spread is exactly zero (a
/// farm-wide event hitting every turbine alike), confirm nothing.
///
/// Flagging is additive annotation: no rows are dropped, three columns are
/// appended.
pub fn detect_anomalies(
    df: &DataFrame,
    turbine_column: &str,
    timestamp_column: &str,
    config: &DetectorConfig,
) -> Result<DetectionResult, PolarsError> {
    let len = df.height();
    let diffs = df.column(POWER_DIFF_COLUMN)?.f64()?;
    let timestamps = df.column(timestamp_column)?.datetime()?;
    let turbines = df.column(turbine_column)?.str()?;

    // Stage 1: context-free magnitude check. Null differences stay null and
    // are excluded from stage 2 entirely.
    let mut stage1: Vec<Option<bool>> = Vec::with_capacity(len);
    for idx in 0..len {
        stage1.push(diffs.get(idx).map(|d| d.abs() > config.abs_threshold));
    }

    // The stage-2 population at a timestamp is every turbine with a non-null
    // difference there, not just the candidates.
    let mut groups: HashMap<i64, Vec<usize>> = HashMap::new();
    for idx in 0..len {
        if let (Some(ts), Some(_)) = (timestamps.get(idx), diffs.get(idx)) {
            groups.entry(ts).or_default().push(idx);
        }
    }

    let mut cross_deviation: Vec<Option<f64>> = vec![None; len];
    let mut anomaly: Vec<bool> = vec![false; len];

    for indices in groups.values() {
        if indices.len() < config.min_group_size {
            // a robust spread is undefined for a group this small; pass
            // candidates through unconfirmed
            continue;
        }

        let mut population: Vec<f64> = indices.iter().filter_map(|&idx| diffs.get(idx)).collect();
        let center = median(&mut population);
        let mut abs_deviations: Vec<f64> =
            population.iter().map(|d| (d - center).abs()).collect();
        let mad = median(&mut abs_deviations);
        if mad == 0.0 {
            // degenerate spread: all peers agree, nothing is confirmable
            continue;
        }

        for &idx in indices {
            if stage1[idx] != Some(true) {
                continue;
            }
            let Some(diff) = diffs.get(idx) else { continue };
            let deviation = (diff - center).abs() / mad;
            cross_deviation[idx] = Some(deviation);
            anomaly[idx] = deviation > config.mad_multiplier;
        }
    }

    let mut stats = DetectionStats {
        total_records: len,
        ..Default::default()
    };
    for idx in 0..len {
        if stage1[idx] == Some(true) {
            stats.stage1_candidates += 1;
        }
        if anomaly[idx] {
            stats.confirmed_anomalies += 1;
            if let Some(turbine) = turbines.get(idx) {
                *stats
                    .anomalies_by_turbine
                    .entry(turbine.to_string())
                    .or_insert(0) += 1;
            }
        }
    }

    let mut output = df.clone();
    let mut columns = [
        Series::new(STAGE1_COLUMN.into(), stage1).into(),
        Series::new(CROSS_DEVIATION_COLUMN.into(), cross_deviation).into(),
        Series::new(ANOMALY_COLUMN.into(), anomaly).into(),
    ];
    output.hstack_mut(columns.as_mut_slice())?;

    Ok(DetectionResult {
        dataframe: output,
        stats,
    })
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
