use std::collections::HashSet;

use chrono::Duration;
use polars::prelude::*;

use crate::error::{PipelineError, Result};

/// Repairs the temporal structure of a typed record set: per turbine,
/// duplicate timestamps collapse to their first occurrence and every missing
/// cadence slot between the turbine's first and last observation is
/// materialized as a row with null measures.
///
/// Turbines are reconciled independently (partition, transform, concat), so
/// one turbine's history can never leak into another's.
pub fn reconcile_cadence(
    df: &DataFrame,
    turbine_column: &str,
    timestamp_column: &str,
    cadence: Duration,
) -> Result<DataFrame> {
    let step = cadence.num_microseconds().unwrap_or(0);
    if step <= 0 {
        return Err(PipelineError::Config(format!(
            "nominal cadence must be positive, got {cadence}"
        )));
    }

    if df.is_empty() {
        return Ok(df.clone());
    }

    let partitions = df.partition_by_stable([turbine_column], true)?;
    let mut parts = partitions.into_iter();
    let Some(first) = parts.next() else {
        return Ok(df.clear());
    };

    let mut output = reconcile_partition(&first, turbine_column, timestamp_column, step)?;
    for partition in parts {
        let reconciled = reconcile_partition(&partition, turbine_column, timestamp_column, step)?;
        output.vstack_mut(&reconciled)?;
    }

    Ok(output)
}

fn reconcile_partition(
    partition: &DataFrame,
    turbine_column: &str,
    timestamp_column: &str,
    step: i64,
) -> Result<DataFrame> {
    // Stable sort keeps original row order among equal timestamps, so
    // keep-first below means first by input order.
    let sorted = partition.sort(
        [timestamp_column],
        SortMultipleOptions::default().with_maintain_order(true),
    )?;

    let timestamps = sorted.column(timestamp_column)?.datetime()?;
    let mut seen: HashSet<i64> = HashSet::with_capacity(timestamps.len());
    let mut keep: Vec<bool> = Vec::with_capacity(timestamps.len());
    for idx in 0..timestamps.len() {
        match timestamps.get(idx) {
            Some(value) => keep.push(seen.insert(value)),
            None => keep.push(false),
        }
    }
    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    let deduped = sorted.filter(&mask)?;

    let timestamps = deduped.column(timestamp_column)?.datetime()?;
    let (Some(min), Some(max)) = (timestamps.min(), timestamps.max()) else {
        return Ok(deduped);
    };

    let mut slots: Vec<i64> = Vec::with_capacity(((max - min) / step + 1) as usize);
    let mut slot = min;
    while slot <= max {
        slots.push(slot);
        slot += step;
    }

    let turbine_id = deduped
        .column(turbine_column)?
        .str()?
        .get(0)
        .map(|id| id.to_string());

    let slot_lf = df![timestamp_column => slots]?
        .lazy()
        .with_column(
            col(timestamp_column).cast(DataType::Datetime(TimeUnit::Microseconds, None)),
        );

    let mut joined = slot_lf.join(
        deduped.lazy(),
        [col(timestamp_column)],
        [col(timestamp_column)],
        JoinArgs::new(JoinType::Left),
    );

    // Filled slots carry nulls in every measure column but still belong to
    // this turbine.
    if let Some(id) = turbine_id {
        joined = joined.with_column(col(turbine_column).fill_null(lit(id)));
    }

    let reconciled = joined.collect()?;
    let reconciled = reconciled.select(partition.get_column_names_owned())?;
    Ok(reconciled)
}

/// Reports runs of consecutive missing cadence slots per turbine, without
/// modifying the data. A run shorter than `min_gap_size` is not reported.
///
/// Output columns: `turbine_id`, `gap_start`, `gap_end`, `missing_records`.
pub fn find_gaps(
    df: &DataFrame,
    turbine_column: &str,
    timestamp_column: &str,
    cadence: Duration,
    min_gap_size: usize,
) -> Result<DataFrame> {
    let step = cadence.num_microseconds().unwrap_or(0);
    if step <= 0 {
        return Err(PipelineError::Config(format!(
            "nominal cadence must be positive, got {cadence}"
        )));
    }

    let mut gap_turbines: Vec<Option<String>> = Vec::new();
    let mut gap_starts: Vec<i64> = Vec::new();
    let mut gap_ends: Vec<i64> = Vec::new();
    let mut gap_sizes: Vec<i64> = Vec::new();

    if !df.is_empty() {
        for partition in df.partition_by_stable([turbine_column], true)? {
            let turbine_id = partition
                .column(turbine_column)?
                .str()?
                .get(0)
                .map(|id| id.to_string());

            let timestamps = partition.column(timestamp_column)?.datetime()?;
            let mut observed: HashSet<i64> = HashSet::with_capacity(timestamps.len());
            for idx in 0..timestamps.len() {
                if let Some(value) = timestamps.get(idx) {
                    observed.insert(value);
                }
            }

            let (Some(&min), Some(&max)) =
                (observed.iter().min(), observed.iter().max())
            else {
                continue;
            };

            let mut run_start: Option<i64> = None;
            let mut run_end = 0i64;
            let mut run_len = 0usize;
            let mut slot = min;
            while slot <= max {
                if observed.contains(&slot) {
                    if let Some(start) = run_start.take() {
                        if run_len >= min_gap_size {
                            gap_turbines.push(turbine_id.clone());
                            gap_starts.push(start);
                            gap_ends.push(run_end);
                            gap_sizes.push(run_len as i64);
                        }
                        run_len = 0;
                    }
                } else {
                    if run_start.is_none() {
                        run_start = Some(slot);
                    }
                    run_end = slot;
                    run_len += 1;
                }
                slot += step;
            }
            // observed max always terminates the final run
        }
    }

    let gaps = df![
        "turbine_id" => gap_turbines,
        "gap_start" => gap_starts,
        "gap_end" => gap_ends,
        "missing_records" => gap_sizes,
    ]?
    .lazy()
    .with_columns([
        col("gap_start").cast(DataType::Datetime(TimeUnit::Microseconds, None)),
        col("gap_end").cast(DataType::Datetime(TimeUnit::Microseconds, None)),
    ])
    .collect()?;

    Ok(gaps)
}
