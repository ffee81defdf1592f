use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;

use windscan_core::config::DetectorConfig;
use windscan_core::detector::{detect_anomalies, DetectionResult};
use windscan_core::deviation::with_power_diff;

fn parse_naive(ts: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").expect("parse timestamp")
}

fn naive_to_micros(dt: NaiveDateTime) -> i64 {
    let dt_utc = dt.and_utc();
    dt_utc.timestamp() * 1_000_000 + i64::from(dt_utc.timestamp_subsec_nanos() / 1_000)
}

/// One timestamp shared by every row, one row per turbine.
fn single_instant_frame(diffs: &[Option<f64>]) -> DataFrame {
    let instant = naive_to_micros(parse_naive("2024-05-01 12:00:00"));
    let turbines: Vec<String> = (0..diffs.len()).map(|idx| format!("T{:02}", idx + 1)).collect();

    df![
        "turbine_id" => turbines,
        "timestamp" => vec![instant; diffs.len()],
        "power_diff" => diffs.to_vec(),
    ]
    .expect("df")
    .lazy()
    .with_column(col("timestamp").cast(DataType::Datetime(TimeUnit::Microseconds, None)))
    .collect()
    .expect("collect")
}

fn assert_stage_ordering(result: &DetectionResult) {
    let stage1 = result
        .dataframe
        .column("stage1_flag")
        .unwrap()
        .bool()
        .unwrap();
    let anomaly = result
        .dataframe
        .column("anomaly_flag")
        .unwrap()
        .bool()
        .unwrap();
    for idx in 0..result.dataframe.height() {
        if anomaly.get(idx) == Some(true) {
            assert_eq!(stage1.get(idx), Some(true), "row {idx} confirmed without stage 1");
        }
    }
}

#[test]
fn farm_wide_event_is_suppressed() {
    // every turbine sees the same -500 kW shortfall (e.g. grid curtailment):
    // stage 1 fires everywhere, MAD is zero, nothing is confirmed
    let df = single_instant_frame(&[Some(-500.0); 5]);
    let config = DetectorConfig::new(100.0);

    let result = detect_anomalies(&df, "turbine_id", "timestamp", &config).expect("detect");

    let stage1 = result.dataframe.column("stage1_flag").unwrap().bool().unwrap();
    let anomaly = result.dataframe.column("anomaly_flag").unwrap().bool().unwrap();
    let deviation = result
        .dataframe
        .column("cross_turbine_deviation")
        .unwrap()
        .f64()
        .unwrap();
    for idx in 0..5 {
        assert_eq!(stage1.get(idx), Some(true));
        assert_eq!(anomaly.get(idx), Some(false));
        assert!(deviation.get(idx).is_none());
    }
    assert_eq!(result.stats.stage1_candidates, 5);
    assert_eq!(result.stats.confirmed_anomalies, 0);
    assert_stage_ordering(&result);
}

#[test]
fn lone_outlier_among_identical_peers_hits_degenerate_spread() {
    // {0,0,0,0,-400}: the median is 0 and so is the MAD, so even the obvious
    // outlier cannot be confirmed under the strict MAD rule
    let df = single_instant_frame(&[Some(0.0), Some(0.0), Some(0.0), Some(0.0), Some(-400.0)]);
    let config = DetectorConfig::new(100.0);

    let result = detect_anomalies(&df, "turbine_id", "timestamp", &config).expect("detect");

    let stage1 = result.dataframe.column("stage1_flag").unwrap().bool().unwrap();
    let anomaly = result.dataframe.column("anomaly_flag").unwrap().bool().unwrap();
    for idx in 0..4 {
        assert_eq!(stage1.get(idx), Some(false));
    }
    assert_eq!(stage1.get(4), Some(true));
    for idx in 0..5 {
        assert_eq!(anomaly.get(idx), Some(false));
    }
    assert_eq!(result.stats.confirmed_anomalies, 0);
    assert_stage_ordering(&result);
}

#[test]
fn isolated_outlier_with_real_spread_is_confirmed() {
    // median 0, MAD 10, so the -400 sits 40 MADs out
    let df = single_instant_frame(&[
        Some(0.0),
        Some(5.0),
        Some(-10.0),
        Some(20.0),
        Some(-400.0),
    ]);
    let config = DetectorConfig::new(100.0);

    let result = detect_anomalies(&df, "turbine_id", "timestamp", &config).expect("detect");

    let anomaly = result.dataframe.column("anomaly_flag").unwrap().bool().unwrap();
    let deviation = result
        .dataframe
        .column("cross_turbine_deviation")
        .unwrap()
        .f64()
        .unwrap();
    for idx in 0..4 {
        assert_eq!(anomaly.get(idx), Some(false));
        assert!(deviation.get(idx).is_none());
    }
    assert_eq!(anomaly.get(4), Some(true));
    let dev = deviation.get(4).expect("deviation for the candidate");
    assert!((dev - 40.0).abs() < 1e-9);

    assert_eq!(result.stats.stage1_candidates, 1);
    assert_eq!(result.stats.confirmed_anomalies, 1);
    assert_eq!(result.stats.anomalies_by_turbine.get("T05"), Some(&1));
    assert_stage_ordering(&result);
}

#[test]
fn singleton_population_is_never_confirmed() {
    // the second turbine has no usable power_diff, so the population at this
    // instant is a singleton and the candidate passes through unconfirmed
    let df = single_instant_frame(&[Some(-400.0), None]);
    let config = DetectorConfig::new(100.0);

    let result = detect_anomalies(&df, "turbine_id", "timestamp", &config).expect("detect");

    let stage1 = result.dataframe.column("stage1_flag").unwrap().bool().unwrap();
    let anomaly = result.dataframe.column("anomaly_flag").unwrap().bool().unwrap();
    let deviation = result
        .dataframe
        .column("cross_turbine_deviation")
        .unwrap()
        .f64()
        .unwrap();
    assert_eq!(stage1.get(0), Some(true));
    assert_eq!(anomaly.get(0), Some(false));
    assert!(deviation.get(0).is_none());
    assert_stage_ordering(&result);
}

#[test]
fn null_inputs_propagate_through_deviation_and_detection() {
    let instant = naive_to_micros(parse_naive("2024-05-01 12:00:00"));
    let df = df![
        "turbine_id" => ["T01", "T02", "T03"],
        "timestamp" => vec![instant; 3],
        "actual_power" => [None, Some(600.0), Some(1000.0)],
        "expected_power" => [Some(1000.0), Some(1000.0), Some(1000.0)],
    ]
    .expect("df")
    .lazy()
    .with_column(col("timestamp").cast(DataType::Datetime(TimeUnit::Microseconds, None)))
    .collect()
    .expect("collect");

    let with_diff = with_power_diff(&df, "actual_power", "expected_power").expect("power_diff");
    let diffs = with_diff.column("power_diff").unwrap().f64().unwrap();
    assert!(diffs.get(0).is_none());
    assert_eq!(diffs.get(1), Some(-400.0));
    assert_eq!(diffs.get(2), Some(0.0));

    let config = DetectorConfig::new(100.0);
    let result =
        detect_anomalies(&with_diff, "turbine_id", "timestamp", &config).expect("detect");

    let stage1 = result.dataframe.column("stage1_flag").unwrap().bool().unwrap();
    let anomaly = result.dataframe.column("anomaly_flag").unwrap().bool().unwrap();
    // the null row is never a candidate and never anomalous, no matter what
    // its peers look like
    assert!(stage1.get(0).is_none());
    assert_eq!(anomaly.get(0), Some(false));
    assert_stage_ordering(&result);
}

#[test]
fn groups_are_isolated_per_timestamp() {
    // a clean anomaly at noon must not be affected by a degenerate group ten
    // minutes later
    let noon = naive_to_micros(parse_naive("2024-05-01 12:00:00"));
    let later = noon + Duration::minutes(10).num_microseconds().unwrap();
    let df = df![
        "turbine_id" => ["T01", "T02", "T03", "T01", "T02", "T03"],
        "timestamp" => [noon, noon, noon, later, later, later],
        "power_diff" => [Some(0.0), Some(30.0), Some(-400.0), Some(-500.0), Some(-500.0), Some(-500.0)],
    ]
    .expect("df")
    .lazy()
    .with_column(col("timestamp").cast(DataType::Datetime(TimeUnit::Microseconds, None)))
    .collect()
    .expect("collect");

    let config = DetectorConfig::new(100.0);
    let result = detect_anomalies(&df, "turbine_id", "timestamp", &config).expect("detect");

    let anomaly = result.dataframe.column("anomaly_flag").unwrap().bool().unwrap();
    assert_eq!(anomaly.get(2), Some(true));
    for idx in [0, 1, 3, 4, 5] {
        assert_eq!(anomaly.get(idx), Some(false));
    }
    assert_eq!(result.stats.confirmed_anomalies, 1);
    assert_stage_ordering(&result);
}
