use chrono::Duration;
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::schema::TableSchema;

pub const DEFAULT_CADENCE_MINUTES: i64 = 10;

/// Detector thresholds. `abs_threshold` has no sensible universal default
/// (it depends on the turbine rating), so it must always be supplied.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    pub abs_threshold: f64,
    #[serde(default = "default_mad_multiplier")]
    pub mad_multiplier: f64,
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
}

fn default_mad_multiplier() -> f64 {
    2.5
}

fn default_min_group_size() -> usize {
    2
}

impl DetectorConfig {
    pub fn new(abs_threshold: f64) -> Self {
        Self {
            abs_threshold,
            mad_multiplier: default_mad_multiplier(),
            min_group_size: default_min_group_size(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.abs_threshold <= 0.0 || self.abs_threshold.is_nan() {
            return Err(PipelineError::Config(format!(
                "abs_threshold must be positive, got {}",
                self.abs_threshold
            )));
        }
        if self.mad_multiplier <= 0.0 || self.mad_multiplier.is_nan() {
            return Err(PipelineError::Config(format!(
                "mad_multiplier must be positive, got {}",
                self.mad_multiplier
            )));
        }
        if self.min_group_size < 1 {
            return Err(PipelineError::Config(
                "min_group_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full configuration surface for one scan run.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub schema: TableSchema,
    #[serde(default = "default_cadence_minutes")]
    pub nominal_cadence_minutes: i64,
    #[serde(default = "default_actual_power_column")]
    pub actual_power_column: String,
    #[serde(default = "default_expected_power_column")]
    pub expected_power_column: String,
    pub detector: DetectorConfig,
}

fn default_cadence_minutes() -> i64 {
    DEFAULT_CADENCE_MINUTES
}

fn default_actual_power_column() -> String {
    "actual_power".to_string()
}

fn default_expected_power_column() -> String {
    "expected_power".to_string()
}

impl ScanConfig {
    pub fn with_abs_threshold(abs_threshold: f64) -> Self {
        Self {
            schema: TableSchema::default(),
            nominal_cadence_minutes: default_cadence_minutes(),
            actual_power_column: default_actual_power_column(),
            expected_power_column: default_expected_power_column(),
            detector: DetectorConfig::new(abs_threshold),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn cadence(&self) -> Duration {
        Duration::minutes(self.nominal_cadence_minutes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nominal_cadence_minutes <= 0 {
            return Err(PipelineError::Config(format!(
                "nominal_cadence_minutes must be positive, got {}",
                self.nominal_cadence_minutes
            )));
        }
        self.detector.validate()
    }
}
