use polars::prelude::*;

pub const POWER_DIFF_COLUMN: &str = "power_diff";

/// Appends `power_diff = actual - expected` per row. A null in either
/// operand yields a null difference, which keeps the record out of both
/// detector stages.
pub fn with_power_diff(
    df: &DataFrame,
    actual_column: &str,
    expected_column: &str,
) -> Result<DataFrame, PolarsError> {
    df.clone()
        .lazy()
        .with_column((col(actual_column) - col(expected_column)).alias(POWER_DIFF_COLUMN))
        .collect()
}
