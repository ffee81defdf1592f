// crates/windscan-cli/src/main.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use polars::io::parquet::write::{ParquetCompression, ParquetWriter};
use polars::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use windscan_core::config::{ScanConfig, DEFAULT_CADENCE_MINUTES};
use windscan_core::pipelines::{run_scan, ScanOutput};
use windscan_core::reconcile;
use windscan_core::schema::{self, TableSchema};

/// A CLI for the wind-farm SCADA anomaly scanner
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full scan pipeline over a raw SCADA export
    Scan(ScanArgs),
    /// Report cadence gaps per turbine without running detection
    Gaps(GapsArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Raw CSV export, one row per turbine per sampling instant
    #[arg(short, long)]
    input: PathBuf,
    /// Destination for the flagged table (.parquet, anything else gets CSV)
    #[arg(short, long)]
    output: PathBuf,
    /// TOML scan configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Absolute power-difference threshold; overrides the config file value
    #[arg(long)]
    abs_threshold: Option<f64>,
}

#[derive(Args, Debug)]
struct GapsArgs {
    /// Raw CSV export, one row per turbine per sampling instant
    #[arg(short, long)]
    input: PathBuf,
    /// TOML scan configuration (schema and cadence are honored)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Smallest run of consecutive missing slots worth reporting
    #[arg(long, default_value_t = 2)]
    min_gap_size: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Scan(args) => run_scan_command(args),
        Command::Gaps(args) => run_gaps_command(args),
    }
}

fn run_scan_command(args: ScanArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let threshold = args
                .abs_threshold
                .context("either --config or --abs-threshold is required")?;
            ScanConfig::with_abs_threshold(threshold)
        }
    };
    if let Some(threshold) = args.abs_threshold {
        config.detector.abs_threshold = threshold;
    }

    info!(input = %args.input.display(), "loading raw export");
    let raw = schema::read_raw_csv(&args.input)?;
    let output = run_scan(&raw, &config)?;

    write_table(&output.dataframe, &args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(output = %args.output.display(), "flagged table written");

    print_summary(&output, &config);
    Ok(())
}

fn run_gaps_command(args: GapsArgs) -> Result<()> {
    let (table_schema, cadence) = match &args.config {
        Some(path) => {
            let config = load_config(path)?;
            (config.schema.clone(), config.cadence())
        }
        None => (
            TableSchema::default(),
            Duration::minutes(DEFAULT_CADENCE_MINUTES),
        ),
    };

    let raw = schema::read_raw_csv(&args.input)?;
    let (typed, _coercions) = schema::normalize(&raw, &table_schema)?;
    let gaps = reconcile::find_gaps(
        &typed,
        &table_schema.turbine_column,
        &table_schema.timestamp_column,
        cadence,
        args.min_gap_size,
    )?;

    if gaps.height() == 0 {
        println!(
            "No gaps of {}+ consecutive missing records found.",
            args.min_gap_size
        );
    } else {
        println!("{gaps}");
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<ScanConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    ScanConfig::from_toml_str(&text)
        .with_context(|| format!("invalid config {}", path.display()))
}

fn write_table(df: &DataFrame, path: &Path) -> Result<()> {
    let mut out = df.clone();
    let file = fs::File::create(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("parquet") => {
            ParquetWriter::new(file)
                .with_compression(ParquetCompression::Zstd(None))
                .finish(&mut out)?;
        }
        _ => {
            CsvWriter::new(file).finish(&mut out)?;
        }
    }
    Ok(())
}

fn print_summary(output: &ScanOutput, config: &ScanConfig) {
    let stats = &output.stats;
    println!("--- Scan Summary ---");
    println!("  Records analyzed:     {}", stats.total_records);
    println!(
        "  Stage-1 candidates:   {} (|power_diff| > {})",
        stats.stage1_candidates, config.detector.abs_threshold
    );
    println!(
        "  Confirmed anomalies:  {} (> {} MADs from peers)",
        stats.confirmed_anomalies, config.detector.mad_multiplier
    );
    if output.coercions.total() > 0 {
        println!(
            "  Values nulled during normalization: {}",
            output.coercions.total()
        );
        for (column, count) in &output.coercions.rejected {
            println!("    {column}: {count}");
        }
    }

    if stats.anomalies_by_turbine.is_empty() {
        println!("No anomalies detected with current thresholds.");
        return;
    }

    let mut table = Table::new();
    table.set_header(["Turbine", "Anomalies"]);
    for (turbine, count) in &stats.anomalies_by_turbine {
        table.add_row(vec![turbine.clone(), count.to_string()]);
    }
    println!("{table}");
}
