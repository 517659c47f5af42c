use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::str::FromStr;

use price_paid_stats::{pipeline, PipelineConfig, RunReport};

#[derive(Parser)]
#[command(name = "price-paid-stats")]
#[command(about = "Aggregate Land Registry Price Paid data into per-year district statistics")]
#[command(version)]
struct Cli {
    #[arg(short, long, help = "Headerless Price Paid CSV (default: raw_data/pp-complete.csv)")]
    input: Option<PathBuf>,

    #[arg(short, long, help = "Directory for <year>.json artifacts (default: public/data/prices)")]
    output_dir: Option<PathBuf>,

    #[arg(short, long, help = "JSON config file; flags override its values")]
    config: Option<PathBuf>,

    #[arg(long, help = "Rows per batch")]
    batch_size: Option<usize>,

    #[arg(long, help = "Batches buffered between reader and workers")]
    queue_capacity: Option<usize>,

    #[arg(short, long, help = "Extraction workers (default: available cores)")]
    workers: Option<usize>,

    #[arg(short, long, default_value = "INFO", help = "Logging level (DEBUG, INFO, WARN, ERROR)")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level)?;

    let config = build_config(&cli)?;
    let report = pipeline::run(&config)
        .with_context(|| format!("Aggregation failed for input {}", config.input.display()))?;

    print_summary(&report);

    Ok(())
}

fn setup_logging(level: &str) -> Result<()> {
    let level = LevelFilter::from_str(level)
        .with_context(|| format!("Invalid log level: {}", level))?;

    SimpleLogger::new()
        .with_level(level)
        .init()
        .context("Failed to initialize logger")?;

    Ok(())
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(input) = &cli.input {
        config.input = input.clone();
    }
    if let Some(output_dir) = &cli.output_dir {
        config.output_dir = output_dir.clone();
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(queue_capacity) = cli.queue_capacity {
        config.queue_capacity = queue_capacity;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    config.validate().context("Invalid pipeline configuration")?;
    Ok(config)
}

fn print_summary(report: &RunReport) {
    println!("\n✅ {}", report.summary());

    if report.artifacts.is_empty() {
        println!("No years found in input; nothing written.");
        return;
    }

    // Last 5 years
    println!("\nSummary by year:");
    let skip = report.artifacts.len().saturating_sub(5);
    for artifact in report.artifacts.iter().skip(skip) {
        println!("  {}: {} districts", artifact.year, artifact.districts);
    }
}
