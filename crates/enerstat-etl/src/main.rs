//! Enerstat ETL - orchestrated warehouse load

use anyhow::Result;
use clap::Parser;
use enerstat_common::logging::{init_logging, LogConfig, LogLevel};
use enerstat_etl::config::Settings;
use enerstat_etl::extract::Extractor;
use enerstat_etl::load::{LoadMode, Loader};
use enerstat_etl::pipeline::{DatasetStatus, Orchestrator};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "enerstat-etl")]
#[command(author, version, about = "Eurostat energy statistics warehouse loader")]
struct Cli {
    /// Data load mode
    #[arg(long, value_enum, default_value_t = LoadMode::FullRefresh)]
    mode: LoadMode,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if log_config.filter_directives.is_none() {
        log_config = log_config.with_filter_directives("enerstat_etl=debug,sqlx=warn");
    }
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }

    init_logging(&log_config)?;

    info!(mode = %cli.mode, "Starting enerstat-etl");

    let settings = Settings::from_env()?;
    let extractor = Extractor::new(&settings.http)?;
    let loader = Loader::connect(&settings.database).await?;

    let orchestrator = Orchestrator::new(extractor, loader, settings.datasets.clone());
    let summary = orchestrator.run(cli.mode).await?;

    for report in &summary.reports {
        match report.status {
            DatasetStatus::Success => info!(
                dataset = %report.dataset,
                extracted = report.extracted,
                transformed = report.transformed,
                loaded = report.loaded,
                load_skipped = report.load_skipped,
                skipped = report.skipped,
                duplicates = report.duplicates,
                "Dataset loaded"
            ),
            DatasetStatus::Failed => error!(
                dataset = %report.dataset,
                error = report.error.as_deref().unwrap_or("unknown"),
                "Dataset failed"
            ),
        }
    }

    let failed = summary.failed_count();
    if failed > 0 {
        anyhow::bail!("{} of {} datasets failed", failed, summary.reports.len());
    }

    info!("ETL run complete");
    Ok(())
}
