use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use revpulse_pipeline::{
    AppConfig, Classifier, FileReportSink, LogAlertSink, Pipeline, ReportPeriod, WordListModel,
};
use revpulse_store::{HttpFetcher, SqliteReviewStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "revpulse")]
#[command(about = "Marketplace review monitoring pipeline")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "REVPULSE_CONFIG", default_value = "revpulse.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion cycle across all enabled sources.
    Ingest,
    /// Build and deliver one report for the given period.
    Report {
        #[arg(value_enum)]
        period: PeriodArg,
    },
    /// Run the long-lived scheduler loop (ingestion + reports).
    Run,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PeriodArg {
    Weekly,
    Monthly,
}

impl From<PeriodArg> for ReportPeriod {
    fn from(period: PeriodArg) -> Self {
        match period {
            PeriodArg::Weekly => ReportPeriod::Weekly,
            PeriodArg::Monthly => ReportPeriod::Monthly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    info!(config = %cli.config.display(), sources = config.sources.len(), "configuration loaded");

    let store = Arc::new(
        SqliteReviewStore::connect(&config.database_url)
            .await
            .with_context(|| format!("opening review store {}", config.database_url))?,
    );
    let http = Arc::new(HttpFetcher::new(config.http.client_config())?);
    let classifier = Classifier::from_settings(Arc::new(WordListModel::default()), &config.classifier);
    let report_sink = Arc::new(FileReportSink::new(config.reports_dir.clone()));
    let pipeline = Pipeline::new(
        config,
        store,
        http,
        classifier,
        Arc::new(LogAlertSink),
        report_sink,
    );

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Ingest => {
            let summary = pipeline.run_cycle().await?;
            println!(
                "cycle complete: run_id={} inserted={} already_present={} skipped={} alerts={} failed_sources={}",
                summary.run_id,
                summary.inserted,
                summary.already_present,
                summary.skipped,
                summary.alerts_sent,
                summary.sources_failed,
            );
        }
        Commands::Report { period } => {
            let report = pipeline.run_report(period.into(), Utc::now()).await?;
            println!("report delivered: period={}", report.period.as_str());
        }
        Commands::Run => {
            pipeline.run_scheduler().await?;
        }
    }

    Ok(())
}
