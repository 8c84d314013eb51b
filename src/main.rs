use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

use epi_report::app::ports::SourceFetcher;
use epi_report::config::{Config, DEFAULT_CONFIG_PATH};
use epi_report::infra::http_client::HttpSourceFetcher;
use epi_report::infra::report_renderer::CsvReportRenderer;
use epi_report::pipeline::{ingestion, Pipeline, RunSummary};
use epi_report::{logging, metrics, profile};

#[derive(Parser)]
#[command(name = "epi_report")]
#[command(about = "Weekly COVID-19 incidence and growth report for tracked jurisdictions")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the dataset, run the validated pipeline and write the report
    Run {
        /// Config file (defaults to epi_report.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the source dataset URL
        #[arg(long)]
        url: Option<String>,
        /// Override the report output directory
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also write the run summary and gate audit trail as JSON to this path
        #[arg(long)]
        audit_json: Option<PathBuf>,
        /// Expose Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Write a one-row profile of the tracked jurisdictions' source rows
    Profile {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>, url: Option<String>, output: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(p) => Config::load(p).with_context(|| format!("loading {}", p.display()))?,
        None => Config::load_or_default().with_context(|| format!("loading {DEFAULT_CONFIG_PATH}"))?,
    };
    let mut config = config.with_env_overrides();
    if let Some(url) = url {
        config.source.url = url;
    }
    if let Some(output) = output {
        config.report.output_dir = output.display().to_string();
    }
    Ok(config)
}

fn write_audit(summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json).with_context(|| format!("writing audit to {}", path.display()))?;
    info!("💾 Audit trail written to {}", path.display());
    Ok(())
}

async fn run(
    config: Config,
    audit_json: Option<PathBuf>,
    metrics_port: Option<u16>,
) -> anyhow::Result<ExitCode> {
    if let Some(port) = metrics_port {
        metrics::init_metrics(port);
    }

    let output_dir = PathBuf::from(&config.report.output_dir);
    let pipeline = Pipeline::new(config)?;
    let fetcher = HttpSourceFetcher::new();

    let run = match pipeline.run(&fetcher).await {
        Ok(run) => run,
        Err(failure) => {
            error!("❌ Run failed at stage '{}': {}", failure.stage, failure.error);
            println!("❌ Run failed at stage '{}': {}", failure.stage, failure.error);
            if let Some(path) = &audit_json {
                write_audit(&RunSummary::from(&failure), path)?;
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    for entry in run.audit() {
        if !entry.result.overall_passed {
            warn!(
                "Gate '{}' ({}) did not pass:\n{}",
                entry.gate,
                entry.policy.as_str(),
                entry.result.render_summary()
            );
        }
    }
    if let Some(path) = &audit_json {
        write_audit(&run.summary(), path)?;
    }

    if run.is_fatal() {
        println!("🛑 No report produced: a fatal gate tripped");
        return Ok(ExitCode::FAILURE);
    }

    match Pipeline::render(&run, &CsvReportRenderer::new(), &output_dir) {
        Ok(path) => {
            println!("✅ Report written to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("❌ Report write failed: {}", e);
            println!("❌ {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_profile(config: Config) -> anyhow::Result<ExitCode> {
    let fetcher = HttpSourceFetcher::new();
    let timeout = std::time::Duration::from_secs(config.source.timeout_seconds);
    let text = fetcher
        .fetch(&config.source.url, timeout)
        .await
        .context("fetching source dataset")?;
    let set = ingestion::load(&text)?;
    let summary = profile::profile(&set, &config.jurisdictions)?;
    let path = profile::write_profile(&summary, Path::new(&config.report.output_dir))?;
    println!("✅ Profile written to {}", path.display());
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            url,
            output,
            audit_json,
            metrics_port,
        } => {
            let config = load_config(config.as_deref(), url, output.as_deref())?;
            run(config, audit_json, metrics_port).await
        }
        Commands::Profile { config, url, output } => {
            let config = load_config(config.as_deref(), url, output.as_deref())?;
            run_profile(config).await
        }
    }
}
