//! Command-line driver for attribution calculations, channel reports and model
//! comparisons over JSON event exports.

use anyhow::Context;
use attribution_core::config::AppConfig;
use attribution_core::{
    AttributionCalculationRequest, AttributionChannel, AttributionEvent, AttributionModel,
    EngineError, ErrorKind,
};
use attribution_reporting::{
    calculate_attribution, export_csv, ChannelPerformanceAggregator, InMemoryRepository,
    ReportBuilder, ReportRequest, TimeGranularity,
};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "attribution")]
#[command(about = "Multi-touch marketing attribution and channel reporting")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, env = "ATTRIBUTION_ENGINE_CONFIG")]
    config: Option<String>,

    /// Lookback window in days (overrides config)
    #[arg(long)]
    lookback_days: Option<u32>,

    /// Overall timeout for a rollup in seconds (overrides config)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Run calculator passes on a single thread
    #[arg(long, default_value_t = false)]
    sequential: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Attribute a single conversion from a calculation request file
    Calculate {
        #[arg(long)]
        request: PathBuf,
    },
    /// Build and persist a channel performance report
    Report {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long)]
        model: AttributionModel,
        #[arg(long)]
        name: Option<String>,
        /// Number of top conversion paths to keep
        #[arg(long)]
        paths: Option<usize>,
        /// JSON object of channel id -> spend, enables ROI output
        #[arg(long)]
        spend: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Per-window channel rollup
    Timeseries {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long)]
        model: AttributionModel,
        #[arg(long, value_enum, default_value_t = Granularity::Day)]
        granularity: Granularity,
    },
    /// Credit one channel receives under every model
    Compare {
        #[command(flatten)]
        data: DataArgs,
        /// Channel to compare; omit for the (unknown) channel
        #[arg(long)]
        channel: Option<Uuid>,
    },
}

#[derive(Args, Debug)]
struct DataArgs {
    /// JSON array of recorded events
    #[arg(long)]
    events: PathBuf,
    /// JSON array of channel registry entries
    #[arg(long)]
    channels: Option<PathBuf>,
    #[arg(long)]
    project: Uuid,
    /// RFC 3339 range start
    #[arg(long)]
    start: DateTime<Utc>,
    /// RFC 3339 range end
    #[arg(long)]
    end: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Granularity {
    Day,
    Week,
}

impl From<Granularity> for TimeGranularity {
    fn from(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Day => TimeGranularity::Day,
            Granularity::Week => TimeGranularity::Week,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attribution_cli=info,attribution_reporting=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(days) = cli.lookback_days {
        config.aggregation.lookback_window_days = Some(days);
    }
    if let Some(secs) = cli.timeout_secs {
        config.report.timeout_secs = secs;
    }
    if cli.sequential {
        config.aggregation.parallel = false;
    }

    info!(
        lookback_days = ?config.aggregation.lookback_window_days,
        parallel = config.aggregation.parallel,
        timeout_secs = config.report.timeout_secs,
        "Configuration loaded"
    );

    // The calculator has no timeout of its own; the batch as a whole does.
    let limit = Duration::from_secs(config.report.timeout_secs);
    let command = cli.command;
    let output = run_with_timeout(limit, move || run(command, config))?;

    println!("{output}");
    Ok(())
}

/// Run `job` on the blocking pool under an overall deadline. On timeout the
/// runtime is shut down without joining the worker, so the process can exit.
fn run_with_timeout<F>(limit: Duration, job: F) -> anyhow::Result<String>
where
    F: FnOnce() -> anyhow::Result<String> + Send + 'static,
{
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;

    let outcome = runtime.block_on(async move {
        tokio::time::timeout(limit, tokio::task::spawn_blocking(job)).await
    });
    match outcome {
        Ok(joined) => joined.context("rollup task failed")?,
        Err(_) => {
            runtime.shutdown_background();
            anyhow::bail!("rollup did not finish within {limit:?}")
        }
    }
}

/// Internal errors are logged where they occur; the user gets a generic message.
fn user_facing(e: EngineError) -> anyhow::Error {
    match e.kind() {
        ErrorKind::Internal => anyhow::anyhow!("internal error during attribution, see logs"),
        _ => e.into(),
    }
}

fn run(command: Command, config: AppConfig) -> anyhow::Result<String> {
    match command {
        Command::Calculate { request } => {
            let request: AttributionCalculationRequest = read_json(&request)?;
            let result = calculate_attribution(&request).map_err(user_facing)?;
            Ok(serde_json::to_string_pretty(&result)?)
        }
        Command::Report {
            data,
            model,
            name,
            paths,
            spend,
            format,
        } => {
            let aggregator = load_aggregator(&data, &config)?;
            let builder = ReportBuilder::in_memory();
            let snapshot = builder.generate_report(
                &aggregator,
                &ReportRequest {
                    project_id: data.project,
                    report_name: name.unwrap_or_else(|| config.report.default_name.clone()),
                    model,
                    start: data.start,
                    end: data.end,
                    path_limit: paths.unwrap_or(config.aggregation.default_path_limit),
                },
            )
            .map_err(user_facing)?;

            if format == OutputFormat::Csv {
                if spend.is_some() {
                    warn!("ROI rows are only emitted with --format json");
                }
                return Ok(export_csv(&snapshot));
            }

            let roi = match spend {
                Some(path) => {
                    let spend: HashMap<Uuid, f64> = read_json(&path)?;
                    Some(
                        aggregator
                            .calculate_roi_metrics(data.project, model, data.start, data.end, Some(&spend))
                            .map_err(user_facing)?,
                    )
                }
                None => None,
            };
            Ok(serde_json::to_string_pretty(&serde_json::json!({
                "report": snapshot,
                "roi": roi,
            }))?)
        }
        Command::Timeseries {
            data,
            model,
            granularity,
        } => {
            let aggregator = load_aggregator(&data, &config)?;
            let series = aggregator
                .get_channel_timeseries(data.project, model, data.start, data.end, granularity.into())
                .map_err(user_facing)?;
            Ok(serde_json::to_string_pretty(&series)?)
        }
        Command::Compare { data, channel } => {
            let aggregator = load_aggregator(&data, &config)?;
            let comparison = aggregator
                .compare_attribution_models(data.project, channel, data.start, data.end)
                .map_err(user_facing)?;
            Ok(serde_json::to_string_pretty(&comparison)?)
        }
    }
}

fn load_aggregator(data: &DataArgs, config: &AppConfig) -> anyhow::Result<ChannelPerformanceAggregator> {
    let events: Vec<AttributionEvent> = read_json(&data.events)?;
    let repo: InMemoryRepository = events.into_iter().collect();
    if let Some(path) = &data.channels {
        let channels: Vec<AttributionChannel> = read_json(path)?;
        for channel in channels {
            repo.register_channel(channel);
        }
    }
    info!(events = repo.event_count(), "Events loaded");
    Ok(ChannelPerformanceAggregator::new(
        Arc::new(repo),
        config.aggregation.clone(),
    ))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
