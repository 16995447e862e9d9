//! amc-classifier - album classification CLI
//!
//! Scans a music root for album folders, classifies each one, and writes
//! `classification_report.json` to the output directory. Ctrl-C stops
//! dispatching new albums; albums already in flight finish their current stage.

use amc_classifier::services::{DirectoryAlbumSource, JsonReportSink, LoftyTagReader, LogReportSink, OpenAiTransport};
use amc_classifier::types::{AlbumSource, ReportSink};
use amc_classifier::Engine;
use amc_common::config::{load_config, resolve_api_key, resolve_config_path};
use amc_common::logging::init_tracing;
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "amc-classifier", version, about = "Classify album folders into a library layout")]
struct Args {
    /// Music root to scan
    root: PathBuf,

    /// Configuration file (default: $AMC_CONFIG, then the per-user config)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Process at most this many albums
    #[arg(long)]
    limit: Option<usize>,

    /// Directory for classification_report.json
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// Concurrent albums (overrides concurrency.max_workers)
    #[arg(long)]
    workers: Option<usize>,

    /// Concurrent remote calls (overrides concurrency.api_concurrency)
    #[arg(long)]
    api_concurrency: Option<usize>,

    /// Forget previously failed albums so they are attempted again
    #[arg(long)]
    retry_failed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let mut config = load_config(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(workers) = args.workers {
        config.concurrency.max_workers = workers;
    }
    if let Some(api_concurrency) = args.api_concurrency {
        config.concurrency.api_concurrency = api_concurrency;
    }
    config.validate().context("Invalid concurrency settings")?;

    init_tracing(&config.logging)?;
    info!("Starting amc-classifier {}", env!("CARGO_PKG_VERSION"));

    let Some(api_key) = resolve_api_key(&config.api) else {
        bail!("No API key configured: set AMC_API_KEY or OPENAI_API_KEY, or api.api_key in the config file");
    };
    let timeout = Duration::try_from_secs_f64(config.api.timeout_seconds).unwrap_or(Duration::from_secs(30));
    let transport = OpenAiTransport::new(config.api.base_url.clone(), api_key, timeout)?;

    let engine = Engine::from_config(&config, Arc::new(transport), Arc::new(LoftyTagReader)).await?;

    if args.retry_failed {
        let cleared = engine.executions.purge_failures().await?;
        info!(cleared, "Previously failed albums will be retried");
    }

    let source = DirectoryAlbumSource::new(&args.root, &config.pipeline.ignored_dirs).with_limit(args.limit);
    let items = source
        .discover()
        .with_context(|| format!("Failed to scan {}", args.root.display()))?;

    let cancel = engine.orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stop requested, finishing in-flight albums");
            cancel.cancel();
        }
    });

    let report = engine.orchestrator.run(items).await;

    LogReportSink.publish(&report)?;
    JsonReportSink::new(&args.output).publish(&report)?;

    engine.db.close().await;
    Ok(())
}
