use anyhow::Context;
use clap::Parser;
use incident_feed_core::{
    config::{Config, CONFIG_PATH_ENV},
    enhancement::PassthroughProvider,
    metrics,
    models::FeedRecord,
    pipeline::IncidentPipeline,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "incident-feed-core")]
#[command(about = "Run one incident feed batch through the ingestion and enhancement pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// JSON file holding an array of incident records
    #[arg(short, long)]
    feed: PathBuf,

    /// Seconds to let background workers run before reporting
    #[arg(short, long, default_value = "2")]
    wait_secs: u64,

    /// Also print Prometheus metrics
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Failed to load configuration: {}", e);
            eprintln!("Using default configuration");
            Config::default()
        }),
    };

    init_tracing(&config);
    metrics::init_metrics();

    tracing::info!("Starting incident-feed-core v{}", env!("CARGO_PKG_VERSION"));

    let records = read_feed(&cli.feed)?;
    tracing::info!(records = records.len(), feed = %cli.feed.display(), "✅ Feed loaded");

    let pipeline = IncidentPipeline::from_config(config, Arc::new(PassthroughProvider));
    pipeline.start().await?;

    let summary = pipeline.processor().process_incident_batch(records.clone());
    tokio::time::sleep(Duration::from_secs(cli.wait_secs)).await;

    let mut alerts = Vec::with_capacity(records.len());
    for record in &records {
        match pipeline.enhancer().get_enhanced_alert(record) {
            Ok(alert) => alerts.push(serde_json::to_value(&alert)?),
            Err(e) => tracing::warn!(error = %e, "Could not serve alert"),
        }
    }

    let status = pipeline.enhancer().get_enhancement_status().await;
    let processing = pipeline.processor().get_processing_stats();
    let cache = pipeline.store().get_cache_metrics();
    let maintenance = pipeline.shutdown().await?;

    let report = json!({
        "batch": summary,
        "processing": processing,
        "enhancement": status,
        "cache": cache,
        "maintenance": maintenance
            .into_iter()
            .map(|(name, snapshot)| (name, json!(snapshot)))
            .collect::<serde_json::Map<String, Value>>(),
        "alerts": alerts,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if cli.metrics {
        println!("{}", metrics::gather_metrics());
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.observability.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Parse the feed file, skipping entries that are not objects
fn read_feed(path: &Path) -> anyhow::Result<Vec<FeedRecord>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read feed {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents).context("feed is not valid JSON")?;

    let Value::Array(items) = value else {
        anyhow::bail!("feed must be a JSON array of incident records");
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match FeedRecord::from_json(item) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(index, error = %e, "Skipping feed entry"),
        }
    }
    Ok(records)
}
