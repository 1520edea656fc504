use crate::config::{load_config, Config, ConfigError};
use crate::crawler::{CrawlError, CrawlSettings, Crawler, RunReport, SourceOutcome};
use crate::relay::{RelaySender, Sink, TelegramSink};
use crate::source::{HttpBridgeClient, SourceClient, SourceError};
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::{Storage, StorageError};
use crate::web::{run_server, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::require_config_path;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("source client error: {0}")]
    Source(#[from] SourceError),

    #[error("sink client error: {0}")]
    Sink(#[from] reqwest::Error),

    #[error("crawl failed: {0}")]
    Crawl(#[from] CrawlError),

    #[error("web server error: {0}")]
    WebServer(String),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    run_once(&config_path).await.map_err(|e| e.into())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    serve_until_shutdown(&config_path).await.map_err(|e| e.into())
}

/// Opens the DuckDB file named in the config and makes sure the schema exists.
pub async fn open_storage(config: &Config) -> Result<Arc<DuckDbStorage>, RunError> {
    info!(path = %config.storage.path.display(), "Initializing storage");
    let storage = Arc::new(DuckDbStorage::new(&config.storage.path)?);
    storage.init_schema().await?;
    Ok(storage)
}

/// Wires the configured source bridge, sink and storage into a crawler.
pub async fn build_crawler(config: &Config) -> Result<Crawler, RunError> {
    let proxy = config.network.proxy.as_deref();
    if let Some(proxy) = proxy {
        info!(proxy = %proxy, "Routing source and sink traffic through proxy");
    }

    let storage: Arc<dyn Storage> = open_storage(config).await?;

    let source: Arc<dyn SourceClient> = Arc::new(HttpBridgeClient::new(&config.source, proxy)?);

    let relay = match &config.sink {
        Some(sink_config) => {
            info!(chat_id = %sink_config.chat_id, "Relaying new messages to sink");
            let sink: Arc<dyn Sink> = Arc::new(TelegramSink::new(sink_config, proxy)?);
            Some(RelaySender::new(sink, config.relay.max_retries))
        }
        None => {
            warn!("No sink configured, new messages will only be archived");
            None
        }
    };

    Ok(Crawler::new(
        source,
        storage,
        relay,
        CrawlSettings::from(config),
    ))
}

async fn run_once(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;
    let crawler = build_crawler(&config).await?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, stopping after the current source");
            signal_token.cancel();
        }
    });

    let report = crawler.run(&cancel).await?;
    print_report(&report);

    Ok(())
}

async fn serve_until_shutdown(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;
    let crawler = build_crawler(&config).await?;

    let shutdown = CancellationToken::new();
    let state = AppState {
        storage: crawler.storage().clone(),
        crawler: Arc::new(Mutex::new(crawler)),
        shutdown: shutdown.clone(),
    };

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    run_server(state, &config.web, shutdown)
        .await
        .map_err(|e| RunError::WebServer(e.to_string()))?;

    info!("Server shutdown complete");
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run {}", report.run_id);
    for source in &report.sources {
        match &source.outcome {
            SourceOutcome::Completed(cycle) => println!(
                "  {:<24} logged {:>4}  failed {:>3}  watermark {} -> {}",
                source.source,
                cycle.logged,
                cycle.failed.len(),
                cycle.watermark_before,
                cycle.watermark_after
            ),
            SourceOutcome::Failed { error } => {
                println!("  {:<24} error: {}", source.source, error)
            }
        }
    }
    if report.cancelled {
        println!("Run cancelled before every source was visited");
    }
    println!("New messages logged: {}", report.new_messages);
}
