use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::crawler::Crawler;
use crate::storage::{LogStats, Storage};

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    /// Held for the whole of a run, so concurrent crawl requests queue.
    pub crawler: Arc<Mutex<Crawler>>,
    pub storage: Arc<dyn Storage>,
    /// Cancelled on shutdown; an in-flight run stops between sources.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Serialize)]
pub struct CrawlResponse {
    pub status: String,
    pub new_messages_found: usize,
    pub channels_crawled: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
}

/// GET /
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Crawler is running. Use POST /crawl to trigger a run.".to_string(),
    })
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// POST /crawl
///
/// The run happens on its own task: a client that disconnects mid-run drops
/// only its wait for the result, never a relay in flight. Shutdown stops the
/// run between sources.
pub async fn crawl(State(state): State<AppState>) -> Result<Json<CrawlResponse>, ApiError> {
    let crawler = state.crawler.clone().lock_owned().await;
    let shutdown = state.shutdown.clone();
    info!("Crawl requested over HTTP");

    let handle = tokio::spawn(async move { crawler.run(&shutdown).await });

    let report = handle
        .await
        .map_err(|e| {
            error!(error = %e, "Crawl task did not finish");
            ApiError::InternalError(format!("crawl task failed: {}", e))
        })?
        .map_err(|e| {
            error!(error = %e, "Crawl run failed");
            ApiError::InternalError(e.to_string())
        })?;

    Ok(Json(CrawlResponse {
        status: if report.cancelled { "cancelled" } else { "success" }.to_string(),
        new_messages_found: report.new_messages,
        channels_crawled: report.sources.iter().map(|s| s.source.clone()).collect(),
    }))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<LogStats>, ApiError> {
    let stats = state
        .storage
        .stats()
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(stats))
}

#[derive(Debug)]
pub enum ApiError {
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
