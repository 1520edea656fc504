//! Read-only access to message sources.
//!
//! The crawler only needs "give me the N most recent items of this source".
//! One [`SourceClient`] adapter is chosen when the process is configured; a
//! run acquires a [`SourceSession`] from it once and releases it when the run
//! ends.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpBridgeClient;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source bridge returned error status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid bridge URL: {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),
}

/// One item of a source page. Identifiers are assigned by the source and
/// increase monotonically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: i64,
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SourceItem {
    /// The relayable content, if any. Whitespace-only text counts as none.
    pub fn content(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Acquire the connection used for a whole run.
    async fn connect(&self) -> Result<Box<dyn SourceSession>, SourceError>;
}

#[async_trait]
pub trait SourceSession: Send + Sync {
    /// Up to `limit` most recent items, newest first. `source` may be a public
    /// handle (with or without `@`) or a numeric identifier.
    async fn fetch_recent(&self, source: &str, limit: usize)
        -> Result<Vec<SourceItem>, SourceError>;

    /// Release the connection. Called exactly once at the end of a run.
    async fn close(&self);
}

/// Strip surrounding whitespace and a leading `@` from a source name.
pub fn normalize_source_name(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix('@').unwrap_or(name)
}
