//! Crawl orchestration: per-source cycles composed into runs.

pub mod cycle;
pub mod dedup;
pub mod runner;

use crate::config::Config;
use crate::relay::RelaySender;
use crate::source::{normalize_source_name, SourceClient, SourceError};
use crate::storage::{Storage, StorageError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use cycle::CycleReport;
pub use dedup::{filter_unlogged, DedupResult};
pub use runner::{RunReport, SourceOutcome, SourceReport};

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("source access failed: {0}")]
    Source(#[from] SourceError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub sources: Vec<String>,
    pub page_size: usize,
    pub delay_between_messages: Duration,
}

pub struct Crawler {
    source: Arc<dyn SourceClient>,
    storage: Arc<dyn Storage>,
    /// `None` runs in archive-only mode: new messages are logged unrelayed.
    relay: Option<RelaySender>,
    settings: CrawlSettings,
}

impl Crawler {
    pub fn new(
        source: Arc<dyn SourceClient>,
        storage: Arc<dyn Storage>,
        relay: Option<RelaySender>,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            source,
            storage,
            relay,
            settings,
        }
    }

    pub fn sources(&self) -> &[String] {
        &self.settings.sources
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }
}

impl From<&Config> for CrawlSettings {
    fn from(config: &Config) -> Self {
        Self {
            sources: config
                .sources
                .iter()
                .map(|name| normalize_source_name(name).to_string())
                .collect(),
            page_size: config.source.page_size,
            delay_between_messages: config.relay.delay_between_messages,
        }
    }
}
