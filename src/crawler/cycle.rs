use super::dedup::filter_unlogged;
use super::{CrawlError, Crawler};
use crate::relay::RelayOutcome;
use crate::source::{SourceItem, SourceSession};
use crate::storage::MessageRecord;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

/// What one source cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub source: String,
    pub watermark_before: i64,
    pub watermark_after: i64,
    /// Items in the fetched page.
    pub fetched: usize,
    /// Items above the watermark.
    pub candidates: usize,
    pub skipped_without_text: usize,
    pub already_logged: usize,
    pub delivered: usize,
    /// Identifiers whose relay ended fatally; they are not logged.
    pub failed: Vec<i64>,
    /// Records appended to the message log.
    pub logged: usize,
}

impl Crawler {
    /// One poll of one source.
    ///
    /// New items are relayed oldest first and logged as they are delivered.
    /// The watermark then moves to the newest identifier in the page whatever
    /// the individual relay outcomes were; a message whose relay failed is
    /// not retried by later cycles. Source and storage errors abort the cycle
    /// before the watermark moves.
    pub async fn run_cycle(
        &self,
        session: &dyn SourceSession,
        source: &str,
    ) -> Result<CycleReport, CrawlError> {
        let storage = self.storage.as_ref();

        storage.register(source).await?;
        let watermark = storage.get(source).await?;

        let mut report = CycleReport {
            source: source.to_string(),
            watermark_before: watermark,
            watermark_after: watermark,
            ..CycleReport::default()
        };

        let page = session.fetch_recent(source, self.settings.page_size).await?;
        report.fetched = page.len();

        let Some(newest_seen) = page.iter().map(|item| item.id).max() else {
            debug!(source = %source, "Source returned an empty page");
            return Ok(report);
        };

        let mut candidates: Vec<SourceItem> =
            page.into_iter().filter(|item| item.id > watermark).collect();
        candidates.sort_by_key(|item| item.id);
        candidates.dedup_by_key(|item| item.id);
        report.candidates = candidates.len();

        let (with_text, without_text): (Vec<SourceItem>, Vec<SourceItem>) = candidates
            .into_iter()
            .partition(|item| item.content().is_some());
        report.skipped_without_text = without_text.len();

        let dedup = filter_unlogged(storage, with_text).await?;
        report.already_logged = dedup.already_logged;
        if dedup.already_logged > 0 {
            info!(
                source = %source,
                already_logged = dedup.already_logged,
                "Skipping messages that are already logged"
            );
        }

        for (index, item) in dedup.fresh.iter().enumerate() {
            let text = item.content().unwrap_or_default();

            if let Some(relay) = &self.relay {
                let delay = self.settings.delay_between_messages;
                if index > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                match relay.relay(source, item.id, text).await {
                    RelayOutcome::Delivered { .. } => report.delivered += 1,
                    RelayOutcome::Fatal { reason } => {
                        warn!(
                            source = %source,
                            message_id = item.id,
                            reason = %reason,
                            "Message will not be logged"
                        );
                        report.failed.push(item.id);
                        continue;
                    }
                }
            }

            let record = MessageRecord {
                source_name: source.to_string(),
                message_id: item.id,
                text: text.to_string(),
                message_timestamp: item.timestamp,
                ingested_at: Utc::now(),
            };
            if storage.append(&record).await? {
                report.logged += 1;
            } else {
                warn!(
                    source = %source,
                    message_id = item.id,
                    "Message was logged concurrently, insert dropped"
                );
            }
        }

        if newest_seen > watermark {
            storage.advance(source, newest_seen).await?;
            report.watermark_after = newest_seen;
        }

        info!(
            source = %source,
            fetched = report.fetched,
            candidates = report.candidates,
            logged = report.logged,
            failed = report.failed.len(),
            watermark = report.watermark_after,
            "Source cycle complete"
        );

        Ok(report)
    }
}
