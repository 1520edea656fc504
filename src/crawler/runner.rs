use super::cycle::CycleReport;
use super::{CrawlError, Crawler};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SourceOutcome {
    Completed(CycleReport),
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub outcome: SourceOutcome,
}

impl SourceReport {
    pub fn cycle(&self) -> Option<&CycleReport> {
        match &self.outcome {
            SourceOutcome::Completed(report) => Some(report),
            SourceOutcome::Failed { .. } => None,
        }
    }
}

/// Summary of one run across all configured sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Records appended to the message log during the run.
    pub new_messages: usize,
    pub sources: Vec<SourceReport>,
    /// Set when the run stopped before visiting every source.
    pub cancelled: bool,
}

impl RunReport {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Failed { .. }))
    }
}

impl Crawler {
    /// Visits every configured source once, in order, over one source session.
    ///
    /// Per-source failures are logged and recorded in the report; only a
    /// failure to open the session fails the run. Cancellation is honoured
    /// between sources, never in the middle of a relay.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, CrawlError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("crawl_run", %run_id);

        async move {
            info!(sources = self.settings.sources.len(), "Starting crawl run");
            let session = self.source.connect().await?;

            let mut report = RunReport {
                run_id,
                new_messages: 0,
                sources: Vec::with_capacity(self.settings.sources.len()),
                cancelled: false,
            };

            for source in &self.settings.sources {
                if cancel.is_cancelled() {
                    warn!(next_source = %source, "Run cancelled before visiting every source");
                    report.cancelled = true;
                    break;
                }

                let outcome = match self.run_cycle(session.as_ref(), source).await {
                    Ok(cycle) => {
                        report.new_messages += cycle.logged;
                        SourceOutcome::Completed(cycle)
                    }
                    Err(e) => {
                        error!(source = %source, error = %e, "Source cycle failed, watermark unchanged");
                        SourceOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                report.sources.push(SourceReport {
                    source: source.clone(),
                    outcome,
                });
            }

            session.close().await;

            info!(
                new_messages = report.new_messages,
                failed_sources = report.failed_sources().count(),
                cancelled = report.cancelled,
                "Crawl run finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }
}
