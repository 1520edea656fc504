use super::render::{message_link, render, RenderFormat};
use super::{Sink, SinkError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// States of one relay attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RelayState {
    Pending,
    Sending {
        format: RenderFormat,
        retries: u32,
    },
    RateLimited {
        format: RenderFormat,
        retries: u32,
        retry_after: Duration,
    },
    FormatRejected {
        format: RenderFormat,
        reason: String,
    },
    Delivered {
        format: RenderFormat,
    },
    Fatal {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered {
        format: RenderFormat,
        rate_limit_waits: u32,
    },
    Fatal {
        reason: String,
    },
}

impl RelayOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RelayOutcome::Delivered { .. })
    }
}

/// Delivers one message at a time to the sink.
///
/// Renderings are tried in order. A rate-limit answer suspends for the
/// duration the sink asked for and resends the same rendering, at most
/// `max_retries` times per rendering. A rejected rendering moves on to the
/// next one. Nothing is kept between messages.
pub struct RelaySender {
    sink: Arc<dyn Sink>,
    max_retries: u32,
    formats: Vec<RenderFormat>,
}

impl RelaySender {
    pub fn new(sink: Arc<dyn Sink>, max_retries: u32) -> Self {
        Self {
            sink,
            max_retries,
            formats: RenderFormat::FALLBACK_CHAIN.to_vec(),
        }
    }

    pub async fn relay(&self, source: &str, message_id: i64, text: &str) -> RelayOutcome {
        let link = message_link(source, message_id);
        let mut formats = self.formats.iter().copied();
        let mut rate_limit_waits = 0u32;
        let mut state = RelayState::Pending;

        loop {
            state = match state {
                RelayState::Pending => match formats.next() {
                    Some(format) => RelayState::Sending { format, retries: 0 },
                    None => RelayState::Fatal {
                        reason: "no renderings configured".to_string(),
                    },
                },

                RelayState::Sending { format, retries } => {
                    let rendered = render(format, text, &link);
                    match self.sink.send(&rendered).await {
                        Ok(()) => RelayState::Delivered { format },
                        Err(SinkError::RateLimited { retry_after }) => RelayState::RateLimited {
                            format,
                            retries,
                            retry_after,
                        },
                        Err(SinkError::FormatRejected(reason)) => {
                            RelayState::FormatRejected { format, reason }
                        }
                        Err(SinkError::Fatal(reason)) => RelayState::Fatal { reason },
                    }
                }

                RelayState::RateLimited {
                    format,
                    retries,
                    retry_after,
                } => {
                    if retries >= self.max_retries {
                        warn!(
                            source = %source,
                            message_id,
                            ?format,
                            retries,
                            max_retries = self.max_retries,
                            retry_after_secs = retry_after.as_secs(),
                            "Sink rate limit persisted after retries"
                        );
                        RelayState::Fatal {
                            reason: format!("rate limited after {} retries", retries),
                        }
                    } else {
                        warn!(
                            source = %source,
                            message_id,
                            ?format,
                            retry = retries + 1,
                            max_retries = self.max_retries,
                            retry_after_secs = retry_after.as_secs(),
                            "Sink rate limited, waiting before retry"
                        );
                        rate_limit_waits += 1;
                        tokio::time::sleep(retry_after).await;
                        RelayState::Sending {
                            format,
                            retries: retries + 1,
                        }
                    }
                }

                RelayState::FormatRejected { format, reason } => match formats.next() {
                    Some(next) => {
                        warn!(
                            source = %source,
                            message_id,
                            rejected = ?format,
                            next = ?next,
                            reason = %reason,
                            "Sink rejected rendering, downgrading"
                        );
                        RelayState::Sending {
                            format: next,
                            retries: 0,
                        }
                    }
                    None => RelayState::Fatal {
                        reason: format!("every rendering was rejected, last: {}", reason),
                    },
                },

                RelayState::Delivered { format } => {
                    debug!(source = %source, message_id, ?format, "Message relayed");
                    return RelayOutcome::Delivered {
                        format,
                        rate_limit_waits,
                    };
                }

                RelayState::Fatal { reason } => {
                    error!(source = %source, message_id, reason = %reason, "Relay failed");
                    return RelayOutcome::Fatal { reason };
                }
            };
        }
    }
}
