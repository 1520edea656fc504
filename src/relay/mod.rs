pub mod render;
pub mod sender;
pub mod telegram;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use render::{message_link, render, RenderFormat, RenderedMessage};
pub use sender::{RelayOutcome, RelaySender};
pub use telegram::TelegramSink;

/// Signals a sink can answer a send with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("rendering rejected: {0}")]
    FormatRejected(String),

    #[error("send failed: {0}")]
    Fatal(String),
}

/// The single downstream destination messages are relayed to.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, message: &RenderedMessage) -> Result<(), SinkError>;
}
