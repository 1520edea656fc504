use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// A message that has been relayed (or accepted in archive-only mode) and
/// appended to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub source_name: String,
    pub message_id: i64,
    pub text: String,
    pub message_timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceWatermark {
    pub source_name: String,
    pub last_message_id: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub source_name: String,
    pub message_count: u64,
    pub max_message_id: i64,
    pub last_ingested_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogStats {
    pub total_messages: u64,
    pub channels: Vec<ChannelStats>,
    pub watermarks: Vec<SourceWatermark>,
    pub duplicate_message_ids: u64,
}

/// Last-seen identifier per source.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Creates the watermark row at 0 if the source has never been seen.
    async fn register(&self, source: &str) -> Result<(), StorageError>;

    /// Returns 0 for unknown sources.
    async fn get(&self, source: &str) -> Result<i64, StorageError>;

    /// Sets the watermark to `message_id` only when it is strictly greater
    /// than the stored value. Smaller or equal values are a no-op.
    async fn advance(&self, source: &str, message_id: i64) -> Result<(), StorageError>;

    async fn list_watermarks(&self) -> Result<Vec<SourceWatermark>, StorageError>;
}

/// Append-only message log with a unique constraint on `message_id`.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Of the given identifiers, returns those already present in the log.
    async fn existing_ids(&self, message_ids: &[i64]) -> Result<HashSet<i64>, StorageError>;

    /// Appends a record. Returns `false` when the identifier was already
    /// logged and the insert was dropped by the uniqueness constraint.
    async fn append(&self, record: &MessageRecord) -> Result<bool, StorageError>;

    async fn stats(&self) -> Result<LogStats, StorageError>;

    /// Deletes all but the earliest-ingested row for each duplicated
    /// message id. Returns the number of rows removed.
    async fn remove_duplicates(&self) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait Storage: WatermarkStore + MessageLog {
    async fn init_schema(&self) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}
