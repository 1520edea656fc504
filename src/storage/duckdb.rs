use super::traits::{
    ChannelStats, LogStats, MessageLog, MessageRecord, SourceWatermark, Storage, StorageError,
    WatermarkStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Convert an `epoch_us(...)` column back into a UTC timestamp.
fn micros_to_datetime(column: usize, micros: i64) -> duckdb::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        duckdb::Error::FromSqlConversionFailure(
            column,
            duckdb::types::Type::BigInt,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid timestamp",
            )),
        )
    })
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Unavailable("connection mutex poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

/// DuckDB-backed watermark table and message log.
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Unavailable(format!(
                        "cannot create database directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            let message = e.to_string();
            if message.contains("Could not set lock") {
                tracing::error!(path = %path.display(), "Database is locked by another process");
                StorageError::Unavailable(message)
            } else {
                StorageError::Database(message)
            }
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl Storage for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS channel_states (
                    source_name VARCHAR PRIMARY KEY,
                    last_message_id BIGINT NOT NULL DEFAULT 0,
                    updated_at TIMESTAMPTZ NOT NULL
                )",
                [],
            )?;

            // The primary key on message_id is the backstop against double logging.
            conn.execute(
                "CREATE TABLE IF NOT EXISTS messages (
                    message_id BIGINT PRIMARY KEY,
                    source_name VARCHAR NOT NULL,
                    message_text VARCHAR NOT NULL,
                    message_timestamp TIMESTAMPTZ NOT NULL,
                    ingested_at TIMESTAMPTZ NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_messages_source ON messages(source_name)",
                [],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl WatermarkStore for DuckDbStorage {
    async fn register(&self, source: &str) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let source = source.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let inserted = conn.execute(
                "INSERT INTO channel_states (source_name, last_message_id, updated_at)
                 VALUES (?, 0, to_timestamp(? / 1000000.0))
                 ON CONFLICT (source_name) DO NOTHING",
                duckdb::params![source, Utc::now().timestamp_micros()],
            )?;
            if inserted > 0 {
                tracing::info!(source = %source, "Registered new source watermark");
            }
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn get(&self, source: &str) -> Result<i64, StorageError> {
        let conn = self.conn.clone();
        let source = source.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn
                .prepare("SELECT last_message_id FROM channel_states WHERE source_name = ?")?;
            let mut rows = stmt.query(duckdb::params![source])?;

            match rows.next()? {
                Some(row) => Ok(row.get::<_, i64>(0)?),
                None => Ok(0),
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn advance(&self, source: &str, message_id: i64) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let source = source.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO channel_states (source_name, last_message_id, updated_at)
                 VALUES (?, ?, to_timestamp(? / 1000000.0))
                 ON CONFLICT (source_name) DO UPDATE
                 SET last_message_id = EXCLUDED.last_message_id,
                     updated_at = EXCLUDED.updated_at
                 WHERE EXCLUDED.last_message_id > last_message_id",
                duckdb::params![source, message_id, Utc::now().timestamp_micros()],
            )?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn list_watermarks(&self) -> Result<Vec<SourceWatermark>, StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT source_name, last_message_id, epoch_us(updated_at)
                 FROM channel_states
                 ORDER BY source_name",
            )?;

            let rows = stmt.query_map([], |row| {
                Ok(SourceWatermark {
                    source_name: row.get(0)?,
                    last_message_id: row.get(1)?,
                    updated_at: micros_to_datetime(2, row.get(2)?)?,
                })
            })?;

            let mut watermarks = Vec::new();
            for row in rows {
                watermarks.push(row?);
            }
            Ok(watermarks)
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl MessageLog for DuckDbStorage {
    async fn existing_ids(&self, message_ids: &[i64]) -> Result<HashSet<i64>, StorageError> {
        if message_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let conn = self.conn.clone();
        let ids = message_ids.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT message_id FROM messages WHERE message_id IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(duckdb::params_from_iter(ids.iter()), |row| {
                row.get::<_, i64>(0)
            })?;

            let mut existing = HashSet::new();
            for row in rows {
                existing.insert(row?);
            }
            Ok(existing)
        })
        .await
        .map_err(join_error)?
    }

    async fn append(&self, record: &MessageRecord) -> Result<bool, StorageError> {
        let conn = self.conn.clone();
        let record = record.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            let inserted = conn.execute(
                "INSERT INTO messages (message_id, source_name, message_text, message_timestamp, ingested_at)
                 VALUES (?, ?, ?, to_timestamp(? / 1000000.0), to_timestamp(? / 1000000.0))
                 ON CONFLICT (message_id) DO NOTHING",
                duckdb::params![
                    record.message_id,
                    record.source_name,
                    record.text,
                    record.message_timestamp.timestamp_micros(),
                    record.ingested_at.timestamp_micros(),
                ],
            )?;

            Ok::<bool, StorageError>(inserted > 0)
        })
        .await
        .map_err(join_error)?
    }

    async fn stats(&self) -> Result<LogStats, StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            let total: i64 = conn.query_row("SELECT count(*) FROM messages", [], |row| row.get(0))?;

            let mut stmt = conn.prepare(
                "SELECT source_name, count(*), max(message_id), epoch_us(max(ingested_at))
                 FROM messages
                 GROUP BY source_name
                 ORDER BY count(*) DESC, source_name",
            )?;
            let rows = stmt.query_map([], |row| {
                let last_ingested: Option<i64> = row.get(3)?;
                Ok(ChannelStats {
                    source_name: row.get(0)?,
                    message_count: row.get::<_, i64>(1)? as u64,
                    max_message_id: row.get(2)?,
                    last_ingested_at: last_ingested
                        .map(|micros| micros_to_datetime(3, micros))
                        .transpose()?,
                })
            })?;
            let mut channels = Vec::new();
            for row in rows {
                channels.push(row?);
            }
            drop(stmt);

            let duplicates: i64 = conn.query_row(
                "SELECT count(*) FROM (
                    SELECT message_id FROM messages GROUP BY message_id HAVING count(*) > 1
                 ) AS dup",
                [],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT source_name, last_message_id, epoch_us(updated_at)
                 FROM channel_states
                 ORDER BY source_name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SourceWatermark {
                    source_name: row.get(0)?,
                    last_message_id: row.get(1)?,
                    updated_at: micros_to_datetime(2, row.get(2)?)?,
                })
            })?;
            let mut watermarks = Vec::new();
            for row in rows {
                watermarks.push(row?);
            }

            Ok(LogStats {
                total_messages: total as u64,
                channels,
                watermarks,
                duplicate_message_ids: duplicates as u64,
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn remove_duplicates(&self) -> Result<u64, StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let deleted = conn.execute(
                "DELETE FROM messages WHERE rowid IN (
                    SELECT rowid FROM (
                        SELECT rowid,
                               row_number() OVER (PARTITION BY message_id ORDER BY ingested_at, rowid) AS rn
                        FROM messages
                    ) AS ranked
                    WHERE rn > 1
                 )",
                [],
            )?;
            if deleted > 0 {
                tracing::info!(deleted, "Removed duplicate message rows");
            }
            Ok::<u64, StorageError>(deleted as u64)
        })
        .await
        .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_storage() -> DuckDbStorage {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_schema().await.unwrap();
        storage
    }

    fn record(source: &str, message_id: i64, text: &str) -> MessageRecord {
        let now = Utc::now();
        MessageRecord {
            source_name: source.to_string(),
            message_id,
            text: text.to_string(),
            message_timestamp: now,
            ingested_at: now,
        }
    }

    #[tokio::test]
    async fn test_schema_initialization_is_idempotent() {
        let storage = DuckDbStorage::in_memory().unwrap();
        assert!(storage.init_schema().await.is_ok());
        assert!(storage.init_schema().await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_source_watermark_is_zero() {
        let storage = setup_storage().await;
        assert_eq!(storage.get("alpha").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_creates_zero_row_once() {
        let storage = setup_storage().await;
        storage.register("alpha").await.unwrap();
        storage.advance("alpha", 7).await.unwrap();
        // A second registration must not reset the watermark
        storage.register("alpha").await.unwrap();

        let watermarks = storage.list_watermarks().await.unwrap();
        assert_eq!(watermarks.len(), 1);
        assert_eq!(watermarks[0].source_name, "alpha");
        assert_eq!(watermarks[0].last_message_id, 7);
    }

    #[tokio::test]
    async fn test_advance_is_monotonic() {
        let storage = setup_storage().await;

        for id in [5, 3, 9, 9, 1, 8] {
            storage.advance("alpha", id).await.unwrap();
        }

        assert_eq!(storage.get("alpha").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_advance_does_not_touch_other_sources() {
        let storage = setup_storage().await;
        storage.advance("alpha", 12).await.unwrap();
        storage.advance("beta", 3).await.unwrap();

        assert_eq!(storage.get("alpha").await.unwrap(), 12);
        assert_eq!(storage.get("beta").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_noop_advance_keeps_update_time() {
        let storage = setup_storage().await;
        storage.advance("alpha", 10).await.unwrap();
        let before = storage.list_watermarks().await.unwrap()[0].updated_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        storage.advance("alpha", 10).await.unwrap();
        storage.advance("alpha", 4).await.unwrap();

        let after = storage.list_watermarks().await.unwrap()[0].updated_at;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_append_rejects_second_insert_of_same_id() {
        let storage = setup_storage().await;

        assert!(storage.append(&record("alpha", 11, "A")).await.unwrap());
        assert!(!storage.append(&record("beta", 11, "other")).await.unwrap());

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.channels[0].source_name, "alpha");
    }

    #[tokio::test]
    async fn test_existing_ids() {
        let storage = setup_storage().await;
        storage.append(&record("alpha", 1, "one")).await.unwrap();
        storage.append(&record("alpha", 3, "three")).await.unwrap();

        let existing = storage.existing_ids(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(existing, HashSet::from([1, 3]));

        let none = storage.existing_ids(&[]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_stats_per_channel() {
        let storage = setup_storage().await;
        storage.append(&record("alpha", 1, "a1")).await.unwrap();
        storage.append(&record("alpha", 2, "a2")).await.unwrap();
        storage.append(&record("beta", 10, "b1")).await.unwrap();
        storage.advance("alpha", 2).await.unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.channels.len(), 2);
        assert_eq!(stats.channels[0].source_name, "alpha");
        assert_eq!(stats.channels[0].message_count, 2);
        assert_eq!(stats.channels[0].max_message_id, 2);
        assert!(stats.channels[0].last_ingested_at.is_some());
        assert_eq!(stats.channels[1].max_message_id, 10);
        assert_eq!(stats.watermarks.len(), 1);
        assert_eq!(stats.duplicate_message_ids, 0);
    }

    #[tokio::test]
    async fn test_remove_duplicates_on_clean_log() {
        let storage = setup_storage().await;
        storage.append(&record("alpha", 1, "a1")).await.unwrap();
        storage.append(&record("alpha", 2, "a2")).await.unwrap();

        assert_eq!(storage.remove_duplicates().await.unwrap(), 0);
        assert_eq!(storage.stats().await.unwrap().total_messages, 2);
    }

    #[tokio::test]
    async fn test_append_after_duplicate_leaves_original_text() {
        let storage = setup_storage().await;

        assert!(storage.append(&record("alpha", 7, "first")).await.unwrap());
        assert!(!storage.append(&record("alpha", 7, "second")).await.unwrap());
        assert!(storage.append(&record("alpha", 8, "third")).await.unwrap());

        let conn = storage.conn.lock().unwrap();
        let text: String = conn
            .query_row("SELECT message_text FROM messages WHERE message_id = 7", [], |row| row.get(0))
            .unwrap();
        assert_eq!(text, "first");
    }

    #[tokio::test]
    async fn test_remove_duplicates_on_log_without_unique_constraint() {
        // Logs imported from older stores were created without the key
        let storage = DuckDbStorage::in_memory().unwrap();
        {
            let conn = storage.conn.lock().unwrap();
            conn.execute_batch(
                "CREATE TABLE messages (
                    message_id BIGINT NOT NULL,
                    source_name VARCHAR NOT NULL,
                    message_text VARCHAR NOT NULL,
                    message_timestamp TIMESTAMPTZ NOT NULL,
                    ingested_at TIMESTAMPTZ NOT NULL
                 );
                 INSERT INTO messages VALUES
                    (5, 'alpha', 'kept', to_timestamp(1000), to_timestamp(1000)),
                    (5, 'alpha', 'later copy', to_timestamp(1000), to_timestamp(2000)),
                    (5, 'alpha', 'latest copy', to_timestamp(1000), to_timestamp(3000)),
                    (6, 'alpha', 'unique', to_timestamp(1000), to_timestamp(1000));",
            )
            .unwrap();
        }
        storage.init_schema().await.unwrap();

        let before = storage.stats().await.unwrap();
        assert_eq!(before.total_messages, 4);
        assert_eq!(before.duplicate_message_ids, 1);

        assert_eq!(storage.remove_duplicates().await.unwrap(), 2);

        let after = storage.stats().await.unwrap();
        assert_eq!(after.total_messages, 2);
        assert_eq!(after.duplicate_message_ids, 0);

        let conn = storage.conn.lock().unwrap();
        let text: String = conn
            .query_row("SELECT message_text FROM messages WHERE message_id = 5", [], |row| row.get(0))
            .unwrap();
        assert_eq!(text, "kept");
    }

    #[tokio::test]
    async fn test_file_backed_watermark_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("relay.duckdb");

        {
            let storage = DuckDbStorage::new(&path).unwrap();
            storage.init_schema().await.unwrap();
            storage.advance("alpha", 42).await.unwrap();
        }

        let storage = DuckDbStorage::new(&path).unwrap();
        storage.init_schema().await.unwrap();
        assert_eq!(storage.get("alpha").await.unwrap(), 42);
    }
}
