use crate::source::SourceItem;
use crate::storage::{MessageLog, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupResult {
    /// Items never logged before, in the batch's original order.
    pub fresh: Vec<SourceItem>,
    pub already_logged: usize,
}

/// Drops items whose identifier is already in the message log.
///
/// This is a membership check against the log, not a range check against the
/// watermark: a crash between logging and advancing, or an overlapping page,
/// can both leave logged identifiers above the watermark.
pub async fn filter_unlogged<L>(log: &L, batch: Vec<SourceItem>) -> Result<DedupResult, StorageError>
where
    L: MessageLog + ?Sized,
{
    if batch.is_empty() {
        return Ok(DedupResult {
            fresh: batch,
            already_logged: 0,
        });
    }

    let ids: Vec<i64> = batch.iter().map(|item| item.id).collect();
    let existing = log.existing_ids(&ids).await?;

    let total = batch.len();
    let fresh: Vec<SourceItem> = batch
        .into_iter()
        .filter(|item| !existing.contains(&item.id))
        .collect();

    Ok(DedupResult {
        already_logged: total - fresh.len(),
        fresh,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::duckdb::DuckDbStorage;
    use crate::storage::{MessageRecord, Storage};
    use chrono::Utc;

    fn item(id: i64) -> SourceItem {
        SourceItem {
            id,
            text: Some(format!("message {}", id)),
            timestamp: Utc::now(),
        }
    }

    async fn log_with(ids: &[i64]) -> DuckDbStorage {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_schema().await.unwrap();
        for &id in ids {
            storage
                .append(&MessageRecord {
                    source_name: "alpha".to_string(),
                    message_id: id,
                    text: "logged".to_string(),
                    message_timestamp: Utc::now(),
                    ingested_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn test_excludes_logged_ids_and_keeps_order() {
        let storage = log_with(&[11, 13]).await;

        let result = filter_unlogged(&storage, vec![item(10), item(11), item(12), item(13), item(14)])
            .await
            .unwrap();

        let ids: Vec<i64> = result.fresh.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![10, 12, 14]);
        assert_eq!(result.already_logged, 2);
    }

    #[tokio::test]
    async fn test_nothing_logged_keeps_everything() {
        let storage = log_with(&[]).await;

        let result = filter_unlogged(&storage, vec![item(3), item(1), item(2)]).await.unwrap();

        let ids: Vec<i64> = result.fresh.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(result.already_logged, 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let storage = log_with(&[1]).await;
        let result = filter_unlogged(&storage, Vec::new()).await.unwrap();
        assert!(result.fresh.is_empty());
    }

    #[tokio::test]
    async fn test_works_through_trait_object() {
        let storage: std::sync::Arc<dyn Storage> = std::sync::Arc::new(log_with(&[5]).await);
        let result = filter_unlogged(storage.as_ref(), vec![item(5), item(6)]).await.unwrap();
        assert_eq!(result.fresh.len(), 1);
        assert_eq!(result.fresh[0].id, 6);
    }
}
