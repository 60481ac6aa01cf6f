//! SQLite-backed implementation of the sync queue port.
//!
//! Claims run inside an `IMMEDIATE` transaction and every row transition is a
//! conditional `UPDATE ... WHERE status = 'pending'`, so concurrent workers
//! (or processes sharing the file) never hand out the same item twice.

use std::sync::Arc;

use async_trait::async_trait;
use crmsync_core::SyncQueueRepository;
use crmsync_domain::{
    CrmSyncError, QueueStats, QueueStatus, Result as DomainResult, SyncQueueItem,
};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, warn};

use super::manager::{map_sql_error, with_connection, DbManager};

/// SQLite sync queue repository.
pub struct SqliteSyncQueueRepository {
    db: Arc<DbManager>,
}

impl SqliteSyncQueueRepository {
    /// Construct a repository backed by the shared manager.
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    async fn with_connection<T, F>(&self, op: F) -> DomainResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> DomainResult<T> + Send + 'static,
    {
        with_connection(&self.db, op).await
    }
}

#[async_trait]
impl SyncQueueRepository for SqliteSyncQueueRepository {
    async fn insert(&self, item: &SyncQueueItem) -> DomainResult<()> {
        let item = item.clone();
        self.with_connection(move |conn| {
            let payload = serde_json::to_string(&item.payload).map_err(|err| {
                CrmSyncError::InvalidInput(format!("payload is not serializable: {err}"))
            })?;
            conn.execute(
                INSERT_SQL,
                params![
                    item.id,
                    item.workspace_id,
                    item.object_type.as_str(),
                    item.operation.as_str(),
                    item.direction.as_str(),
                    item.priority,
                    payload,
                    item.retry_count,
                    item.max_retries,
                    item.next_retry_at,
                    item.status.as_str(),
                    item.error_message,
                    item.created_at,
                    item.updated_at,
                    item.completed_at,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn claim_ready(&self, limit: usize, now_ms: i64) -> DomainResult<Vec<SyncQueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_connection(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sql_error)?;

            let candidates = {
                let mut stmt = tx.prepare(SELECT_READY_SQL).map_err(map_sql_error)?;
                let rows = stmt
                    .query_map(params![now_ms, usize_to_i64(limit)], map_queue_row)
                    .map_err(map_sql_error)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)?
            };

            let mut claimed = Vec::with_capacity(candidates.len());
            for mut item in candidates {
                let changed =
                    tx.execute(CLAIM_SQL, params![item.id, now_ms]).map_err(map_sql_error)?;
                if changed == 1 {
                    item.status = QueueStatus::Processing;
                    item.updated_at = now_ms;
                    claimed.push(item);
                }
            }

            tx.commit().map_err(map_sql_error)?;
            debug!(claimed = claimed.len(), "claimed ready sync items");
            Ok(claimed)
        })
        .await
    }

    async fn claim_by_id(&self, id: &str, now_ms: i64) -> DomainResult<Option<SyncQueueItem>> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sql_error)?;

            let changed = tx.execute(CLAIM_SQL, params![id, now_ms]).map_err(map_sql_error)?;
            if changed == 0 {
                return Ok(None);
            }

            let item = tx
                .query_row(SELECT_BY_ID_SQL, params![id], map_queue_row)
                .optional()
                .map_err(map_sql_error)?;
            tx.commit().map_err(map_sql_error)?;
            Ok(item)
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> DomainResult<Option<SyncQueueItem>> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            conn.query_row(SELECT_BY_ID_SQL, params![id], map_queue_row)
                .optional()
                .map_err(map_sql_error)
        })
        .await
    }

    async fn mark_completed(&self, id: &str, now_ms: i64) -> DomainResult<()> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sync_queue
                     SET status = 'completed', completed_at = ?2, updated_at = ?2,
                         next_retry_at = NULL, error_message = NULL
                     WHERE id = ?1",
                    params![id, now_ms],
                )
                .map_err(map_sql_error)?;
            ensure_updated(changed, &id)
        })
        .await
    }

    async fn reschedule(
        &self,
        id: &str,
        retry_count: u32,
        next_retry_at: i64,
        error: &str,
        now_ms: i64,
    ) -> DomainResult<()> {
        let id = id.to_string();
        let error = error.to_string();
        self.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sync_queue
                     SET status = 'pending', retry_count = ?2, next_retry_at = ?3,
                         error_message = ?4, updated_at = ?5
                     WHERE id = ?1",
                    params![id, retry_count, next_retry_at, error, now_ms],
                )
                .map_err(map_sql_error)?;
            ensure_updated(changed, &id)
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: &str,
        retry_count: u32,
        error: &str,
        now_ms: i64,
    ) -> DomainResult<()> {
        let id = id.to_string();
        let error = error.to_string();
        self.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sync_queue
                     SET status = 'failed', retry_count = ?2, next_retry_at = NULL,
                         error_message = ?3, updated_at = ?4
                     WHERE id = ?1",
                    params![id, retry_count, error, now_ms],
                )
                .map_err(map_sql_error)?;
            ensure_updated(changed, &id)
        })
        .await
    }

    async fn reset_failed(&self, id: &str, now_ms: i64) -> DomainResult<bool> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sync_queue
                     SET status = 'pending', retry_count = 0, next_retry_at = NULL, updated_at = ?2
                     WHERE id = ?1 AND status = 'failed'",
                    params![id, now_ms],
                )
                .map_err(map_sql_error)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn has_pending(&self) -> DomainResult<bool> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sync_queue WHERE status = 'pending')",
                [],
                |row| row.get::<_, bool>(0),
            )
            .map_err(map_sql_error)
        })
        .await
    }

    async fn purge_terminal_before(&self, cutoff_ms: i64) -> DomainResult<usize> {
        self.with_connection(move |conn| {
            conn.execute(
                "DELETE FROM sync_queue
                 WHERE status IN ('completed', 'failed') AND updated_at < ?1",
                params![cutoff_ms],
            )
            .map_err(map_sql_error)
        })
        .await
    }

    async fn release_stale_processing(
        &self,
        claimed_before_ms: i64,
        now_ms: i64,
    ) -> DomainResult<usize> {
        self.with_connection(move |conn| {
            conn.execute(
                "UPDATE sync_queue SET status = 'pending', updated_at = ?2
                 WHERE status = 'processing' AND updated_at < ?1",
                params![claimed_before_ms, now_ms],
            )
            .map_err(map_sql_error)
        })
        .await
    }

    async fn stats(&self, workspace_id: Option<&str>) -> DomainResult<QueueStats> {
        let workspace_id = workspace_id.map(str::to_string);
        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT status, COUNT(*) FROM sync_queue
                     WHERE ?1 IS NULL OR workspace_id = ?1
                     GROUP BY status",
                )
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![workspace_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(map_sql_error)?;

            let mut stats = QueueStats::default();
            for row in rows {
                let (raw, count) = row.map_err(map_sql_error)?;
                match raw.parse::<QueueStatus>() {
                    Ok(status) => stats.record(status, u64::try_from(count).unwrap_or(0)),
                    Err(err) => warn!(raw_status = %raw, error = %err, "skipping unknown status"),
                }
            }
            Ok(stats)
        })
        .await
    }
}

const INSERT_SQL: &str = "INSERT INTO sync_queue (
        id, workspace_id, object_type, operation, direction, priority, payload,
        retry_count, max_retries, next_retry_at, status, error_message, created_at, updated_at,
        completed_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

const SELECT_READY_SQL: &str = "SELECT
        id, workspace_id, object_type, operation, direction, priority, payload,
        retry_count, max_retries, next_retry_at, status, error_message, created_at, updated_at,
        completed_at
    FROM sync_queue
    WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= ?1)
    ORDER BY priority ASC, created_at ASC, rowid ASC
    LIMIT ?2";

const SELECT_BY_ID_SQL: &str = "SELECT
        id, workspace_id, object_type, operation, direction, priority, payload,
        retry_count, max_retries, next_retry_at, status, error_message, created_at, updated_at,
        completed_at
    FROM sync_queue
    WHERE id = ?1";

const CLAIM_SQL: &str = "UPDATE sync_queue SET status = 'processing', updated_at = ?2
    WHERE id = ?1 AND status = 'pending'";

fn map_queue_row(row: &Row<'_>) -> rusqlite::Result<SyncQueueItem> {
    let id: String = row.get(0)?;
    let payload_raw: String = row.get(6)?;
    let payload = serde_json::from_str(&payload_raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(err)))?;
    let status_raw: String = row.get(10)?;
    let status = parse_status(&id, &status_raw);

    Ok(SyncQueueItem {
        workspace_id: row.get(1)?,
        object_type: parse_column(row, 2)?,
        operation: parse_column(row, 3)?,
        direction: parse_column(row, 4)?,
        priority: row.get(5)?,
        payload,
        retry_count: row.get(7)?,
        max_retries: row.get(8)?,
        next_retry_at: row.get(9)?,
        status,
        error_message: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        completed_at: row.get(14)?,
        id,
    })
}

/// Parse a wire-name column through its `FromStr` impl.
fn parse_column<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(index)?;
    raw.parse::<T>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::from(err))
    })
}

fn parse_status(id: &str, raw: &str) -> QueueStatus {
    match raw.parse::<QueueStatus>() {
        Ok(status) => status,
        Err(err) => {
            warn!(
                item_id = %id,
                raw_status = %raw,
                error = %err,
                "invalid sync queue status in database – treating as failed"
            );
            QueueStatus::Failed
        }
    }
}

fn ensure_updated(changed: usize, id: &str) -> DomainResult<()> {
    if changed == 0 {
        return Err(CrmSyncError::NotFound(format!("queue item {id}")));
    }
    Ok(())
}

fn usize_to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
