//! SQLite-backed webhook event log.
//!
//! One row per `(workspace_id, event_id)`. Redeliveries bump `deliveries`;
//! the recorded outcome is only replaced while the previous attempt was
//! unsuccessful, so a later duplicate-skip never masks the original result.

use std::sync::Arc;

use async_trait::async_trait;
use crmsync_core::WebhookEventLog;
use crmsync_domain::{CrmSyncError, Result as DomainResult, WebhookEvent, WebhookResult};
use rusqlite::{params, OptionalExtension};

use super::manager::{map_sql_error, with_connection, DbManager};

/// Row returned by [`SqliteWebhookEventLog::find`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEventRecord {
    pub event_id: u64,
    pub subscription_type: String,
    pub success: bool,
    pub action: String,
    pub error: Option<String>,
    pub queue_item_id: Option<String>,
    pub deliveries: u32,
}

/// SQLite webhook event log.
pub struct SqliteWebhookEventLog {
    db: Arc<DbManager>,
}

impl SqliteWebhookEventLog {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Look up the recorded outcome for an event.
    pub async fn find(
        &self,
        workspace_id: &str,
        event_id: u64,
    ) -> DomainResult<Option<WebhookEventRecord>> {
        let workspace_id = workspace_id.to_string();
        let key = event_key(event_id)?;
        with_connection(&self.db, move |conn| {
            conn.query_row(
                "SELECT event_id, subscription_type, success, action, error, queue_item_id,
                        deliveries
                 FROM webhook_events WHERE workspace_id = ?1 AND event_id = ?2",
                params![workspace_id, key],
                |row| {
                    Ok(WebhookEventRecord {
                        event_id: u64::try_from(row.get::<_, i64>(0)?).unwrap_or_default(),
                        subscription_type: row.get(1)?,
                        success: row.get(2)?,
                        action: row.get(3)?,
                        error: row.get(4)?,
                        queue_item_id: row.get(5)?,
                        deliveries: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
    }
}

#[async_trait]
impl WebhookEventLog for SqliteWebhookEventLog {
    async fn is_processed(&self, workspace_id: &str, event_id: u64) -> DomainResult<bool> {
        let workspace_id = workspace_id.to_string();
        let key = event_key(event_id)?;
        with_connection(&self.db, move |conn| {
            conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM webhook_events
                    WHERE workspace_id = ?1 AND event_id = ?2 AND success = 1
                 )",
                params![workspace_id, key],
                |row| row.get::<_, bool>(0),
            )
            .map_err(map_sql_error)
        })
        .await
    }

    async fn record(
        &self,
        workspace_id: &str,
        event: &WebhookEvent,
        result: &WebhookResult,
        now_ms: i64,
    ) -> DomainResult<()> {
        let workspace_id = workspace_id.to_string();
        let key = event_key(event.event_id)?;
        let object_id = i64::try_from(event.object_id).unwrap_or(i64::MAX);
        let subscription_type = event.subscription_type.clone();
        let occurred_at = event.occurred_at;
        let result = result.clone();

        with_connection(&self.db, move |conn| {
            conn.execute(
                UPSERT_SQL,
                params![
                    workspace_id,
                    key,
                    subscription_type,
                    object_id,
                    occurred_at,
                    result.success,
                    result.action.as_str(),
                    result.error,
                    result.queue_item_id,
                    now_ms,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }
}

const UPSERT_SQL: &str = "INSERT INTO webhook_events (
        workspace_id, event_id, subscription_type, object_id, occurred_at, success, action,
        error, queue_item_id, received_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT (workspace_id, event_id) DO UPDATE SET
        deliveries = webhook_events.deliveries + 1,
        success = CASE WHEN webhook_events.success = 1 THEN 1 ELSE excluded.success END,
        action = CASE WHEN webhook_events.success = 1
            THEN webhook_events.action ELSE excluded.action END,
        error = CASE WHEN webhook_events.success = 1
            THEN webhook_events.error ELSE excluded.error END,
        queue_item_id = CASE WHEN webhook_events.success = 1
            THEN webhook_events.queue_item_id ELSE excluded.queue_item_id END,
        received_at = excluded.received_at";

fn event_key(event_id: u64) -> DomainResult<i64> {
    i64::try_from(event_id)
        .map_err(|_| CrmSyncError::InvalidInput(format!("event id {event_id} out of range")))
}
