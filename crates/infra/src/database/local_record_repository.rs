//! SQLite mirror of CRM records pulled from HubSpot.

use std::sync::Arc;

use async_trait::async_trait;
use crmsync_core::LocalRecordStore;
use crmsync_domain::{CrmRecord, CrmSyncError, ObjectType, Result as DomainResult};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use super::manager::{map_sql_error, with_connection, DbManager};

/// SQLite local record store.
pub struct SqliteLocalRecordStore {
    db: Arc<DbManager>,
}

impl SqliteLocalRecordStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// All mirrored records of one type in a workspace, most recent first.
    pub async fn list(
        &self,
        workspace_id: &str,
        object_type: ObjectType,
    ) -> DomainResult<Vec<CrmRecord>> {
        let workspace_id = workspace_id.to_string();
        with_connection(&self.db, move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT workspace_id, object_type, remote_id, properties, updated_at
                     FROM crm_records WHERE workspace_id = ?1 AND object_type = ?2
                     ORDER BY updated_at DESC",
                )
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![workspace_id, object_type.as_str()], map_record_row)
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
    }
}

#[async_trait]
impl LocalRecordStore for SqliteLocalRecordStore {
    async fn upsert(&self, record: &CrmRecord) -> DomainResult<()> {
        let record = record.clone();
        with_connection(&self.db, move |conn| {
            let properties = serde_json::to_string(&record.properties).map_err(|err| {
                CrmSyncError::InvalidInput(format!("record properties not serializable: {err}"))
            })?;
            conn.execute(
                "INSERT INTO crm_records (workspace_id, object_type, remote_id, properties, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (workspace_id, object_type, remote_id) DO UPDATE SET
                     properties = excluded.properties,
                     updated_at = excluded.updated_at",
                params![
                    record.workspace_id,
                    record.object_type.as_str(),
                    record.remote_id,
                    properties,
                    record.updated_at,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn remove(
        &self,
        workspace_id: &str,
        object_type: ObjectType,
        remote_id: &str,
    ) -> DomainResult<bool> {
        let workspace_id = workspace_id.to_string();
        let remote_id = remote_id.to_string();
        with_connection(&self.db, move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM crm_records
                     WHERE workspace_id = ?1 AND object_type = ?2 AND remote_id = ?3",
                    params![workspace_id, object_type.as_str(), remote_id],
                )
                .map_err(map_sql_error)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn get(
        &self,
        workspace_id: &str,
        object_type: ObjectType,
        remote_id: &str,
    ) -> DomainResult<Option<CrmRecord>> {
        let workspace_id = workspace_id.to_string();
        let remote_id = remote_id.to_string();
        with_connection(&self.db, move |conn| {
            conn.query_row(
                "SELECT workspace_id, object_type, remote_id, properties, updated_at
                 FROM crm_records
                 WHERE workspace_id = ?1 AND object_type = ?2 AND remote_id = ?3",
                params![workspace_id, object_type.as_str(), remote_id],
                map_record_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
    }
}

fn map_record_row(row: &Row<'_>) -> rusqlite::Result<CrmRecord> {
    let object_type: String = row.get(1)?;
    let object_type = object_type
        .parse::<ObjectType>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::from(err)))?;
    let properties: String = row.get(3)?;
    let properties = serde_json::from_str(&properties)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err)))?;

    Ok(CrmRecord {
        workspace_id: row.get(0)?,
        object_type,
        remote_id: row.get(2)?,
        properties,
        updated_at: row.get(4)?,
    })
}
