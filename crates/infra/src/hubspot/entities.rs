//! HubSpot CRM v3 entity sync
//!
//! One [`HubSpotEntitySync`] serves every object type; the object type only
//! selects the path under `/crm/v3/objects`. Queue payloads carry
//! `{"remoteId"?: string, "properties": {...}}`.

use std::sync::Arc;

use async_trait::async_trait;
use crmsync_common::resilience::Clock;
use crmsync_core::{EntitySyncService, LocalRecordStore, SyncError, SyncOutcome};
use crmsync_domain::{CrmRecord, ObjectType, SyncDirection, SyncOperation, SyncQueueItem};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use super::client::HubSpotClient;
use super::errors::ApiError;
use super::registry::HubSpotClientRegistry;
use crate::http::RequestOptions;

/// CRM v3 collection for an object type. Activities are stored as notes.
pub fn object_path(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::Contact => "/crm/v3/objects/contacts",
        ObjectType::Company => "/crm/v3/objects/companies",
        ObjectType::Deal => "/crm/v3/objects/deals",
        ObjectType::Activity => "/crm/v3/objects/notes",
    }
}

/// Executes queue items against HubSpot and mirrors pulled records locally
pub struct HubSpotEntitySync {
    registry: Arc<HubSpotClientRegistry>,
    records: Arc<dyn LocalRecordStore>,
    clock: Arc<dyn Clock>,
    options: RequestOptions,
}

impl HubSpotEntitySync {
    pub fn new(
        registry: Arc<HubSpotClientRegistry>,
        records: Arc<dyn LocalRecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { registry, records, clock, options: RequestOptions::default() }
    }

    /// Options applied to every HubSpot call (deadline, cancellation)
    #[must_use]
    pub fn with_request_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    fn now_ms(&self) -> i64 {
        i64::try_from(self.clock.millis_since_epoch()).unwrap_or(i64::MAX)
    }

    async fn push(
        &self,
        client: &HubSpotClient,
        item: &SyncQueueItem,
    ) -> Result<SyncOutcome, ApiError> {
        let base = object_path(item.object_type);

        match item.operation {
            SyncOperation::Create => {
                let body = json!({ "properties": item.properties() });
                let response = client.post(base, &body, &self.options).await?;
                let remote_id = response.as_ref().and_then(response_id);
                info!(remote_id = remote_id.as_deref(), "Created HubSpot object");
                Ok(SyncOutcome::Pushed { remote_id })
            }
            SyncOperation::Update => {
                let remote_id = require_remote_id(item)?;
                let body = json!({ "properties": item.properties() });
                client.patch(&format!("{base}/{remote_id}"), &body, &self.options).await?;
                Ok(SyncOutcome::Pushed { remote_id: Some(remote_id.to_string()) })
            }
            SyncOperation::Delete => {
                let remote_id = require_remote_id(item)?;
                match client.delete(&format!("{base}/{remote_id}"), &self.options).await {
                    Ok(_) => {}
                    Err(ApiError::Api { status: 404, .. }) => {
                        debug!(remote_id, "HubSpot object already deleted");
                    }
                    Err(err) => return Err(err),
                }
                Ok(SyncOutcome::Pushed { remote_id: Some(remote_id.to_string()) })
            }
        }
    }

    async fn pull(
        &self,
        client: &HubSpotClient,
        item: &SyncQueueItem,
    ) -> Result<SyncOutcome, SyncError> {
        let remote_id = require_remote_id(item)
            .map_err(|err| err.into_sync_error(item.object_type, item.operation))?;

        if item.operation == SyncOperation::Delete {
            return self.remove_local(item, remote_id).await;
        }

        let path = format!("{}/{remote_id}", object_path(item.object_type));
        let response = match client.get(&path, &[], &self.options).await {
            Ok(response) => response,
            Err(ApiError::Api { status: 404, .. }) => {
                debug!(remote_id, "Remote object no longer exists");
                return self.remove_local(item, remote_id).await;
            }
            Err(err) => return Err(err.into_sync_error(item.object_type, item.operation)),
        };

        let properties = response
            .as_ref()
            .and_then(|body| body.get("properties"))
            .cloned()
            .unwrap_or_else(|| item.properties());

        let record = CrmRecord {
            workspace_id: item.workspace_id.clone(),
            object_type: item.object_type,
            remote_id: remote_id.to_string(),
            properties,
            updated_at: self.now_ms(),
        };
        self.records.upsert(&record).await.map_err(|err| {
            SyncError::transient(item.object_type, item.operation, err.to_string())
        })?;

        Ok(SyncOutcome::Pulled { remote_id: remote_id.to_string() })
    }

    async fn remove_local(
        &self,
        item: &SyncQueueItem,
        remote_id: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let removed = self
            .records
            .remove(&item.workspace_id, item.object_type, remote_id)
            .await
            .map_err(|err| SyncError::transient(item.object_type, item.operation, err.to_string()))?;
        debug!(remote_id, removed, "Applied remote deletion locally");
        Ok(SyncOutcome::Removed { remote_id: remote_id.to_string() })
    }
}

#[async_trait]
impl EntitySyncService for HubSpotEntitySync {
    #[instrument(
        skip(self, item),
        fields(
            item_id = %item.id,
            workspace_id = %item.workspace_id,
            object_type = %item.object_type,
            operation = %item.operation
        )
    )]
    async fn sync(&self, item: &SyncQueueItem) -> Result<SyncOutcome, SyncError> {
        let client = self
            .registry
            .client(&item.workspace_id)
            .map_err(|err| err.into_sync_error(item.object_type, item.operation))?;

        match item.direction {
            SyncDirection::ToRemote => self
                .push(&client, item)
                .await
                .map_err(|err| err.into_sync_error(item.object_type, item.operation)),
            SyncDirection::FromRemote => self.pull(&client, item).await,
        }
    }
}

fn require_remote_id(item: &SyncQueueItem) -> Result<&str, ApiError> {
    item.remote_id().filter(|id| !id.is_empty()).ok_or_else(|| ApiError::Validation {
        message: format!("{} {} payload is missing remoteId", item.operation, item.object_type),
        errors: Vec::new(),
    })
}

fn response_id(body: &Value) -> Option<String> {
    match body.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
