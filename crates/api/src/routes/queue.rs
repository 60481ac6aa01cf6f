//! Sync queue inspection and manual retry

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use crmsync_domain::{CrmSyncError, QueueStats, SyncQueueItem};
use serde::Deserialize;
use tracing::info;

use super::errors::RouteResult;
use crate::AppContext;

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub workspace: Option<String>,
}

pub async fn get_item(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> RouteResult<Json<SyncQueueItem>> {
    let item = context
        .queue
        .get(&id)
        .await?
        .ok_or_else(|| CrmSyncError::NotFound(format!("sync item {id}")))?;
    Ok(Json(item))
}

/// Reset a failed item to `pending` with a fresh retry budget.
pub async fn retry_item(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> RouteResult<Json<SyncQueueItem>> {
    let item = context.queue.retry_failed(&id).await?;
    info!(item_id = %id, "manual retry requested");
    Ok(Json(item))
}

pub async fn stats(
    State(context): State<Arc<AppContext>>,
    Query(query): Query<StatsQuery>,
) -> RouteResult<Json<QueueStats>> {
    let workspace = query.workspace.as_deref().filter(|workspace| !workspace.is_empty());
    Ok(Json(context.queue.stats(workspace).await?))
}
