//! Sync queue types
//!
//! These types represent rows of the `sync_queue` table and are used by the
//! repository ports in `crmsync-core`. All timestamps are Unix epoch
//! milliseconds.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_PRIORITY;

/// CRM object kind an item refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Contact,
    Company,
    Deal,
    Activity,
}

crate::impl_wire_conversions!(ObjectType {
    Contact => "contact",
    Company => "company",
    Deal => "deal",
    Activity => "activity"
});

/// Mutation carried by a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

crate::impl_wire_conversions!(SyncOperation {
    Create => "create",
    Update => "update",
    Delete => "delete"
});

/// Which side is the source of truth for the item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local change pushed to the CRM
    ToRemote,
    /// CRM change pulled into the local store
    FromRemote,
}

crate::impl_wire_conversions!(SyncDirection {
    ToRemote => "to_remote",
    FromRemote => "from_remote"
});

/// Queue item lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

crate::impl_wire_conversions!(QueueStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed"
});

impl QueueStatus {
    /// Completed and failed items are never picked up again automatically.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A persisted unit of sync work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: String,
    pub workspace_id: String,
    pub object_type: ObjectType,
    pub operation: SyncOperation,
    pub direction: SyncDirection,
    /// Lower values are processed first
    pub priority: i32,
    pub payload: serde_json::Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<i64>,
    pub status: QueueStatus,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl SyncQueueItem {
    /// Whether the item may be claimed at `now_ms`.
    pub fn is_ready(&self, now_ms: i64) -> bool {
        self.status == QueueStatus::Pending && self.next_retry_at.map_or(true, |at| at <= now_ms)
    }

    /// Whether one more failure would exhaust the retry budget.
    pub fn retries_exhausted_after_failure(&self) -> bool {
        self.retry_count + 1 > self.max_retries
    }

    /// Remote CRM id carried in the payload, if any.
    pub fn remote_id(&self) -> Option<&str> {
        self.payload.get("remoteId").and_then(serde_json::Value::as_str)
    }

    /// CRM properties carried in the payload, or an empty object.
    pub fn properties(&self) -> serde_json::Value {
        self.payload
            .get("properties")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Request to enqueue a new item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSyncItem {
    pub workspace_id: String,
    pub object_type: ObjectType,
    pub operation: SyncOperation,
    pub direction: SyncDirection,
    pub payload: serde_json::Value,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl NewSyncItem {
    pub fn new(
        workspace_id: impl Into<String>,
        object_type: ObjectType,
        operation: SyncOperation,
        direction: SyncDirection,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            object_type,
            operation,
            direction,
            payload,
            priority: DEFAULT_PRIORITY,
            max_retries: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Materialize a pending queue row.
    pub fn into_item(self, id: String, now_ms: i64, default_max_retries: u32) -> SyncQueueItem {
        SyncQueueItem {
            id,
            workspace_id: self.workspace_id,
            object_type: self.object_type,
            operation: self.operation,
            direction: self.direction,
            priority: self.priority,
            payload: self.payload,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            next_retry_at: None,
            status: QueueStatus::Pending,
            error_message: None,
            created_at: now_ms,
            updated_at: now_ms,
            completed_at: None,
        }
    }
}

/// Per-status counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }

    pub fn record(&mut self, status: QueueStatus, count: u64) {
        match status {
            QueueStatus::Pending => self.pending += count,
            QueueStatus::Processing => self.processing += count,
            QueueStatus::Completed => self.completed += count,
            QueueStatus::Failed => self.failed += count,
        }
    }
}
