//! Port interfaces for sync operations

use async_trait::async_trait;
use crmsync_domain::{
    CrmRecord, ObjectType, QueueStats, Result, SyncQueueItem, WebhookEvent, WebhookResult,
};

use super::errors::SyncError;

/// Persistence for the sync queue
///
/// Implementations must make every claim an atomic conditional update: a row
/// is handed out only if it is still `pending` at the moment of the update,
/// so two workers can never claim the same item.
#[async_trait]
pub trait SyncQueueRepository: Send + Sync {
    /// Insert a freshly created item
    async fn insert(&self, item: &SyncQueueItem) -> Result<()>;

    /// Claim up to `limit` ready items (pending, `next_retry_at` null or due),
    /// ordered by priority then creation time, and mark them `processing`.
    async fn claim_ready(&self, limit: usize, now_ms: i64) -> Result<Vec<SyncQueueItem>>;

    /// Claim a single pending item regardless of its `next_retry_at`.
    async fn claim_by_id(&self, id: &str, now_ms: i64) -> Result<Option<SyncQueueItem>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<SyncQueueItem>>;

    async fn mark_completed(&self, id: &str, now_ms: i64) -> Result<()>;

    /// Return a failed attempt to `pending` with a future retry time
    async fn reschedule(
        &self,
        id: &str,
        retry_count: u32,
        next_retry_at: i64,
        error: &str,
        now_ms: i64,
    ) -> Result<()>;

    /// Move an item to the terminal `failed` state
    async fn mark_failed(&self, id: &str, retry_count: u32, error: &str, now_ms: i64)
        -> Result<()>;

    /// Reset a `failed` item to `pending` with a zero retry count.
    ///
    /// Returns `false` when the item is not in the `failed` state.
    async fn reset_failed(&self, id: &str, now_ms: i64) -> Result<bool>;

    /// Whether any `pending` rows exist, due or not
    async fn has_pending(&self) -> Result<bool>;

    /// Delete `completed`/`failed` rows last updated before `cutoff_ms`
    async fn purge_terminal_before(&self, cutoff_ms: i64) -> Result<usize>;

    /// Return rows stuck in `processing` since before `claimed_before_ms` to
    /// `pending`
    async fn release_stale_processing(&self, claimed_before_ms: i64, now_ms: i64)
        -> Result<usize>;

    async fn stats(&self, workspace_id: Option<&str>) -> Result<QueueStats>;
}

/// What a successful sync did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local change written to the CRM
    Pushed { remote_id: Option<String> },
    /// Remote record stored locally
    Pulled { remote_id: String },
    /// Remote deletion applied locally
    Removed { remote_id: String },
}

/// Executes one queue item against the CRM
#[async_trait]
pub trait EntitySyncService: Send + Sync {
    async fn sync(&self, item: &SyncQueueItem) -> std::result::Result<SyncOutcome, SyncError>;
}

/// Local mirror of remote CRM records, written by `from_remote` syncs
#[async_trait]
pub trait LocalRecordStore: Send + Sync {
    async fn upsert(&self, record: &CrmRecord) -> Result<()>;

    /// Returns whether a record was removed
    async fn remove(&self, workspace_id: &str, object_type: ObjectType, remote_id: &str)
        -> Result<bool>;

    async fn get(
        &self,
        workspace_id: &str,
        object_type: ObjectType,
        remote_id: &str,
    ) -> Result<Option<CrmRecord>>;
}

/// Log of processed webhook events used for duplicate detection
#[async_trait]
pub trait WebhookEventLog: Send + Sync {
    /// Whether the event was already handled successfully for this workspace
    async fn is_processed(&self, workspace_id: &str, event_id: u64) -> Result<bool>;

    async fn record(
        &self,
        workspace_id: &str,
        event: &WebhookEvent,
        result: &WebhookResult,
        now_ms: i64,
    ) -> Result<()>;
}
