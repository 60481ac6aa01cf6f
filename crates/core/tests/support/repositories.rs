//! In-memory implementations of the core ports
//!
//! Deterministic stand-ins for the SQLite repositories and the HubSpot
//! entity sync, so queue behaviour can be tested without I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use crmsync_core::{
    EntitySyncService, SyncError, SyncOutcome, SyncQueueRepository, WebhookEventLog,
};
use crmsync_domain::{
    CrmSyncError, QueueStats, QueueStatus, Result as DomainResult, SyncQueueItem, WebhookEvent,
    WebhookResult,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Queue rows kept in insertion order.
#[derive(Default)]
pub struct InMemoryQueueRepository {
    items: Mutex<Vec<SyncQueueItem>>,
    fail_next_claim: AtomicBool,
}

impl InMemoryQueueRepository {
    pub fn item(&self, id: &str) -> SyncQueueItem {
        self.items.lock().iter().find(|item| item.id == id).cloned().expect("item exists")
    }

    pub fn set_status(&self, id: &str, status: QueueStatus, updated_at: i64) {
        let mut items = self.items.lock();
        let item = items.iter_mut().find(|item| item.id == id).expect("item exists");
        item.status = status;
        item.updated_at = updated_at;
    }

    /// Make the next `claim_ready` fail as a locked database would.
    pub fn fail_next_claim(&self) {
        self.fail_next_claim.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    fn update<F: FnOnce(&mut SyncQueueItem)>(&self, id: &str, apply: F) {
        if let Some(item) = self.items.lock().iter_mut().find(|item| item.id == id) {
            apply(item);
        }
    }
}

#[async_trait]
impl SyncQueueRepository for InMemoryQueueRepository {
    async fn insert(&self, item: &SyncQueueItem) -> DomainResult<()> {
        self.items.lock().push(item.clone());
        Ok(())
    }

    async fn claim_ready(&self, limit: usize, now_ms: i64) -> DomainResult<Vec<SyncQueueItem>> {
        if self.fail_next_claim.swap(false, Ordering::SeqCst) {
            return Err(CrmSyncError::Database("database is locked".into()));
        }
        let mut items = self.items.lock();
        let mut ready: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_ready(now_ms))
            .map(|(index, _)| index)
            .collect();
        ready.sort_by_key(|index| (items[*index].priority, items[*index].created_at, *index));
        ready.truncate(limit);

        Ok(ready
            .into_iter()
            .map(|index| {
                let item = &mut items[index];
                item.status = QueueStatus::Processing;
                item.updated_at = now_ms;
                item.clone()
            })
            .collect())
    }

    async fn claim_by_id(&self, id: &str, now_ms: i64) -> DomainResult<Option<SyncQueueItem>> {
        let mut items = self.items.lock();
        Ok(items.iter_mut().find(|item| item.id == id && item.status == QueueStatus::Pending).map(
            |item| {
                item.status = QueueStatus::Processing;
                item.updated_at = now_ms;
                item.clone()
            },
        ))
    }

    async fn find_by_id(&self, id: &str) -> DomainResult<Option<SyncQueueItem>> {
        Ok(self.items.lock().iter().find(|item| item.id == id).cloned())
    }

    async fn mark_completed(&self, id: &str, now_ms: i64) -> DomainResult<()> {
        self.update(id, |item| {
            item.status = QueueStatus::Completed;
            item.completed_at = Some(now_ms);
            item.updated_at = now_ms;
            item.error_message = None;
        });
        Ok(())
    }

    async fn reschedule(
        &self,
        id: &str,
        retry_count: u32,
        next_retry_at: i64,
        error: &str,
        now_ms: i64,
    ) -> DomainResult<()> {
        self.update(id, |item| {
            item.status = QueueStatus::Pending;
            item.retry_count = retry_count;
            item.next_retry_at = Some(next_retry_at);
            item.error_message = Some(error.to_string());
            item.updated_at = now_ms;
        });
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &str,
        retry_count: u32,
        error: &str,
        now_ms: i64,
    ) -> DomainResult<()> {
        self.update(id, |item| {
            item.status = QueueStatus::Failed;
            item.retry_count = retry_count;
            item.next_retry_at = None;
            item.error_message = Some(error.to_string());
            item.updated_at = now_ms;
        });
        Ok(())
    }

    async fn reset_failed(&self, id: &str, now_ms: i64) -> DomainResult<bool> {
        let mut items = self.items.lock();
        match items.iter_mut().find(|item| item.id == id && item.status == QueueStatus::Failed) {
            Some(item) => {
                item.status = QueueStatus::Pending;
                item.retry_count = 0;
                item.next_retry_at = None;
                item.updated_at = now_ms;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn has_pending(&self) -> DomainResult<bool> {
        Ok(self.items.lock().iter().any(|item| item.status == QueueStatus::Pending))
    }

    async fn purge_terminal_before(&self, cutoff_ms: i64) -> DomainResult<usize> {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|item| !(item.status.is_terminal() && item.updated_at < cutoff_ms));
        Ok(before - items.len())
    }

    async fn release_stale_processing(
        &self,
        claimed_before_ms: i64,
        now_ms: i64,
    ) -> DomainResult<usize> {
        let mut released = 0;
        for item in self.items.lock().iter_mut() {
            if item.status == QueueStatus::Processing && item.updated_at < claimed_before_ms {
                item.status = QueueStatus::Pending;
                item.updated_at = now_ms;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn stats(&self, workspace_id: Option<&str>) -> DomainResult<QueueStats> {
        let mut stats = QueueStats::default();
        for item in self.items.lock().iter() {
            if workspace_id.map_or(true, |ws| ws == item.workspace_id) {
                stats.record(item.status, 1);
            }
        }
        Ok(stats)
    }
}

/// Entity sync double that records every call and fails on demand.
#[derive(Default)]
pub struct ScriptedSync {
    calls: Mutex<Vec<SyncQueueItem>>,
    failures_left: AtomicU32,
    permanent: bool,
    gate: Option<Arc<Notify>>,
}

impl ScriptedSync {
    /// Fail the next `count` calls with a retryable error.
    pub fn failing(count: u32) -> Self {
        Self { failures_left: AtomicU32::new(count), ..Self::default() }
    }

    /// Fail every call with a permanent error.
    pub fn rejecting() -> Self {
        Self { failures_left: AtomicU32::new(u32::MAX), permanent: true, ..Self::default() }
    }

    /// Block every call until the gate is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self { gate: Some(gate), ..Self::default() }
    }

    pub fn calls(&self) -> Vec<SyncQueueItem> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl EntitySyncService for ScriptedSync {
    async fn sync(&self, item: &SyncQueueItem) -> Result<SyncOutcome, SyncError> {
        self.calls.lock().push(item.clone());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let attempt = self.call_count();
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if should_fail {
            let message = format!("remote error on attempt {attempt}");
            return Err(if self.permanent {
                SyncError::permanent(item.object_type, item.operation, message)
            } else {
                SyncError::transient(item.object_type, item.operation, message)
            });
        }

        Ok(SyncOutcome::Pushed { remote_id: item.remote_id().map(str::to_string) })
    }
}

/// Webhook event log keyed by workspace and event id.
#[derive(Default)]
pub struct InMemoryWebhookLog {
    entries: Mutex<HashMap<(String, u64), WebhookResult>>,
}

impl InMemoryWebhookLog {
    pub fn result(&self, workspace_id: &str, event_id: u64) -> Option<WebhookResult> {
        self.entries.lock().get(&(workspace_id.to_string(), event_id)).cloned()
    }
}

#[async_trait]
impl WebhookEventLog for InMemoryWebhookLog {
    async fn is_processed(&self, workspace_id: &str, event_id: u64) -> DomainResult<bool> {
        Ok(self
            .entries
            .lock()
            .get(&(workspace_id.to_string(), event_id))
            .is_some_and(|result| result.success))
    }

    async fn record(
        &self,
        workspace_id: &str,
        event: &WebhookEvent,
        result: &WebhookResult,
        _now_ms: i64,
    ) -> DomainResult<()> {
        let key = (workspace_id.to_string(), event.event_id);
        let mut entries = self.entries.lock();
        // A later duplicate must not overwrite the original outcome.
        if !entries.get(&key).is_some_and(|existing| existing.success) {
            entries.insert(key, result.clone());
        }
        Ok(())
    }
}
