//! Sync queue service - enqueue, process and retry sync items

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crmsync_common::resilience::Clock;
use crmsync_domain::constants::{DEFAULT_MAX_RETRIES, MAX_ERROR_MESSAGE_LENGTH};
use crmsync_domain::{CrmSyncError, NewSyncItem, QueueStats, QueueStatus, Result, SyncQueueItem};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::dispatch::SyncDispatcher;
use super::errors::SyncError;
use super::ports::SyncQueueRepository;
use super::schedule::delay_for_attempt;

/// Tuning for [`SyncQueueService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueConfig {
    /// Items claimed and run concurrently per pass
    pub max_concurrency: usize,
    /// Delay before the follow-up pass while pending items remain
    pub poll_delay: Duration,
    pub default_max_retries: u32,
    /// Start a pass automatically after `enqueue` and keep polling while
    /// pending items remain
    pub auto_process: bool,
}

impl Default for SyncQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            poll_delay: Duration::from_secs(5),
            default_max_retries: DEFAULT_MAX_RETRIES,
            auto_process: true,
        }
    }
}

/// Result of running one claimed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed,
    Rescheduled { retry_count: u32, next_retry_at: i64 },
    Failed { error: String },
    /// Replay of an item that already completed; nothing was executed
    AlreadyCompleted,
    /// The item was not `pending` (claimed elsewhere or failed)
    NotClaimable { status: QueueStatus },
}

/// Counters for one `process_queue` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub claimed: usize,
    pub completed: usize,
    pub rescheduled: usize,
    pub failed: usize,
    /// Items whose outcome could not be persisted
    pub errors: usize,
    /// The call overlapped a running pass and did nothing
    pub skipped: bool,
}

impl ProcessSummary {
    fn skipped() -> Self {
        Self { skipped: true, ..Self::default() }
    }
}

struct Inner {
    repository: Arc<dyn SyncQueueRepository>,
    dispatcher: SyncDispatcher,
    clock: Arc<dyn Clock>,
    config: SyncQueueConfig,
    processing: AtomicBool,
    follow_up_scheduled: AtomicBool,
    shutdown: CancellationToken,
}

/// Persisted, priority-ordered sync queue with backoff retries
///
/// Cloning is cheap; clones share the re-entrancy guard and shutdown token.
#[derive(Clone)]
pub struct SyncQueueService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncQueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueueService")
            .field("config", &self.inner.config)
            .field("dispatcher", &self.inner.dispatcher)
            .field("processing", &self.inner.processing.load(Ordering::Acquire))
            .finish()
    }
}

/// Clears the processing flag even if a pass is dropped mid-flight.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncQueueService {
    pub fn new(
        repository: Arc<dyn SyncQueueRepository>,
        dispatcher: SyncDispatcher,
        clock: Arc<dyn Clock>,
        config: SyncQueueConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                dispatcher,
                clock,
                config,
                processing: AtomicBool::new(false),
                follow_up_scheduled: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn now_ms(&self) -> i64 {
        i64::try_from(self.inner.clock.millis_since_epoch()).unwrap_or(i64::MAX)
    }

    pub fn config(&self) -> &SyncQueueConfig {
        &self.inner.config
    }

    /// Whether a pass is currently running
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    /// Persist a new pending item and kick off processing if idle.
    #[instrument(skip(self, request), fields(
        workspace_id = %request.workspace_id,
        object_type = %request.object_type,
        operation = %request.operation,
    ))]
    pub async fn enqueue(&self, request: NewSyncItem) -> Result<String> {
        if request.workspace_id.trim().is_empty() {
            return Err(CrmSyncError::InvalidInput("workspace_id must not be empty".into()));
        }

        let id = Uuid::now_v7().to_string();
        let item =
            request.into_item(id.clone(), self.now_ms(), self.inner.config.default_max_retries);
        self.inner.repository.insert(&item).await?;
        info!(item_id = %id, priority = item.priority, "Enqueued sync item");

        if self.inner.config.auto_process {
            self.spawn_pass();
        }
        Ok(id)
    }

    fn spawn_pass(&self) {
        if self.inner.shutdown.is_cancelled() || self.is_processing() {
            return;
        }
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(err) = service.process_queue().await {
                error!(error = %err, "Sync queue pass failed");
            }
        });
    }

    /// Claim ready items and run them concurrently.
    ///
    /// A call that overlaps a running pass returns a `skipped` summary. When
    /// `auto_process` is on and pending items remain afterwards, another pass
    /// is scheduled after `poll_delay`.
    #[instrument(skip(self))]
    pub async fn process_queue(&self) -> Result<ProcessSummary> {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync queue pass already running");
            return Ok(ProcessSummary::skipped());
        }

        let result = {
            let _guard = ProcessingGuard(&self.inner.processing);
            self.run_pass().await
        };

        match &result {
            Ok(summary) if summary.claimed > 0 => info!(
                claimed = summary.claimed,
                completed = summary.completed,
                rescheduled = summary.rescheduled,
                failed = summary.failed,
                errors = summary.errors,
                "Sync queue pass finished"
            ),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Sync queue pass aborted"),
        }

        // A failed pass must not stop the loop; the follow-up retries it.
        if self.inner.config.auto_process && !self.inner.shutdown.is_cancelled() {
            match self.inner.repository.has_pending().await {
                Ok(true) => self.schedule_follow_up(),
                Ok(false) => debug!("Sync queue drained, idling until next enqueue"),
                Err(err) => {
                    warn!(error = %err, "Could not check for pending items, polling again");
                    self.schedule_follow_up();
                }
            }
        }

        result
    }

    /// Start a background pass if pending items exist.
    ///
    /// Picks up work persisted by a previous run, including scheduled
    /// retries. Returns whether a pass was requested; always `false` when
    /// `auto_process` is off.
    #[instrument(skip(self))]
    pub async fn resume(&self) -> Result<bool> {
        if !self.inner.config.auto_process || self.inner.shutdown.is_cancelled() {
            return Ok(false);
        }
        if !self.inner.repository.has_pending().await? {
            return Ok(false);
        }
        info!("Pending sync items found, resuming processing");
        self.spawn_pass();
        Ok(true)
    }

    async fn run_pass(&self) -> Result<ProcessSummary> {
        let limit = self.inner.config.max_concurrency.max(1);
        let items = self.inner.repository.claim_ready(limit, self.now_ms()).await?;

        let mut summary = ProcessSummary { claimed: items.len(), ..ProcessSummary::default() };
        if items.is_empty() {
            return Ok(summary);
        }

        let outcomes = join_all(items.into_iter().map(|item| self.execute_claimed(item))).await;
        for outcome in outcomes {
            match outcome {
                Ok(ItemOutcome::Completed) => summary.completed += 1,
                Ok(ItemOutcome::Rescheduled { .. }) => summary.rescheduled += 1,
                Ok(ItemOutcome::Failed { .. }) => summary.failed += 1,
                Ok(ItemOutcome::AlreadyCompleted | ItemOutcome::NotClaimable { .. }) => {}
                Err(_) => summary.errors += 1,
            }
        }
        Ok(summary)
    }

    fn schedule_follow_up(&self) {
        if self.inner.follow_up_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let service = self.clone();
        let delay = self.inner.config.poll_delay;
        debug!(delay_ms = delay.as_millis() as u64, "Scheduling next sync queue pass");

        tokio::spawn(async move {
            tokio::select! {
                _ = service.inner.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    service.inner.follow_up_scheduled.store(false, Ordering::Release);
                    if let Err(err) = service.process_queue().await {
                        error!(error = %err, "Scheduled sync queue pass failed");
                    }
                }
            }
        });
    }

    /// Run an item that this service has already claimed.
    #[instrument(skip(self, item), fields(item_id = %item.id, object_type = %item.object_type))]
    async fn execute_claimed(&self, item: SyncQueueItem) -> Result<ItemOutcome> {
        let result = self.inner.dispatcher.dispatch(&item).await;
        let now = self.now_ms();

        let outcome = match result {
            Ok(outcome) => {
                self.inner.repository.mark_completed(&item.id, now).await?;
                debug!(?outcome, "Sync item completed");
                ItemOutcome::Completed
            }
            Err(err) => self.handle_failure(&item, &err, now).await?,
        };
        Ok(outcome)
    }

    async fn handle_failure(
        &self,
        item: &SyncQueueItem,
        err: &SyncError,
        now: i64,
    ) -> Result<ItemOutcome> {
        let retry_count = item.retry_count.saturating_add(1);
        let message = truncate_error(&err.to_string());

        if !err.retryable || retry_count > item.max_retries {
            self.inner.repository.mark_failed(&item.id, retry_count, &message, now).await?;
            warn!(
                retry_count,
                max_retries = item.max_retries,
                retryable = err.retryable,
                error = %message,
                "Sync item failed permanently"
            );
            return Ok(ItemOutcome::Failed { error: message });
        }

        let delay = err.retry_after.map_or(delay_for_attempt(retry_count), |after| {
            after.max(delay_for_attempt(retry_count))
        });
        let next_retry_at = now.saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
        self.inner.repository.reschedule(&item.id, retry_count, next_retry_at, &message, now).await?;
        info!(retry_count, next_retry_at, error = %message, "Sync item rescheduled");

        Ok(ItemOutcome::Rescheduled { retry_count, next_retry_at })
    }

    /// Run a single item now, ignoring its scheduled retry time.
    ///
    /// Completed items are not executed again.
    #[instrument(skip(self))]
    pub async fn process_item_by_id(&self, id: &str) -> Result<ItemOutcome> {
        let Some(existing) = self.inner.repository.find_by_id(id).await? else {
            return Err(CrmSyncError::NotFound(format!("sync item {id}")));
        };

        if existing.status == QueueStatus::Completed {
            debug!("Sync item already completed, skipping");
            return Ok(ItemOutcome::AlreadyCompleted);
        }

        match self.inner.repository.claim_by_id(id, self.now_ms()).await? {
            Some(item) => self.execute_claimed(item).await,
            None => {
                let status = self
                    .inner
                    .repository
                    .find_by_id(id)
                    .await?
                    .map_or(existing.status, |item| item.status);
                if status == QueueStatus::Completed {
                    return Ok(ItemOutcome::AlreadyCompleted);
                }
                Ok(ItemOutcome::NotClaimable { status })
            }
        }
    }

    /// Same as [`Self::process_item_by_id`] for an item already in hand.
    pub async fn process_item(&self, item: &SyncQueueItem) -> Result<ItemOutcome> {
        self.process_item_by_id(&item.id).await
    }

    /// Give a failed item a fresh retry budget.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self, id: &str) -> Result<SyncQueueItem> {
        let Some(item) = self.inner.repository.find_by_id(id).await? else {
            return Err(CrmSyncError::NotFound(format!("sync item {id}")));
        };
        if item.status != QueueStatus::Failed {
            return Err(CrmSyncError::InvalidInput(format!(
                "sync item {id} is {}, only failed items can be retried",
                item.status
            )));
        }

        if !self.inner.repository.reset_failed(id, self.now_ms()).await? {
            return Err(CrmSyncError::InvalidInput(format!("sync item {id} changed state")));
        }
        info!("Failed sync item reset to pending");

        if self.inner.config.auto_process {
            self.spawn_pass();
        }

        self.inner
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| CrmSyncError::NotFound(format!("sync item {id}")))
    }

    /// Purge terminal items older than `retention`.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, retention: Duration) -> Result<usize> {
        let cutoff = self
            .now_ms()
            .saturating_sub(i64::try_from(retention.as_millis()).unwrap_or(i64::MAX));
        let purged = self.inner.repository.purge_terminal_before(cutoff).await?;
        if purged > 0 {
            info!(purged, "Purged terminal sync items");
        }
        Ok(purged)
    }

    /// Return items claimed longer than `lease` ago to `pending`.
    #[instrument(skip(self))]
    pub async fn recover_stale(&self, lease: Duration) -> Result<usize> {
        let now = self.now_ms();
        let cutoff = now.saturating_sub(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX));
        let released = self.inner.repository.release_stale_processing(cutoff, now).await?;
        if released > 0 {
            warn!(released, "Released stale processing claims");
            if self.inner.config.auto_process {
                self.spawn_pass();
            }
        }
        Ok(released)
    }

    pub async fn stats(&self, workspace_id: Option<&str>) -> Result<QueueStats> {
        self.inner.repository.stats(workspace_id).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<SyncQueueItem>> {
        self.inner.repository.find_by_id(id).await
    }

    /// Stop self-scheduling. Running passes finish normally.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Sync queue shutting down");
            self.inner.shutdown.cancel();
        }
    }
}

fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LENGTH {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LENGTH;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_ERROR_MESSAGE_LENGTH);
        let truncated = truncate_error(&long);
        assert!(truncated.len() <= MAX_ERROR_MESSAGE_LENGTH);
        assert!(truncated.chars().all(|c| c == 'é'));
        assert_eq!(truncate_error("short"), "short");
    }
}
