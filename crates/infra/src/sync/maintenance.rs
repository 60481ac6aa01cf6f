//! Periodic sync queue maintenance
//!
//! Runs housekeeping on an interval:
//!
//! - purge `completed`/`failed` items older than the retention window
//! - return items stuck in `processing` past the claim lease to `pending`
//! - start a queue pass when pending items are waiting and nothing runs
//!
//! The background task is owned explicitly: `start` keeps its join handle,
//! `stop` cancels it and awaits completion with a timeout.

use std::sync::Arc;
use std::time::Duration;

use crmsync_core::SyncQueueService;
use crmsync_domain::{CrmSyncError, QueueSettings, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceConfig {
    /// Terminal items last updated before this window are deleted
    pub retention: Duration,
    /// Claims older than this are considered abandoned
    pub stale_claim_lease: Duration,
    pub interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for MaintenanceConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            retention: Duration::from_secs(u64::from(settings.retention_days) * 24 * 60 * 60),
            stale_claim_lease: Duration::from_secs(settings.stale_claim_seconds),
            interval: Duration::from_secs(settings.maintenance_interval_seconds.max(1)),
        }
    }
}

/// Result of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStats {
    pub purged: usize,
    pub recovered: usize,
}

/// Background maintenance for the sync queue
pub struct MaintenanceService {
    queue: SyncQueueService,
    config: MaintenanceConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl MaintenanceService {
    pub fn new(queue: SyncQueueService, config: MaintenanceConfig) -> Self {
        Self {
            queue,
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Spawn the periodic task. The first pass runs immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is already running.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running().await {
            return Err(CrmSyncError::Config("maintenance service already running".into()));
        }

        // Fresh token so the service can be restarted after stop.
        self.cancellation_token = CancellationToken::new();

        let queue = self.queue.clone();
        let config = self.config.clone();
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::maintenance_loop(queue, config, cancel).await;
        });
        *self.task_handle.lock().await = Some(handle);

        info!(
            interval_secs = self.config.interval.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            "Maintenance service started"
        );
        Ok(())
    }

    /// Cancel the periodic task and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is not running, the task panicked or
    /// it did not finish within the stop timeout.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running().await {
            return Err(CrmSyncError::Config("maintenance service not running".into()));
        }

        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(error = %err, "Maintenance task panicked");
                    return Err(CrmSyncError::Internal(format!("maintenance task panicked: {err}")));
                }
                Err(_) => {
                    warn!("Maintenance task did not complete within timeout");
                    return Err(CrmSyncError::Internal(
                        "maintenance task did not stop in time".into(),
                    ));
                }
            }
        }

        info!("Maintenance service stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        let guard = self.task_handle.lock().await;
        guard.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Run one maintenance pass now.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<MaintenanceStats> {
        Self::run_pass(&self.queue, &self.config).await
    }

    async fn run_pass(queue: &SyncQueueService, config: &MaintenanceConfig) -> Result<MaintenanceStats> {
        let recovered = queue.recover_stale(config.stale_claim_lease).await?;
        let purged = queue.cleanup(config.retention).await?;
        queue.resume().await?;

        if recovered > 0 || purged > 0 {
            info!(recovered, purged, "Sync queue maintenance pass finished");
        } else {
            debug!("Sync queue maintenance pass found nothing to do");
        }

        Ok(MaintenanceStats { purged, recovered })
    }

    async fn maintenance_loop(
        queue: SyncQueueService,
        config: MaintenanceConfig,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Maintenance loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = Self::run_pass(&queue, &config).await {
                        error!(error = %err, "Sync queue maintenance failed");
                    }
                }
            }
        }
    }
}

impl Drop for MaintenanceService {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
