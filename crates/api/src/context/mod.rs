//! Application context - dependency injection container

use std::sync::Arc;
use std::time::Duration;

use crmsync_common::resilience::{Clock, SystemClock};
use crmsync_core::{SyncDispatcher, SyncQueueConfig, SyncQueueService, WebhookProcessor};
use crmsync_domain::{Config, QueueSettings, Result};
use crmsync_infra::hubspot::AccessTokenProvider;
use crmsync_infra::{
    ApiError, ClientSettings, DbManager, HubSpotClientRegistry, HubSpotEntitySync,
    MaintenanceConfig, MaintenanceService, SharedTokenSource, SqliteLocalRecordStore,
    SqliteSyncQueueRepository, SqliteWebhookEventLog, WorkspaceTokenSource,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::utils::health::{ComponentHealth, HealthStatus};

/// Token source used when no HubSpot credentials are configured.
///
/// Webhooks are still accepted and queued; every outbound call fails with an
/// authentication error, so items back off and retry until credentials are
/// configured or their retry budget runs out.
struct MissingTokenSource;

impl WorkspaceTokenSource for MissingTokenSource {
    fn token_provider(
        &self,
        workspace_id: &str,
    ) -> std::result::Result<Arc<dyn AccessTokenProvider>, ApiError> {
        Err(ApiError::Auth(format!("no HubSpot access token configured for workspace {workspace_id}")))
    }
}

/// Application context - holds all services and dependencies
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub queue: SyncQueueService,
    pub webhooks: Arc<WebhookProcessor>,
    pub clients: Arc<HubSpotClientRegistry>,
    maintenance: Mutex<MaintenanceService>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("db_path", &self.db.path())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

fn queue_config(settings: &QueueSettings) -> SyncQueueConfig {
    SyncQueueConfig {
        max_concurrency: settings.max_concurrency.max(1),
        poll_delay: Duration::from_millis(settings.poll_delay_ms),
        default_max_retries: settings.default_max_retries,
        auto_process: true,
    }
}

impl AppContext {
    /// Create a new application context with default configuration
    pub async fn new() -> Result<Self> {
        Self::new_with_config(Config::default()).await
    }

    /// Wire every service from `config` with the system clock.
    pub async fn new_with_config(config: Config) -> Result<Self> {
        Self::new_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Wire every service from `config`.
    ///
    /// Tests pass a `MockClock` here to control retry and retention timing.
    pub async fn new_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Arc::new(DbManager::new(&config.database.path, config.database.pool_size)?);
        db.run_migrations()?;

        let tokens: Arc<dyn WorkspaceTokenSource> = match config.hubspot.access_token.as_deref() {
            Some(token) if !token.trim().is_empty() => {
                Arc::new(SharedTokenSource::from_static(token.trim()))
            }
            _ => {
                warn!("no HubSpot access token configured; outbound sync will fail");
                Arc::new(MissingTokenSource)
            }
        };
        if config.hubspot.webhook_secret.is_none() {
            warn!("no webhook secret configured; webhook signatures are not verified");
        }

        let settings = ClientSettings {
            hubspot: config.hubspot.clone(),
            rate_limit: config.rate_limit.clone(),
            circuit_breaker: config.circuit_breaker.clone(),
        };
        let clients = Arc::new(HubSpotClientRegistry::new(settings, tokens));

        let records = Arc::new(SqliteLocalRecordStore::new(db.clone()));
        let entity_sync = Arc::new(HubSpotEntitySync::new(clients.clone(), records, clock.clone()));
        let dispatcher = SyncDispatcher::new().with_handler_for_all(entity_sync);

        let repository = Arc::new(SqliteSyncQueueRepository::new(db.clone()));
        let queue =
            SyncQueueService::new(repository, dispatcher, clock.clone(), queue_config(&config.queue));

        let event_log = Arc::new(SqliteWebhookEventLog::new(db.clone()));
        let webhooks = Arc::new(WebhookProcessor::new(queue.clone(), event_log, clock));

        let maintenance = MaintenanceService::new(queue.clone(), MaintenanceConfig::from(&config.queue));

        info!(db_path = %db.path().display(), "application context initialised");

        Ok(Self { config, db, queue, webhooks, clients, maintenance: Mutex::new(maintenance) })
    }

    /// Shared secret for inbound webhook signatures, if configured
    pub fn webhook_secret(&self) -> Option<&str> {
        self.config.hubspot.webhook_secret.as_deref().filter(|secret| !secret.is_empty())
    }

    /// Start background queue maintenance and resume items persisted by a
    /// previous run.
    pub async fn start_background(&self) -> Result<()> {
        self.maintenance.lock().await.start().await?;
        self.queue.resume().await?;
        Ok(())
    }

    /// Check health of the database and the sync queue.
    ///
    /// The queue component reports unhealthy when its statistics cannot be
    /// read; failed items alone do not degrade health.
    pub async fn health_check(&self) -> HealthStatus {
        let mut status = HealthStatus::new();

        status = status.add_component(self.check_database_health().await);
        status = status.add_component(match self.queue.stats(None).await {
            Ok(_) => ComponentHealth::healthy("sync_queue"),
            Err(err) => {
                warn!(error = %err, "sync queue health check failed");
                ComponentHealth::unhealthy("sync_queue", err.to_string())
            }
        });

        let maintenance_running = self.maintenance.lock().await.is_running().await;
        status = status.add_component(if maintenance_running {
            ComponentHealth::healthy("maintenance")
        } else {
            ComponentHealth::unhealthy("maintenance", "not running")
        });

        status.calculate_score();
        status
    }

    /// Uses spawn_blocking because the pool hands out synchronous connections.
    async fn check_database_health(&self) -> ComponentHealth {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || db.health_check()).await {
            Ok(Ok(())) => ComponentHealth::healthy("database"),
            Ok(Err(e)) => {
                warn!(error = %e, "database health check failed");
                ComponentHealth::unhealthy("database", format!("query failed: {e}"))
            }
            Err(e) => {
                tracing::error!(error = %e, "database health check task panicked");
                ComponentHealth::unhealthy("database", format!("task panic: {e}"))
            }
        }
    }

    /// Stop maintenance and the queue's processing loop.
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutdown called on AppContext");

        self.queue.shutdown();

        let mut maintenance = self.maintenance.lock().await;
        if maintenance.is_running().await {
            maintenance.stop().await?;
        }
        Ok(())
    }
}
