//! Per-workspace HubSpot client cache
//!
//! Each workspace gets its own [`HubSpotClient`] and with it its own rate
//! limiter and circuit breaker. Clients are built on first use and dropped
//! after `client_cache_ttl_seconds` so credential changes are picked up.

use std::sync::Arc;
use std::time::Duration;

use crmsync_domain::{CircuitBreakerSettings, HubSpotConfig, RateLimitSettings};
use moka::sync::Cache;
use tracing::{debug, info};

use super::auth::{AccessTokenProvider, StaticTokenProvider};
use super::client::HubSpotClient;
use super::errors::ApiError;

pub const DEFAULT_MAX_CLIENTS: u64 = 1_000;

/// Resolves the token provider for a workspace
pub trait WorkspaceTokenSource: Send + Sync {
    fn token_provider(&self, workspace_id: &str)
        -> Result<Arc<dyn AccessTokenProvider>, ApiError>;
}

/// One provider shared by every workspace (single private-app deployments)
pub struct SharedTokenSource {
    provider: Arc<dyn AccessTokenProvider>,
}

impl SharedTokenSource {
    pub fn new(provider: Arc<dyn AccessTokenProvider>) -> Self {
        Self { provider }
    }

    pub fn from_static(token: impl Into<String>) -> Self {
        Self::new(Arc::new(StaticTokenProvider::new(token)))
    }
}

impl WorkspaceTokenSource for SharedTokenSource {
    fn token_provider(
        &self,
        _workspace_id: &str,
    ) -> Result<Arc<dyn AccessTokenProvider>, ApiError> {
        Ok(self.provider.clone())
    }
}

/// Settings every client in the registry is built from
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    pub hubspot: HubSpotConfig,
    pub rate_limit: RateLimitSettings,
    pub circuit_breaker: CircuitBreakerSettings,
}

/// Cache of HubSpot clients keyed by workspace id
pub struct HubSpotClientRegistry {
    clients: Cache<String, Arc<HubSpotClient>>,
    tokens: Arc<dyn WorkspaceTokenSource>,
    settings: ClientSettings,
}

impl HubSpotClientRegistry {
    pub fn new(settings: ClientSettings, tokens: Arc<dyn WorkspaceTokenSource>) -> Self {
        let ttl = Duration::from_secs(settings.hubspot.client_cache_ttl_seconds.max(1));
        info!(
            ttl_seconds = ttl.as_secs(),
            max_clients = DEFAULT_MAX_CLIENTS,
            "HubSpot client registry configured"
        );

        let clients = Cache::builder().time_to_live(ttl).max_capacity(DEFAULT_MAX_CLIENTS).build();
        Self { clients, tokens, settings }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Client for `workspace_id`, built on first use.
    ///
    /// Construction failures are returned and not cached.
    pub fn client(&self, workspace_id: &str) -> Result<Arc<HubSpotClient>, ApiError> {
        self.clients
            .try_get_with(workspace_id.to_string(), || {
                debug!(workspace_id, "Building HubSpot client");
                let tokens = self.tokens.token_provider(workspace_id)?;
                HubSpotClient::from_settings(
                    &self.settings.hubspot,
                    &self.settings.rate_limit,
                    &self.settings.circuit_breaker,
                    tokens,
                )
                .map(Arc::new)
            })
            .map_err(|err: Arc<ApiError>| (*err).clone())
    }

    /// Drop the cached client so the next call rebuilds it with fresh
    /// limiter and breaker state.
    pub fn invalidate(&self, workspace_id: &str) {
        self.clients.invalidate(workspace_id);
    }

    pub fn invalidate_all(&self) {
        self.clients.invalidate_all();
    }
}
