//! Access token providers for the HubSpot client
//!
//! The client never performs OAuth exchanges itself. It asks an
//! [`AccessTokenProvider`] for a bearer token before every request and for a
//! forced refresh after a 401. [`CachedTokenProvider`] keeps the current
//! token and its expiry and hands the actual exchange to a
//! [`TokenRefresher`] supplied by the embedding application.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::errors::ApiError;

/// Default margin before expiry at which tokens are refreshed proactively
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Supplies bearer tokens for outgoing requests
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// A token that is valid now, refreshing first if it is about to expire
    async fn access_token(&self) -> Result<String, ApiError>;

    /// Discard the current token and obtain a new one
    async fn force_refresh(&self) -> Result<String, ApiError>;
}

/// A bearer token with its expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self { token: token.into(), expires_at }
    }

    /// Whether the token expires within `margin` of `now`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        self.expires_at - margin <= now
    }
}

/// Performs the actual token exchange (OAuth refresh grant, secret store, ...)
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, current: Option<&AccessToken>) -> Result<AccessToken, ApiError>;
}

/// Fixed private-app token
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider").field("token", &"<redacted>").finish()
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, ApiError> {
        Ok(self.token.clone())
    }

    async fn force_refresh(&self) -> Result<String, ApiError> {
        Err(ApiError::Auth("static access token was rejected and cannot be refreshed".into()))
    }
}

/// Caches a token and refreshes it through a [`TokenRefresher`].
///
/// Concurrent callers share one refresh: the cache lock is held across the
/// exchange.
pub struct CachedTokenProvider {
    refresher: Arc<dyn TokenRefresher>,
    current: Mutex<Option<AccessToken>>,
    refresh_margin: Duration,
}

impl CachedTokenProvider {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { refresher, current: Mutex::new(None), refresh_margin: DEFAULT_REFRESH_MARGIN }
    }

    /// Seed the cache with a token obtained elsewhere.
    #[must_use]
    pub fn with_token(self, token: AccessToken) -> Self {
        Self { current: Mutex::new(Some(token)), ..self }
    }

    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Current cached token, if any.
    pub async fn cached(&self) -> Option<AccessToken> {
        self.current.lock().await.clone()
    }

    async fn refresh_locked(
        &self,
        current: &mut Option<AccessToken>,
    ) -> Result<String, ApiError> {
        let fresh = self.refresher.refresh(current.as_ref()).await?;
        info!(expires_at = %fresh.expires_at, "HubSpot access token refreshed");
        let token = fresh.token.clone();
        *current = Some(fresh);
        Ok(token)
    }
}

#[async_trait]
impl AccessTokenProvider for CachedTokenProvider {
    async fn access_token(&self) -> Result<String, ApiError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if !token.expires_within(self.refresh_margin, Utc::now()) {
                return Ok(token.token.clone());
            }
            debug!(expires_at = %token.expires_at, "Access token near expiry, refreshing");
        }
        self.refresh_locked(&mut current).await
    }

    async fn force_refresh(&self) -> Result<String, ApiError> {
        let mut current = self.current.lock().await;
        self.refresh_locked(&mut current).await
    }
}
