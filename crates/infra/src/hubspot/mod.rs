//! HubSpot integration
//!
//! - [`HubSpotClient`]: resilient REST client (breaker, rate limiter, token
//!   refresh, 429 backoff, batching)
//! - [`HubSpotClientRegistry`]: one client per workspace
//! - [`HubSpotEntitySync`]: queue item execution against CRM v3 objects

pub mod auth;
pub mod client;
pub mod entities;
pub mod errors;
pub mod registry;

pub use auth::{
    AccessToken, AccessTokenProvider, CachedTokenProvider, StaticTokenProvider, TokenRefresher,
};
pub use client::{BatchChunkError, BatchOutcome, HubSpotClient, HubSpotClientBuilder};
pub use entities::{object_path, HubSpotEntitySync};
pub use errors::{ApiError, FieldError};
pub use registry::{
    ClientSettings, HubSpotClientRegistry, SharedTokenSource, WorkspaceTokenSource,
};
