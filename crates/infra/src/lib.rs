//! # crmsync Infrastructure
//!
//! Infrastructure implementations of the core ports.
//!
//! This crate contains:
//! - SQLite persistence for the sync queue, webhook log and record mirror
//! - The HTTP transport and the resilient HubSpot client
//! - HubSpot entity sync services and the per-workspace client registry
//! - Webhook signature verification
//! - Configuration loading and queue maintenance
//!
//! ## Architecture
//! - Implements traits defined in `crmsync-core`
//! - Contains all "impure" code (I/O, network, clocks)

pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod hubspot;
pub mod sync;
pub mod webhooks;

// Re-export commonly used items
pub use database::{
    DbManager, SqliteLocalRecordStore, SqliteSyncQueueRepository, SqliteWebhookEventLog,
};
pub use errors::InfraError;
pub use http::{HttpClient, RequestOptions};
pub use hubspot::{
    AccessTokenProvider, ApiError, BatchOutcome, ClientSettings, HubSpotClient,
    HubSpotClientRegistry, HubSpotEntitySync, SharedTokenSource, StaticTokenProvider,
    WorkspaceTokenSource,
};
pub use sync::{MaintenanceConfig, MaintenanceService};
pub use webhooks::verify_signature;
