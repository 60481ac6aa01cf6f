//! # crmsync Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for queue persistence, entity sync, the local
//!   record mirror and the webhook event log
//! - The sync queue service with its retry policy
//! - Webhook event routing
//!
//! ## Architecture Principles
//! - Depends only on `crmsync-common` and `crmsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod sync;
pub mod webhooks;

pub use sync::ports::{
    EntitySyncService, LocalRecordStore, SyncOutcome, SyncQueueRepository, WebhookEventLog,
};
pub use sync::{
    delay_for_attempt, ItemOutcome, ProcessSummary, SyncDispatcher, SyncError, SyncQueueConfig,
    SyncQueueService,
};
pub use webhooks::WebhookProcessor;
