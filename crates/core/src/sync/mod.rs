//! Sync queue: ports, retry policy, dispatch and processing service

pub mod dispatch;
pub mod errors;
pub mod ports;
pub mod schedule;
pub mod service;

pub use dispatch::SyncDispatcher;
pub use errors::SyncError;
pub use ports::{
    EntitySyncService, LocalRecordStore, SyncOutcome, SyncQueueRepository, WebhookEventLog,
};
pub use schedule::delay_for_attempt;
pub use service::{ItemOutcome, ProcessSummary, SyncQueueConfig, SyncQueueService};
