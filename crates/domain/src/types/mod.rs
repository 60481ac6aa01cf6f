//! Domain types and models

pub mod record;
pub mod sync;
pub mod webhook;

pub use record::CrmRecord;
pub use sync::{
    NewSyncItem, ObjectType, QueueStats, QueueStatus, SyncDirection, SyncOperation, SyncQueueItem,
};
pub use webhook::{WebhookAction, WebhookEvent, WebhookEventType, WebhookResult};
