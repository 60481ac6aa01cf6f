//! Database implementations

pub mod local_record_repository;
pub mod manager;
pub mod sync_queue_repository;
pub mod webhook_event_repository;

pub use local_record_repository::SqliteLocalRecordStore;
pub use manager::{DbConnection, DbManager};
pub use sync_queue_repository::SqliteSyncQueueRepository;
pub use webhook_event_repository::{SqliteWebhookEventLog, WebhookEventRecord};
