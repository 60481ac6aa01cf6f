//! Shared helpers for core integration tests

#![allow(dead_code)]

pub mod repositories;

use std::sync::Arc;

use crmsync_common::resilience::{Clock, MockClock};
use crmsync_core::{SyncDispatcher, SyncQueueConfig, SyncQueueService};
use crmsync_domain::{NewSyncItem, ObjectType, SyncDirection, SyncOperation};
use serde_json::json;

pub use repositories::{InMemoryQueueRepository, InMemoryWebhookLog, ScriptedSync};

pub struct Harness {
    pub repository: Arc<InMemoryQueueRepository>,
    pub sync: Arc<ScriptedSync>,
    pub clock: MockClock,
    pub service: SyncQueueService,
}

pub fn manual_config(max_concurrency: usize) -> SyncQueueConfig {
    SyncQueueConfig { max_concurrency, auto_process: false, ..SyncQueueConfig::default() }
}

pub fn harness(config: SyncQueueConfig) -> Harness {
    harness_with_sync(config, ScriptedSync::default())
}

pub fn harness_with_sync(config: SyncQueueConfig, sync: ScriptedSync) -> Harness {
    let repository = Arc::new(InMemoryQueueRepository::default());
    let sync = Arc::new(sync);
    let clock = MockClock::new();
    let dispatcher = SyncDispatcher::new().with_handler_for_all(sync.clone());
    let clock_handle: Arc<dyn Clock> = Arc::new(clock.clone());
    let service = SyncQueueService::new(repository.clone(), dispatcher, clock_handle, config);
    Harness { repository, sync, clock, service }
}

pub fn contact_update(label: &str) -> NewSyncItem {
    NewSyncItem::new(
        "ws-test",
        ObjectType::Contact,
        SyncOperation::Update,
        SyncDirection::ToRemote,
        json!({ "remoteId": label, "properties": { "firstname": label } }),
    )
}
