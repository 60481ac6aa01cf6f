//! Routing of queue items to per-entity sync services

use std::collections::HashMap;
use std::sync::Arc;

use crmsync_domain::{ObjectType, SyncQueueItem};

use super::errors::SyncError;
use super::ports::{EntitySyncService, SyncOutcome};

/// Explicit `ObjectType -> handler` table
#[derive(Clone, Default)]
pub struct SyncDispatcher {
    handlers: HashMap<ObjectType, Arc<dyn EntitySyncService>>,
}

impl std::fmt::Debug for SyncDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<_> = self.handlers.keys().map(ObjectType::as_str).collect();
        registered.sort_unstable();
        f.debug_struct("SyncDispatcher").field("handlers", &registered).finish()
    }
}

impl SyncDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for an object type
    #[must_use]
    pub fn with_handler(mut self, object_type: ObjectType, handler: Arc<dyn EntitySyncService>) -> Self {
        self.handlers.insert(object_type, handler);
        self
    }

    /// Register one handler for every object type
    #[must_use]
    pub fn with_handler_for_all(self, handler: Arc<dyn EntitySyncService>) -> Self {
        [ObjectType::Contact, ObjectType::Company, ObjectType::Deal, ObjectType::Activity]
            .into_iter()
            .fold(self, |dispatcher, object_type| {
                dispatcher.with_handler(object_type, Arc::clone(&handler))
            })
    }

    pub fn handles(&self, object_type: ObjectType) -> bool {
        self.handlers.contains_key(&object_type)
    }

    /// Run the item through its handler. A missing handler is a permanent
    /// failure.
    pub async fn dispatch(&self, item: &SyncQueueItem) -> Result<SyncOutcome, SyncError> {
        let Some(handler) = self.handlers.get(&item.object_type) else {
            return Err(SyncError::permanent(
                item.object_type,
                item.operation,
                format!("no sync handler registered for {}", item.object_type),
            ));
        };
        handler.sync(item).await
    }
}
