//! Turns HubSpot webhook events into `from_remote` queue items

use std::sync::Arc;

use crmsync_common::resilience::Clock;
use crmsync_domain::{NewSyncItem, SyncDirection, WebhookEvent, WebhookEventType, WebhookResult};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::sync::{SyncQueueService, WebhookEventLog};

/// Webhook event router
///
/// Never fails as a whole: every event gets its own [`WebhookResult`] so the
/// sender always receives an acknowledgement and can redeliver individual
/// events.
pub struct WebhookProcessor {
    queue: SyncQueueService,
    event_log: Arc<dyn WebhookEventLog>,
    clock: Arc<dyn Clock>,
    priority: i32,
}

impl WebhookProcessor {
    pub fn new(
        queue: SyncQueueService,
        event_log: Arc<dyn WebhookEventLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { queue, event_log, clock, priority: crmsync_domain::constants::DEFAULT_PRIORITY }
    }

    /// Priority assigned to queue items created from webhooks
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[instrument(skip(self, events), fields(events = events.len()))]
    pub async fn process(&self, workspace_id: &str, events: &[WebhookEvent]) -> Vec<WebhookResult> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            let result = self.process_event(workspace_id, event).await;
            self.record(workspace_id, event, &result).await;
            results.push(result);
        }
        results
    }

    async fn process_event(&self, workspace_id: &str, event: &WebhookEvent) -> WebhookResult {
        let Some(kind) = WebhookEventType::from_subscription_type(&event.subscription_type) else {
            debug!(
                event_id = event.event_id,
                subscription_type = %event.subscription_type,
                "Ignoring unsupported webhook subscription type"
            );
            return WebhookResult::ignored(
                event.event_id,
                format!("unsupported subscription type {}", event.subscription_type),
            );
        };

        match self.event_log.is_processed(workspace_id, event.event_id).await {
            Ok(true) => {
                debug!(event_id = event.event_id, "Skipping duplicate webhook event");
                return WebhookResult::duplicate(event.event_id);
            }
            Ok(false) => {}
            Err(err) => {
                // Treat as unseen; a duplicate queue item is harmless, a lost event is not.
                warn!(event_id = event.event_id, error = %err, "Webhook log lookup failed");
            }
        }

        let mut payload = json!({
            "remoteId": event.object_id.to_string(),
            "eventId": event.event_id,
            "portalId": event.portal_id,
            "occurredAt": event.occurred_at,
        });
        if let Some(name) = &event.property_name {
            let mut properties = serde_json::Map::new();
            properties.insert(name.clone(), json!(event.property_value));
            payload["properties"] = serde_json::Value::Object(properties);
        }

        let request = NewSyncItem::new(
            workspace_id,
            kind.object_type(),
            kind.operation(),
            SyncDirection::FromRemote,
            payload,
        )
        .with_priority(self.priority);

        match self.queue.enqueue(request).await {
            Ok(item_id) => {
                info!(event_id = event.event_id, %item_id, "Webhook event enqueued");
                WebhookResult::enqueued(event.event_id, item_id)
            }
            Err(err) => {
                error!(event_id = event.event_id, error = %err, "Failed to enqueue webhook event");
                WebhookResult::rejected(event.event_id, err.to_string())
            }
        }
    }

    async fn record(&self, workspace_id: &str, event: &WebhookEvent, result: &WebhookResult) {
        let now = i64::try_from(self.clock.millis_since_epoch()).unwrap_or(i64::MAX);
        if let Err(err) = self.event_log.record(workspace_id, event, result, now).await {
            error!(event_id = event.event_id, error = %err, "Failed to record webhook outcome");
        }
    }
}
