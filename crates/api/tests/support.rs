//! Shared helpers for router integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use crmsync_app::{router, AppContext};
use crmsync_domain::{Config, QueueStatus, SyncQueueItem};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "whsec-test";
pub const TEST_TOKEN: &str = "pat-test-token";

/// Application context backed by a temporary database.
pub struct TestApp {
    pub context: Arc<AppContext>,
    _temp_dir: TempDir,
}

/// Config pointing at a database inside `temp_dir`, tuned for fast tests.
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database.path = temp_dir.path().join("crmsync.db").to_string_lossy().into_owned();
    config.database.pool_size = 4;
    config.queue.poll_delay_ms = 50;
    config.hubspot.max_attempts = 1;
    config
}

impl TestApp {
    /// Build an app; `customize` adjusts the config before wiring.
    pub async fn new(customize: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let mut config = test_config(&temp_dir);
        customize(&mut config);
        Self::open(temp_dir, config).await
    }

    /// Wire an app over an existing directory, keeping whatever the
    /// database already holds.
    pub async fn open(temp_dir: TempDir, config: Config) -> Self {
        let context = AppContext::new_with_config(config).await.expect("context should build");
        Self { context: Arc::new(context), _temp_dir: temp_dir }
    }

    pub fn router(&self) -> Router {
        router(self.context.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.expect("router is infallible");
        into_json(response).await
    }

    /// Poll until the item reaches `status` or a few seconds pass.
    pub async fn wait_for_status(&self, id: &str, status: QueueStatus) -> SyncQueueItem {
        self.wait_until(id, |item| item.status == status).await
    }

    /// Poll until `done` holds for the item or a few seconds pass.
    pub async fn wait_until(&self, id: &str, done: impl Fn(&SyncQueueItem) -> bool) -> SyncQueueItem {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let item = self.context.queue.get(id).await.expect("queue read").expect("item exists");
            if done(&item) || Instant::now() > deadline {
                return item;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub async fn into_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body should be JSON")
    };
    (status, value)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).expect("valid request")
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder().method("POST").uri(uri).body(Body::empty()).expect("valid request")
}

/// Webhook delivery, signed when `secret` is given.
pub fn webhook(workspace: &str, body: &str, secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/webhooks/hubspot/{workspace}"))
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        let signature = crmsync_infra::webhooks::compute_signature(secret, body.as_bytes())
            .expect("signature should compute");
        builder = builder.header("x-hubspot-signature", signature);
    }
    builder.body(Body::from(body.to_string())).expect("valid request")
}

pub fn contact_event(event_id: u64, subscription_type: &str, object_id: u64) -> String {
    format!(
        r#"[{{"eventId":{event_id},"subscriptionType":"{subscription_type}","objectId":{object_id},"portalId":42,"occurredAt":1700000000000}}]"#
    )
}
