//! HTTP surface
//!
//! - `POST /webhooks/hubspot/{workspace}` - HubSpot webhook deliveries
//! - `GET /queue/items/{id}` - one sync queue item
//! - `POST /queue/items/{id}/retry` - reset a failed item
//! - `GET /queue/stats?workspace=` - counts per status
//! - `GET /health` - component health

pub mod errors;
pub mod queue;
pub mod webhooks;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::utils::health::HealthStatus;
use crate::AppContext;

pub use errors::{RouteError, RouteResult};

/// Build the application router over a shared context.
pub fn router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/webhooks/hubspot/{workspace}", post(webhooks::receive_hubspot))
        .route("/queue/items/{id}", get(queue::get_item))
        .route("/queue/items/{id}/retry", post(queue::retry_item))
        .route("/queue/stats", get(queue::stats))
        .route("/health", get(health))
        .with_state(context)
}

async fn health(State(context): State<Arc<AppContext>>) -> (StatusCode, Json<HealthStatus>) {
    let status = context.health_check().await;
    let code = if status.is_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(status))
}
