//! `POST /webhooks/hubspot/{workspace}`

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use crmsync_domain::constants::HEADER_HUBSPOT_SIGNATURE;
use crmsync_domain::{WebhookEvent, WebhookResult};
use crmsync_infra::verify_signature;
use tracing::{info, warn};

use super::errors::{RouteError, RouteResult};
use crate::utils::logging::log_route_outcome;
use crate::AppContext;

const ROUTE: &str = "/webhooks/hubspot/{workspace}";

/// Verify, parse and process one HubSpot delivery.
///
/// The body is read raw so the signature covers the exact bytes sent. When
/// no secret is configured the signature header is not checked. Individual
/// event failures are reported in the per-event results with a 200 so the
/// sender does not redeliver the whole batch.
pub async fn receive_hubspot(
    State(context): State<Arc<AppContext>>,
    Path(workspace_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> RouteResult<Json<Vec<WebhookResult>>> {
    let started = Instant::now();
    let result = handle(&context, &workspace_id, &headers, &body).await;

    let status = match &result {
        Ok(_) => 200,
        Err(err) => err.status_code().as_u16(),
    };
    log_route_outcome(ROUTE, started.elapsed(), status);
    result.map(Json)
}

async fn handle(
    context: &AppContext,
    workspace_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> RouteResult<Vec<WebhookResult>> {
    if let Some(secret) = context.webhook_secret() {
        let signature = headers
            .get(HEADER_HUBSPOT_SIGNATURE)
            .and_then(|value| value.to_str().ok())
            .ok_or(RouteError::InvalidSignature)?;
        if !verify_signature(secret, body, signature) {
            warn!(workspace_id, "webhook signature mismatch");
            return Err(RouteError::InvalidSignature);
        }
    }

    let events: Vec<WebhookEvent> =
        serde_json::from_slice(body).map_err(|err| RouteError::InvalidPayload(err.to_string()))?;

    let results = context.webhooks.process(workspace_id, &events).await;
    let accepted = results.iter().filter(|result| result.success).count();
    info!(workspace_id, events = events.len(), accepted, "webhook delivery processed");

    Ok(results)
}
