//! Integration tests for HubSpotClient against a mock HubSpot API
//!
//! **Coverage:**
//! - Body parsing: JSON, plain text, empty
//! - 401 refresh-and-retry, persistent 401
//! - 429 backoff and exhaustion
//! - 4xx validation errors, 5xx breaker accounting, open breaker fail-fast
//! - Rate limiter header updates and local exhaustion
//! - Batch chunking and per-chunk failures
//! - Cancellation

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use crmsync_common::resilience::CircuitState;
use crmsync_infra::http::RequestOptions;
use crmsync_infra::hubspot::{AccessToken, ApiError, CachedTokenProvider, TokenRefresher};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use support::{breaker, hubspot_client, hubspot_client_with, static_tokens, TEST_TOKEN};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn options() -> RequestOptions {
    RequestOptions::default()
}

#[tokio::test]
async fn get_sends_bearer_token_and_parses_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crm/v3/objects/contacts/42"))
        .and(query_param("archived", "false"))
        .and(header("authorization", format!("Bearer {TEST_TOKEN}").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "42", "properties": {"email": "a@example.com"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    let body = client
        .get("/crm/v3/objects/contacts/42", &[("archived", "false")], &options())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(body["properties"]["email"], "a@example.com");
    assert_eq!(client.circuit_breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn empty_body_is_none_and_text_is_string() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());

    let deleted = client.delete("/crm/v3/objects/deals/9", &options()).await.unwrap();
    assert_eq!(deleted, None);

    let text = client.get("/ping", &[], &options()).await.unwrap();
    assert_eq!(text, Some(Value::String("pong".into())));
}

struct RotatingRefresher {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenRefresher for RotatingRefresher {
    async fn refresh(&self, _current: Option<&AccessToken>) -> Result<AccessToken, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AccessToken::new("fresh-token", Utc::now() + ChronoDuration::hours(1)))
    }
}

#[tokio::test]
async fn unauthorized_refreshes_token_once_and_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer stale-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = Arc::new(RotatingRefresher { calls: AtomicUsize::new(0) });
    let tokens = CachedTokenProvider::new(refresher.clone())
        .with_token(AccessToken::new("stale-token", Utc::now() + ChronoDuration::hours(1)));
    let client = hubspot_client_with(&server.uri(), Arc::new(tokens), breaker(5));

    let body = client.get("/crm/v3/objects/contacts", &[], &options()).await.unwrap();

    assert_eq!(body, Some(json!({"ok": true})));
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn persistent_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "token expired"})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let refresher = Arc::new(RotatingRefresher { calls: AtomicUsize::new(0) });
    let client = hubspot_client_with(
        &server.uri(),
        Arc::new(CachedTokenProvider::new(refresher)),
        breaker(5),
    );

    let err = client.get("/crm/v3/objects/contacts", &[], &options()).await.unwrap_err();
    assert_eq!(err, ApiError::Auth("token expired".into()));
    assert_eq!(client.circuit_breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn static_token_rejection_is_not_retried_with_same_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    let err = client.get("/crm/v3/objects/contacts", &[], &options()).await.unwrap_err();

    assert!(matches!(err, ApiError::Auth(_)));
}

#[tokio::test]
async fn rate_limited_request_is_retried_after_retry_after() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    Mock::given(method("POST"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429).insert_header("Retry-After", "0")
            } else {
                ResponseTemplate::new(201).set_body_json(json!({"id": "501"}))
            }
        })
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    let body = client
        .post("/crm/v3/objects/contacts", &json!({"properties": {}}), &options())
        .await
        .unwrap();

    assert_eq!(body, Some(json!({"id": "501"})));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rate_limit_with_exhausted_window_retries_after_server_wait() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    Mock::given(method("GET"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "1")
                    .insert_header("X-HubSpot-RateLimit-Remaining", "0")
                    .insert_header("X-HubSpot-RateLimit-Interval-Milliseconds", "10000")
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"id": "7"}))
            }
        })
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    let started = std::time::Instant::now();
    let body = client.get("/crm/v3/objects/deals/7", &[], &options()).await.unwrap();

    assert_eq!(body, Some(json!({"id": "7"})));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert!(client.rate_limiter().snapshot().remaining > 0);
}

#[tokio::test]
async fn rate_limit_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .expect(3)
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    let err = client.get("/crm/v3/objects/deals", &[], &options()).await.unwrap_err();

    assert_eq!(err, ApiError::RateLimit { retry_after_secs: Some(0) });
    assert_eq!(client.circuit_breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn validation_errors_carry_field_details() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": "error",
            "message": "Property values were not valid",
            "category": "VALIDATION_ERROR",
            "errors": [{
                "message": "Email address is invalid",
                "code": "INVALID_EMAIL",
                "context": {"propertyName": ["email"]}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    let err = client
        .patch("/crm/v3/objects/contacts/1", &json!({"properties": {"email": "x"}}), &options())
        .await
        .unwrap_err();

    match err {
        ApiError::Validation { message, errors } => {
            assert_eq!(message, "Property values were not valid");
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].property.as_deref(), Some("email"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(client.circuit_breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn server_errors_count_against_breaker_and_open_it() {
    let server = MockServer::start().await;
    // max_attempts = 2 per call, two calls before the breaker opens.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let client = hubspot_client_with(&server.uri(), static_tokens(), breaker(2));

    for _ in 0..2 {
        let err = client.get("/crm/v3/objects/companies", &[], &options()).await.unwrap_err();
        assert!(matches!(err, ApiError::Api { status: 503, .. }));
    }
    assert_eq!(client.circuit_breaker().state(), CircuitState::Open);

    let err = client.get("/crm/v3/objects/companies", &[], &options()).await.unwrap_err();
    assert_eq!(err, ApiError::CircuitOpen);
}

#[tokio::test]
async fn successful_responses_update_rate_limiter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-HubSpot-RateLimit-Max", "190")
                .insert_header("X-HubSpot-RateLimit-Remaining", "150")
                .set_body_json(json!({})),
        )
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    client.get("/crm/v3/objects/contacts", &[], &options()).await.unwrap();

    let state = client.rate_limiter().snapshot();
    assert_eq!(state.max, 190);
    assert_eq!(state.remaining, 150);
}

#[tokio::test]
async fn exhausted_local_quota_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    let mut headers = HeaderMap::new();
    headers.insert("x-hubspot-ratelimit-remaining", HeaderValue::from_static("-1"));
    client.rate_limiter().update_from_headers(&headers);

    let err = client.get("/crm/v3/objects/contacts", &[], &options()).await.unwrap_err();
    assert!(matches!(err, ApiError::RateLimit { retry_after_secs: Some(_) }));
}

#[tokio::test]
async fn batch_splits_inputs_into_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm/v3/objects/contacts/batch/create"))
        .respond_with(|req: &Request| -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&req.body).unwrap_or_default();
            let results: Vec<Value> = body["inputs"]
                .as_array()
                .map(|inputs| inputs.iter().map(|_| json!({"id": "x"})).collect())
                .unwrap_or_default();
            ResponseTemplate::new(201).set_body_json(json!({"status": "COMPLETE", "results": results}))
        })
        .expect(3)
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    let inputs: Vec<Value> =
        (0..250).map(|n| json!({"properties": {"email": format!("c{n}@example.com")}})).collect();

    let outcome = client
        .batch("/crm/v3/objects/contacts/batch/create", &inputs, Some(100), &options())
        .await;

    assert_eq!(outcome.requests, 3);
    assert_eq!(outcome.results.len(), 250);
    assert!(outcome.is_complete_success());

    let sizes: Vec<usize> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|req| {
            let body: Value = serde_json::from_slice(&req.body).unwrap();
            body["inputs"].as_array().unwrap().len()
        })
        .collect();
    assert_eq!(sizes, vec![100, 100, 50]);
}

#[tokio::test]
async fn batch_records_failed_chunks_and_continues() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    Mock::given(method("POST"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                ResponseTemplate::new(422).set_body_json(json!({"message": "duplicate email"}))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"results": [{"id": "1"}]}))
            }
        })
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    let inputs: Vec<Value> = (0..5).map(|n| json!({"id": n})).collect();
    let outcome =
        client.batch("/crm/v3/objects/deals/batch/update", &inputs, Some(2), &options()).await;

    assert_eq!(outcome.requests, 3);
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.failed_chunks.len(), 1);
    assert_eq!(outcome.failed_chunks[0].offset, 2);
    assert_eq!(outcome.failed_chunks[0].size, 2);
    assert!(matches!(outcome.failed_chunks[0].error, ApiError::Validation { .. }));
}

#[tokio::test]
async fn cancelled_request_reports_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = hubspot_client(&server.uri());
    let token = CancellationToken::new();
    token.cancel();

    let err = client
        .get("/crm/v3/objects/contacts", &[], &RequestOptions::default().with_cancel(token))
        .await
        .unwrap_err();

    assert_eq!(err, ApiError::Cancelled);
    assert_eq!(client.circuit_breaker().consecutive_failures(), 0);
}
