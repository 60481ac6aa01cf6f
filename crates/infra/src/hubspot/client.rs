//! HubSpot REST client
//!
//! Every request passes through the same gates in order: circuit breaker,
//! rate limiter, access token. The response is then classified:
//!
//! - 401: refresh the token once and retry once, then [`ApiError::Auth`]
//! - 429: wait for `Retry-After` (or the interval window) and retry up to
//!   `max_rate_limit_retries` times, then [`ApiError::RateLimit`]
//! - 5xx / network: already retried by [`HttpClient`]; counts as a breaker
//!   failure
//! - other 4xx: [`ApiError::Validation`] or [`ApiError::Api`], never retried
//! - 2xx: rate limiter updated from headers, breaker success, body parsed

use std::sync::Arc;
use std::time::Duration;

use crmsync_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig,
};
use crmsync_domain::constants::{HEADER_RATE_LIMIT_INTERVAL_MS, HEADER_RETRY_AFTER};
use crmsync_domain::{CircuitBreakerSettings, HubSpotConfig, RateLimitSettings};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::auth::AccessTokenProvider;
use super::errors::{ApiError, ErrorBody};
use crate::http::{HttpClient, RequestOptions};

pub const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Aggregated result of a chunked batch call
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// `results` entries from every successful chunk, in chunk order
    pub results: Vec<Value>,
    /// Per-item `errors` HubSpot reported inside successful (207) responses
    pub item_errors: Vec<Value>,
    /// Chunks whose request failed outright
    pub failed_chunks: Vec<BatchChunkError>,
    /// Number of HTTP calls issued
    pub requests: usize,
}

impl BatchOutcome {
    pub fn is_complete_success(&self) -> bool {
        self.item_errors.is_empty() && self.failed_chunks.is_empty()
    }
}

/// A batch chunk that could not be sent
#[derive(Debug, Clone, PartialEq)]
pub struct BatchChunkError {
    /// Index of the chunk's first input
    pub offset: usize,
    pub size: usize,
    pub error: ApiError,
}

/// Resilient HubSpot API client.
///
/// Owns one rate limiter and one circuit breaker; create one client per
/// workspace (see [`super::HubSpotClientRegistry`]).
pub struct HubSpotClient {
    http: HttpClient,
    base_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    max_rate_limit_retries: u32,
    batch_size: usize,
}

impl std::fmt::Debug for HubSpotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSpotClient")
            .field("base_url", &self.base_url)
            .field("breaker", &self.breaker)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl HubSpotClient {
    pub fn builder(tokens: Arc<dyn AccessTokenProvider>) -> HubSpotClientBuilder {
        HubSpotClientBuilder::new(tokens)
    }

    /// Build a client from application settings.
    pub fn from_settings(
        hubspot: &HubSpotConfig,
        rate_limit: &RateLimitSettings,
        circuit_breaker: &CircuitBreakerSettings,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self, ApiError> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(hubspot.timeout_seconds.max(1)))
            .max_attempts(hubspot.max_attempts)
            .build()
            .map_err(|err| ApiError::Config(err.to_string()))?;

        let limiter = RateLimiter::new(rate_limiter_config(rate_limit))
            .map_err(|err| ApiError::Config(err.to_string()))?;
        let breaker = CircuitBreaker::new(circuit_breaker_config(circuit_breaker)?)
            .map_err(|err| ApiError::Config(err.to_string()))?;

        Self::builder(tokens)
            .base_url(hubspot.base_url.clone())
            .http_client(http)
            .rate_limiter(limiter)
            .circuit_breaker(breaker)
            .max_rate_limit_retries(hubspot.max_rate_limit_retries)
            .batch_size(hubspot.batch_size)
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        options: &RequestOptions,
    ) -> Result<Option<Value>, ApiError> {
        self.send(Method::GET, path, query, None, options).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: &Value,
        options: &RequestOptions,
    ) -> Result<Option<Value>, ApiError> {
        self.send(Method::POST, path, &[], Some(body), options).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: &Value,
        options: &RequestOptions,
    ) -> Result<Option<Value>, ApiError> {
        self.send(Method::PATCH, path, &[], Some(body), options).await
    }

    pub async fn delete(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Option<Value>, ApiError> {
        self.send(Method::DELETE, path, &[], None, options).await
    }

    /// POST `inputs` to a batch endpoint in chunks of `batch_size` (or the
    /// client default). A failed chunk is recorded and the remaining chunks
    /// are still sent.
    #[instrument(skip(self, inputs, options), fields(inputs = inputs.len()))]
    pub async fn batch(
        &self,
        path: &str,
        inputs: &[Value],
        batch_size: Option<usize>,
        options: &RequestOptions,
    ) -> BatchOutcome {
        let size = batch_size.unwrap_or(self.batch_size).max(1);
        let mut outcome = BatchOutcome::default();

        for (index, chunk) in inputs.chunks(size).enumerate() {
            let offset = index * size;
            outcome.requests += 1;
            let body = json!({ "inputs": chunk });

            match self.post(path, &body, options).await {
                Ok(Some(response)) => {
                    collect_array(&response, "results", &mut outcome.results);
                    collect_array(&response, "errors", &mut outcome.item_errors);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(offset, size = chunk.len(), error = %error, "Batch chunk failed");
                    outcome.failed_chunks.push(BatchChunkError {
                        offset,
                        size: chunk.len(),
                        error,
                    });
                }
            }
        }

        debug!(
            requests = outcome.requests,
            results = outcome.results.len(),
            failed_chunks = outcome.failed_chunks.len(),
            "Batch finished"
        );
        outcome
    }

    #[instrument(skip(self, method, query, body, options), fields(%method))]
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<Option<Value>, ApiError> {
        if !self.breaker.can_execute() {
            debug!("Circuit breaker open, failing fast");
            return Err(ApiError::CircuitOpen);
        }

        let result = match options.run(self.send_admitted(method, path, query, body)).await {
            Ok(result) => result,
            Err(interrupted) => {
                self.breaker.release_trial();
                Err(ApiError::from(interrupted))
            }
        };

        // These never produced a verdict on the remote service's health.
        if matches!(result, Err(ApiError::RateLimit { .. } | ApiError::Auth(_) | ApiError::Config(_)))
        {
            self.breaker.release_trial();
        }

        result
    }

    async fn send_admitted(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, ApiError> {
        let url = self.url(path);
        let mut token = self.tokens.access_token().await?;
        let mut refreshed = false;
        let mut rate_limit_retries = 0u32;

        loop {
            self.limiter.check_rate_limit().await?;

            let mut request = self.http.request(method.clone(), &url).bearer_auth(&token);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match self.http.send(request).await {
                Ok(response) => response,
                Err(err) => {
                    let err = ApiError::from(err);
                    if !matches!(err, ApiError::Config(_)) {
                        self.breaker.record_failure();
                    }
                    return Err(err);
                }
            };

            self.limiter.update_from_headers(response.headers());
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if !refreshed {
                    debug!("HubSpot returned 401, refreshing access token");
                    refreshed = true;
                    token = self.tokens.force_refresh().await?;
                    continue;
                }
                self.breaker.record_success();
                let message = error_message(status, &read_text(response).await);
                return Err(ApiError::Auth(message));
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = rate_limit_wait(
                    response.headers(),
                    Duration::from_millis(self.limiter.snapshot().interval_ms),
                );
                if rate_limit_retries >= self.max_rate_limit_retries {
                    warn!(retries = rate_limit_retries, "HubSpot rate limit retries exhausted");
                    return Err(ApiError::RateLimit {
                        retry_after_secs: Some(ceil_secs(wait)),
                    });
                }
                rate_limit_retries += 1;
                self.limiter.note_retry_after(wait);
                warn!(
                    attempt = rate_limit_retries,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "HubSpot returned 429, backing off"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if status.is_server_error() {
                self.breaker.record_failure();
                let message = error_message(status, &read_text(response).await);
                return Err(ApiError::Api { status: status.as_u16(), message });
            }

            if status.is_client_error() {
                // The service answered, so it is healthy from the breaker's view.
                self.breaker.record_success();
                return Err(client_error(status, &read_text(response).await));
            }

            self.breaker.record_success();
            return parse_body(response).await;
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Builder for [`HubSpotClient`]
pub struct HubSpotClientBuilder {
    tokens: Arc<dyn AccessTokenProvider>,
    base_url: String,
    http: Option<HttpClient>,
    limiter: Option<RateLimiter>,
    breaker: Option<CircuitBreaker>,
    max_rate_limit_retries: u32,
    batch_size: usize,
}

impl HubSpotClientBuilder {
    fn new(tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self {
            tokens,
            base_url: DEFAULT_BASE_URL.to_string(),
            http: None,
            limiter: None,
            breaker: None,
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn http_client(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn build(self) -> Result<HubSpotClient, ApiError> {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ApiError::Config("HubSpot base URL must not be empty".into()));
        }

        let http = match self.http {
            Some(http) => http,
            None => HttpClient::new().map_err(|err| ApiError::Config(err.to_string()))?,
        };

        Ok(HubSpotClient {
            http,
            base_url,
            tokens: self.tokens,
            limiter: self.limiter.unwrap_or_default(),
            breaker: self.breaker.unwrap_or_default(),
            max_rate_limit_retries: self.max_rate_limit_retries,
            batch_size: self.batch_size,
        })
    }
}

pub fn rate_limiter_config(settings: &RateLimitSettings) -> RateLimiterConfig {
    RateLimiterConfig {
        max_requests: settings.max_requests,
        interval: Duration::from_millis(settings.interval_ms),
        daily_limit: settings.daily_limit,
        buffer_percentage: settings.buffer_percentage,
        enable_proactive_throttling: settings.enable_proactive_throttling,
        max_throttle_delay: Duration::from_millis(settings.max_throttle_delay_ms),
        enable_queue: settings.enable_queue,
        max_queue_size: settings.max_queue_size,
    }
}

pub fn circuit_breaker_config(
    settings: &CircuitBreakerSettings,
) -> Result<CircuitBreakerConfig, ApiError> {
    CircuitBreakerConfig::builder()
        .failure_threshold(settings.failure_threshold)
        .reset_timeout(Duration::from_millis(settings.reset_timeout_ms))
        .build()
        .map_err(|err| ApiError::Config(err.to_string()))
}

fn collect_array(response: &Value, key: &str, into: &mut Vec<Value>) {
    if let Some(items) = response.get(key).and_then(Value::as_array) {
        into.extend(items.iter().cloned());
    }
}

async fn parse_body(response: Response) -> Result<Option<Value>, ApiError> {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |content_type| content_type.contains("json"));

    let text = response.text().await.map_err(|err| ApiError::Decode(err.to_string()))?;
    if text.trim().is_empty() {
        return Ok(None);
    }

    if is_json {
        serde_json::from_str(&text).map(Some).map_err(|err| ApiError::Decode(err.to_string()))
    } else {
        Ok(Some(Value::String(text)))
    }
}

async fn read_text(response: Response) -> String {
    response.text().await.unwrap_or_default()
}

fn error_message(status: StatusCode, raw: &str) -> String {
    ErrorBody::parse(raw).message.unwrap_or_else(|| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            status.canonical_reason().unwrap_or("unknown status").to_string()
        } else {
            trimmed.chars().take(512).collect()
        }
    })
}

fn client_error(status: StatusCode, raw: &str) -> ApiError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            let body = ErrorBody::parse(raw);
            ApiError::Validation {
                errors: body.field_errors(),
                message: error_message(status, raw),
            }
        }
        _ => ApiError::Api { status: status.as_u16(), message: error_message(status, raw) },
    }
}

/// Wait before retrying a 429: `Retry-After` seconds, else the interval
/// window advertised by the response, else `fallback`.
fn rate_limit_wait(headers: &HeaderMap, fallback: Duration) -> Duration {
    let header_u64 = |name: &str| {
        headers.get(name)?.to_str().ok()?.trim().parse::<u64>().ok()
    };

    if let Some(secs) = header_u64(HEADER_RETRY_AFTER) {
        return Duration::from_secs(secs);
    }
    if let Some(millis) = header_u64(HEADER_RATE_LIMIT_INTERVAL_MS).filter(|ms| *ms > 0) {
        return Duration::from_millis(millis);
    }
    fallback
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    millis.div_ceil(1000)
}
