//! Shared helpers for infra integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crmsync_common::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};
use crmsync_infra::database::DbManager;
use crmsync_infra::http::HttpClient;
use crmsync_infra::hubspot::{AccessTokenProvider, HubSpotClient, StaticTokenProvider};
use tempfile::TempDir;

pub const TEST_TOKEN: &str = "pat-test-token";

/// Temporary database that keeps its file alive for the duration of a test.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let manager = DbManager::new(temp_dir.path().join("test.db"), 4)
            .expect("db manager should be created");
        manager.run_migrations().expect("migrations should apply");

        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport with fast backoff so retry tests stay quick.
pub fn fast_http(max_attempts: usize) -> HttpClient {
    HttpClient::builder()
        .base_backoff(Duration::from_millis(1))
        .max_attempts(max_attempts)
        .timeout(Duration::from_secs(5))
        .build()
        .expect("http client should build")
}

pub fn breaker(failure_threshold: u32) -> CircuitBreaker {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(failure_threshold)
        .reset_timeout(Duration::from_secs(60))
        .build()
        .expect("valid breaker config");
    CircuitBreaker::new(config).expect("breaker should build")
}

pub fn static_tokens() -> Arc<dyn AccessTokenProvider> {
    Arc::new(StaticTokenProvider::new(TEST_TOKEN))
}

/// HubSpot client pointed at a mock server with test-friendly resilience
/// settings.
pub fn hubspot_client(base_url: &str) -> HubSpotClient {
    hubspot_client_with(base_url, static_tokens(), breaker(5))
}

pub fn hubspot_client_with(
    base_url: &str,
    tokens: Arc<dyn AccessTokenProvider>,
    breaker: CircuitBreaker,
) -> HubSpotClient {
    HubSpotClient::builder(tokens)
        .base_url(base_url)
        .http_client(fast_http(2))
        .rate_limiter(RateLimiter::default())
        .circuit_breaker(breaker)
        .max_rate_limit_retries(2)
        .build()
        .expect("hubspot client should build")
}
