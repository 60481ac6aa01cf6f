//! Configuration management

use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub hubspot: HubSpotConfig,
    pub rate_limit: RateLimitSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub queue: QueueSettings,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "crmsync.db".to_string(), pool_size: 8 }
    }
}

/// HubSpot API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSpotConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    /// Total transport attempts for 5xx/network failures (initial try included)
    pub max_attempts: usize,
    pub max_rate_limit_retries: u32,
    pub batch_size: usize,
    /// Static private-app token; when absent callers must supply a provider
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    /// How long per-workspace clients stay cached before being rebuilt
    pub client_cache_ttl_seconds: u64,
}

impl Default for HubSpotConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.hubapi.com".to_string(),
            timeout_seconds: 30,
            max_attempts: 3,
            max_rate_limit_retries: 3,
            batch_size: 100,
            access_token: None,
            webhook_secret: None,
            client_cache_ttl_seconds: 900,
        }
    }
}

/// Rate limiter configuration (defaults match HubSpot private apps)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub interval_ms: u64,
    pub daily_limit: u32,
    pub buffer_percentage: f64,
    pub enable_proactive_throttling: bool,
    pub max_throttle_delay_ms: u64,
    pub enable_queue: bool,
    pub max_queue_size: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 100,
            interval_ms: 10_000,
            daily_limit: 250_000,
            buffer_percentage: 0.1,
            enable_proactive_throttling: true,
            max_throttle_delay_ms: 2_000,
            enable_queue: false,
            max_queue_size: 100,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout_ms: 60_000 }
    }
}

/// Sync queue worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_concurrency: usize,
    /// Delay before the next pass while pending items remain
    pub poll_delay_ms: u64,
    pub default_max_retries: u32,
    pub retention_days: u32,
    /// Claims older than this are considered abandoned
    pub stale_claim_seconds: u64,
    pub maintenance_interval_seconds: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            poll_delay_ms: 5_000,
            default_max_retries: 3,
            retention_days: 30,
            stale_claim_seconds: 900,
            maintenance_interval_seconds: 3_600,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: "127.0.0.1:8080".to_string() }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}
