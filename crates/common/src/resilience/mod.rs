//! Resilience patterns guarding calls to the CRM
//!
//! - **Circuit Breaker**: fails fast after a streak of consecutive failures
//!   and probes recovery with a single trial call
//! - **Rate Limiter**: keeps a local model of the remote quota windows,
//!   corrected from response headers, and throttles, queues or rejects
//!   callers accordingly
//!
//! Both are per-instance: the infra layer owns one of each per workspace.

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState, Clock, ConfigError, ConfigResult, MockClock, ResilienceError, ResilienceResult,
    SystemClock,
};
pub use rate_limiter::{
    seconds_until_utc_midnight, LimitScope, RateLimitError, RateLimitState, RateLimiter,
    RateLimiterConfig,
};
