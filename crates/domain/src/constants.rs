//! Application constants
//!
//! Centralized location for domain-level constants shared by the queue,
//! the HubSpot client and the webhook ingestion path.

// Queue defaults
pub const DEFAULT_PRIORITY: i32 = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 1024;

// HubSpot response headers read outside the rate limiter
pub const HEADER_RATE_LIMIT_INTERVAL_MS: &str = "x-hubspot-ratelimit-interval-milliseconds";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

// Webhooks
pub const HEADER_HUBSPOT_SIGNATURE: &str = "x-hubspot-signature";
