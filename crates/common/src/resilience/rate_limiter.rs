//! Header-driven rate limiter for HubSpot-style quotas
//!
//! The limiter keeps a local model of three windows (interval, burst, daily)
//! that is corrected from the `X-HubSpot-RateLimit-*` response headers after
//! every call. Admission is optimistic: each admitted call decrements every
//! counter before the request is sent.
//!
//! Time is read through `tokio::time`, so tests can drive the interval window
//! with a paused runtime.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, trace, warn};

use super::circuit_breaker::{ConfigError, ConfigResult};

const HEADER_REMAINING: &str = "x-hubspot-ratelimit-remaining";
const HEADER_MAX: &str = "x-hubspot-ratelimit-max";
const HEADER_INTERVAL_MS: &str = "x-hubspot-ratelimit-interval-milliseconds";
const HEADER_DAILY: &str = "x-hubspot-ratelimit-daily";
const HEADER_DAILY_REMAINING: &str = "x-hubspot-ratelimit-daily-remaining";
const HEADER_BURST: &str = "x-hubspot-ratelimit-burst";
const HEADER_BURST_REMAINING: &str = "x-hubspot-ratelimit-burst-remaining";
const HEADER_BURST_INTERVAL_MS: &str = "x-hubspot-ratelimit-burst-interval-milliseconds";

/// Which quota window rejected a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Interval,
    Burst,
    Daily,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitScope::Interval => write!(f, "interval"),
            LimitScope::Burst => write!(f, "burst"),
            LimitScope::Daily => write!(f, "daily"),
        }
    }
}

/// Rate limiter rejections
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit exhausted ({scope} window), retry after {retry_after_secs}s")]
    Exhausted { scope: LimitScope, retry_after_secs: u64 },

    #[error("Rate limit queue is full ({capacity} waiting)")]
    QueueFull { capacity: usize },
}

impl RateLimitError {
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Exhausted { retry_after_secs, .. } => Some(*retry_after_secs),
            Self::QueueFull { .. } => None,
        }
    }
}

/// Configuration for [`RateLimiter`]
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Requests per interval window
    pub max_requests: u32,
    pub interval: Duration,
    pub daily_limit: u32,
    /// Fraction of the interval quota below which proactive throttling kicks in
    pub buffer_percentage: f64,
    pub enable_proactive_throttling: bool,
    /// Delay applied when the remaining quota is (almost) zero
    pub max_throttle_delay: Duration,
    /// Queue callers instead of rejecting them when the window is exhausted
    pub enable_queue: bool,
    pub max_queue_size: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            interval: Duration::from_secs(10),
            daily_limit: 250_000,
            buffer_percentage: 0.1,
            enable_proactive_throttling: true,
            max_throttle_delay: Duration::from_secs(2),
            enable_queue: false,
            max_queue_size: 100,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_requests == 0 {
            return Err(invalid("max_requests must be greater than 0"));
        }
        if self.interval.is_zero() {
            return Err(invalid("interval must be greater than zero"));
        }
        if self.daily_limit == 0 {
            return Err(invalid("daily_limit must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.buffer_percentage) {
            return Err(invalid("buffer_percentage must be within 0.0..=1.0"));
        }
        if self.enable_queue && self.max_queue_size == 0 {
            return Err(invalid("max_queue_size must be greater than 0 when queueing"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid { message: message.to_string() }
}

/// Current quota model, as last observed or assumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: i64,
    pub max: i64,
    pub interval_ms: u64,
    pub daily_remaining: i64,
    pub daily_max: i64,
    pub burst_remaining: i64,
    pub burst_max: i64,
    pub burst_interval_ms: u64,
    /// When the interval and burst windows replenish
    pub reset_at: Instant,
}

impl RateLimitState {
    fn from_config(config: &RateLimiterConfig, now: Instant) -> Self {
        let max = i64::from(config.max_requests);
        let interval_ms = duration_millis(config.interval);
        Self {
            remaining: max,
            max,
            interval_ms,
            daily_remaining: i64::from(config.daily_limit),
            daily_max: i64::from(config.daily_limit),
            burst_remaining: max,
            burst_max: max,
            burst_interval_ms: interval_ms,
            reset_at: now + config.interval,
        }
    }

    /// Smallest request count any window would still admit.
    fn available(&self) -> i64 {
        self.remaining.min(self.burst_remaining).min(self.daily_remaining).max(0)
    }
}

#[derive(Debug)]
struct LimiterInner {
    state: RateLimitState,
    daily_resets_on: chrono::NaiveDate,
    waiters: VecDeque<oneshot::Sender<()>>,
}

enum Decision {
    Admit(Duration),
    Reject(RateLimitError),
    Wait,
}

/// Per-workspace HubSpot rate limiter
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    inner: Arc<Mutex<LimiterInner>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_valid_config(RateLimiterConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: RateLimiterConfig) -> Self {
        let state = RateLimitState::from_config(&config, Instant::now());
        Self {
            inner: Arc::new(Mutex::new(LimiterInner {
                state,
                daily_resets_on: next_utc_midnight_date(),
                waiters: VecDeque::new(),
            })),
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Wait for permission to send one request.
    ///
    /// Returns immediately when quota is comfortable, sleeps for a throttle
    /// delay when quota is scarce, and either rejects or queues the caller
    /// when a window is exhausted.
    pub async fn check_rate_limit(&self) -> Result<(), RateLimitError> {
        let mut requeue_front = false;

        loop {
            let decision = {
                let mut inner = self.inner.lock();
                self.refresh_windows(&mut inner);
                // FIFO: newcomers line up behind existing waiters.
                if !requeue_front && self.config.enable_queue && !inner.waiters.is_empty() {
                    Decision::Wait
                } else {
                    self.decide(&mut inner)
                }
            };

            match decision {
                Decision::Admit(delay) => {
                    if !delay.is_zero() {
                        debug!(delay_ms = duration_millis(delay), "Proactively throttling request");
                        sleep(delay).await;
                    }
                    return Ok(());
                }
                Decision::Reject(err) => return Err(err),
                Decision::Wait => {
                    self.wait_in_queue(requeue_front).await?;
                    requeue_front = true;
                }
            }
        }
    }

    fn decide(&self, inner: &mut LimiterInner) -> Decision {
        let state = &mut inner.state;

        if state.daily_remaining <= 0 {
            let retry_after_secs = seconds_until_utc_midnight();
            warn!(retry_after_secs, "Daily rate limit exhausted");
            return Decision::Reject(RateLimitError::Exhausted {
                scope: LimitScope::Daily,
                retry_after_secs,
            });
        }

        let exhausted = if state.remaining <= 0 {
            Some((LimitScope::Interval, state.interval_ms))
        } else if state.burst_remaining <= 0 {
            Some((LimitScope::Burst, state.burst_interval_ms))
        } else {
            None
        };

        if let Some((scope, window_ms)) = exhausted {
            if self.config.enable_queue {
                return Decision::Wait;
            }
            let retry_after_secs = window_ms.div_ceil(1000).max(1);
            debug!(%scope, retry_after_secs, "Rate limit window exhausted");
            return Decision::Reject(RateLimitError::Exhausted { scope, retry_after_secs });
        }

        let delay = self.throttle_delay(state);

        state.remaining -= 1;
        state.burst_remaining -= 1;
        state.daily_remaining -= 1;
        trace!(
            remaining = state.remaining,
            burst_remaining = state.burst_remaining,
            daily_remaining = state.daily_remaining,
            "Request admitted"
        );

        Decision::Admit(delay)
    }

    fn throttle_delay(&self, state: &RateLimitState) -> Duration {
        if !self.config.enable_proactive_throttling || self.config.buffer_percentage <= 0.0 {
            return Duration::ZERO;
        }

        let fraction = |remaining: i64, max: i64| {
            if max <= 0 {
                1.0
            } else {
                remaining as f64 / max as f64
            }
        };
        let scarcest =
            fraction(state.remaining, state.max).min(fraction(state.burst_remaining, state.burst_max));

        if scarcest >= self.config.buffer_percentage {
            return Duration::ZERO;
        }

        let scale = (1.0 - scarcest / self.config.buffer_percentage).clamp(0.0, 1.0);
        self.config.max_throttle_delay.mul_f64(scale)
    }

    async fn wait_in_queue(&self, front: bool) -> Result<(), RateLimitError> {
        let mut rx = {
            let mut inner = self.inner.lock();
            if !front && inner.waiters.len() >= self.config.max_queue_size {
                warn!(capacity = self.config.max_queue_size, "Rate limit queue is full");
                return Err(RateLimitError::QueueFull { capacity: self.config.max_queue_size });
            }
            let (tx, rx) = oneshot::channel();
            if front {
                inner.waiters.push_front(tx);
            } else {
                inner.waiters.push_back(tx);
            }
            debug!(queued = inner.waiters.len(), "Waiting for rate limit window");
            rx
        };

        loop {
            let reset_at = self.inner.lock().state.reset_at;
            tokio::select! {
                released = &mut rx => {
                    // A dropped sender means the limiter was reset; re-check either way.
                    let _ = released;
                    return Ok(());
                }
                _ = sleep_until(reset_at) => {
                    self.release_waiters();
                }
            }
        }
    }

    /// Wake as many queued callers as the current quota allows, oldest first.
    fn release_waiters(&self) {
        let mut inner = self.inner.lock();
        self.refresh_windows(&mut inner);

        let mut available = inner.state.available();
        while available > 0 {
            let Some(waiter) = inner.waiters.pop_front() else {
                break;
            };
            if waiter.send(()).is_ok() {
                available -= 1;
            }
        }
    }

    fn refresh_windows(&self, inner: &mut LimiterInner) {
        let now = Instant::now();
        let state = &mut inner.state;
        if now >= state.reset_at {
            state.remaining = state.max;
            state.burst_remaining = state.burst_max;
            let interval = Duration::from_millis(state.interval_ms.max(1));
            // Skip windows that elapsed while idle.
            while state.reset_at <= now {
                state.reset_at += interval;
            }
            trace!("Rate limit interval window replenished");
        }

        let today = Utc::now().date_naive();
        if today >= inner.daily_resets_on {
            inner.state.daily_remaining = inner.state.daily_max;
            inner.daily_resets_on = next_utc_midnight_date();
        }
    }

    /// Apply `X-HubSpot-RateLimit-*` headers from a response.
    ///
    /// Missing or non-numeric values leave the previous state in place.
    /// Non-positive maxima and intervals are ignored. Negative remaining
    /// counts are kept as-is and read as exhausted.
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        {
            let mut inner = self.inner.lock();
            let state = &mut inner.state;

            if let Some(max) = header_i64(headers, HEADER_MAX).filter(|v| *v > 0) {
                state.max = max;
            }
            if let Some(remaining) = header_i64(headers, HEADER_REMAINING) {
                state.remaining = remaining;
            }
            if let Some(interval) = header_i64(headers, HEADER_INTERVAL_MS).filter(|v| *v > 0) {
                state.interval_ms = interval as u64;
            }
            if let Some(daily) = header_i64(headers, HEADER_DAILY).filter(|v| *v > 0) {
                state.daily_max = daily;
            }
            if let Some(daily_remaining) = header_i64(headers, HEADER_DAILY_REMAINING) {
                state.daily_remaining = daily_remaining;
            }
            if let Some(burst) = header_i64(headers, HEADER_BURST).filter(|v| *v > 0) {
                state.burst_max = burst;
            }
            if let Some(burst_remaining) = header_i64(headers, HEADER_BURST_REMAINING) {
                state.burst_remaining = burst_remaining;
            }
            if let Some(burst_interval) =
                header_i64(headers, HEADER_BURST_INTERVAL_MS).filter(|v| *v > 0)
            {
                state.burst_interval_ms = burst_interval as u64;
            }
        }

        self.release_waiters();
    }

    /// Defer the interval and burst reset to `wait` from now.
    ///
    /// Called after a 429: the server's Retry-After replaces the local
    /// window, so both windows replenish once it has elapsed.
    pub fn note_retry_after(&self, wait: Duration) {
        let mut inner = self.inner.lock();
        inner.state.reset_at = Instant::now() + wait;
        debug!(wait_ms = duration_millis(wait), "Rate limit window deferred to Retry-After");
    }

    /// Copy of the current quota model for diagnostics.
    pub fn snapshot(&self) -> RateLimitState {
        let mut inner = self.inner.lock();
        self.refresh_windows(&mut inner);
        inner.state
    }

    pub fn queued(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Restore configured defaults and release every queued caller.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = RateLimitState::from_config(&self.config, Instant::now());
        inner.daily_resets_on = next_utc_midnight_date();
        for waiter in inner.waiters.drain(..) {
            let _ = waiter.send(());
        }
        debug!("Rate limiter reset to configured defaults");
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse::<i64>().ok()
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn next_utc_midnight_date() -> chrono::NaiveDate {
    let today = Utc::now().date_naive();
    today.checked_add_days(Days::new(1)).unwrap_or(today)
}

/// Seconds until the next UTC midnight, rounded up and at least one.
pub fn seconds_until_utc_midnight() -> u64 {
    let now = Utc::now();
    let Some(midnight) = next_utc_midnight_date().and_hms_opt(0, 0, 0) else {
        return 86_400;
    };
    let millis = (midnight.and_utc() - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}
