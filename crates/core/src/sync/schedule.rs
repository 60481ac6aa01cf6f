//! Retry backoff schedule

use std::time::Duration;

/// Delay before retry `n` (1-based): 1m, 5m, 15m, 1h, then 2h for every
/// later attempt.
const RETRY_DELAYS: [Duration; 5] = [
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(2 * 60 * 60),
];

/// Backoff for the given retry attempt, clamped to the last table entry.
///
/// Attempt `0` is treated like attempt `1`.
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let index = (attempt.max(1) as usize - 1).min(RETRY_DELAYS.len() - 1);
    RETRY_DELAYS[index]
}
