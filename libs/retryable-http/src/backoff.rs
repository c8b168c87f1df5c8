//! Backoff schedule.
//!
//! The base delay is the server's `Retry-After` hint when one is present on a
//! 429/503, otherwise `min_wait * 2^attempt`. Either way it is capped at
//! `max_wait`. The base is then jittered upwards by up to `1/JITTER_DIVISOR`
//! of itself; jitter never shortens the wait.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use crate::config::RetryConfig;

/// Added jitter is at most `delay / JITTER_DIVISOR` (12.5%).
pub const JITTER_DIVISOR: u32 = 8;

/// Returns a duration drawn uniformly from `[duration, duration + duration / divisor)`.
///
/// When `duration / divisor` rounds down to zero there is no room for jitter
/// and `duration` is returned unchanged.
pub fn jitter(duration: Duration, divisor: u32) -> Duration {
    let span = duration.as_nanos() / u128::from(divisor.max(1));
    if span == 0 {
        return duration;
    }

    let span = u64::try_from(span).unwrap_or(u64::MAX);
    let extra = rand::rng().random_range(0..span);
    duration.saturating_add(Duration::from_nanos(extra))
}

/// `min * 2^attempt`, capped at `max`. `attempt` counts from zero.
pub fn exponential(min: Duration, max: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| min.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

/// Parses a `Retry-After` hint. Only honored on 429 and 503 responses.
///
/// Accepts delta-seconds or an HTTP-date; a date in the past yields zero.
pub fn retry_after(status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }

    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

/// Unjittered delay before retry number `attempt`.
pub fn base_delay(config: &RetryConfig, attempt: u32, retry_after: Option<Duration>) -> Duration {
    retry_after
        .unwrap_or_else(|| exponential(config.min_wait, config.max_wait, attempt))
        .min(config.max_wait)
}

/// Delay before retry number `attempt`, jitter included.
pub fn delay(config: &RetryConfig, attempt: u32, retry_after: Option<Duration>) -> Duration {
    jitter(base_delay(config, attempt, retry_after), JITTER_DIVISOR)
}
