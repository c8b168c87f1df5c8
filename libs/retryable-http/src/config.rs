//! Retry and timeout settings.

use std::time::Duration;

/// Default milliseconds before a connection attempt times out.
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 3_000;
/// Default milliseconds to wait for response headers once the request is sent.
pub const DEFAULT_RESPONSE_HEADER_TIMEOUT_MS: u64 = 3_000;
/// Default milliseconds a whole attempt may take, body included.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

// Target total retry time of at least 5s: 30 * (2^8 - 1) > 5000.

/// Default retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 8;
/// Default minimum wait between attempts in milliseconds.
pub const DEFAULT_MIN_WAIT_MS: u64 = 30;
/// Default maximum wait between attempts in milliseconds.
pub const DEFAULT_MAX_WAIT_MS: u64 = 300_000;

/// Retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries before giving up. Total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Floor of the exponential schedule.
    pub min_wait: Duration,
    /// Ceiling for the unjittered delay, `Retry-After` included.
    pub max_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            min_wait: Duration::from_millis(DEFAULT_MIN_WAIT_MS),
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
        }
    }
}

/// Timeout settings, applied to every attempt independently.
///
/// A zero duration disables the corresponding timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum time to establish a connection.
    pub dial_timeout: Duration,
    /// Maximum time to receive response headers. Does not cover reading the
    /// body.
    ///
    /// The clock starts when the attempt is dispatched, so connecting and
    /// writing the request body count against it too: the effective dial
    /// timeout is the smaller of the two, and a request body that takes
    /// longer than this to upload times the attempt out. Keep it above the
    /// expected upload time for large pushes, or set it to zero and rely on
    /// `request_timeout`.
    pub response_header_timeout: Duration,
    /// Maximum time for the whole attempt, from connecting until the body
    /// has been read.
    pub request_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_millis(DEFAULT_DIAL_TIMEOUT_MS),
            response_header_timeout: Duration::from_millis(DEFAULT_RESPONSE_HEADER_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

/// Complete configuration for a [`crate::RetryableClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryableClientConfig {
    pub timeout: TimeoutConfig,
    pub retry: RetryConfig,
}
