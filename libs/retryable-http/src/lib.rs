//! # plfm-retryable-http
//!
//! HTTP client wrapper used for all registry traffic. It adds:
//!
//! - Tiered timeouts per attempt: dial, response headers, whole request
//! - Retries on network errors, 429 and 5xx (except 501)
//! - Exponential backoff honoring `Retry-After`, with additive jitter
//!
//! ```ignore
//! let client = RetryableClient::new(RetryableClientConfig::default())?;
//! let response = client.send(client.get(url)).await?;
//! ```

pub mod backoff;
mod client;
mod config;
mod error;
pub mod policy;

pub use client::RetryableClient;
pub use config::{
    RetryConfig, RetryableClientConfig, TimeoutConfig, DEFAULT_DIAL_TIMEOUT_MS,
    DEFAULT_MAX_RETRIES, DEFAULT_MAX_WAIT_MS, DEFAULT_MIN_WAIT_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_RESPONSE_HEADER_TIMEOUT_MS,
};
pub use error::TransportError;
