//! Retrying HTTP client.

use std::time::Duration;

use reqwest::{Client, IntoUrl, Method, Request, RequestBuilder, Response};
use tracing::debug;

use crate::backoff;
use crate::config::RetryableClientConfig;
use crate::error::TransportError;
use crate::policy;

/// Outcome of a single attempt that did not produce a response.
#[derive(Debug)]
enum AttemptError {
    Request(reqwest::Error),
    ResponseHeaderTimeout(Duration),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Request(err) => write!(f, "{err}"),
            AttemptError::ResponseHeaderTimeout(timeout) => {
                write!(f, "timed out after {timeout:?} waiting for response headers")
            }
        }
    }
}

/// HTTP client that retries transient failures.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct RetryableClient {
    inner: Client,
    config: RetryableClientConfig,
}

impl RetryableClient {
    /// Create a new client.
    pub fn new(config: RetryableClientConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if !config.timeout.dial_timeout.is_zero() {
            builder = builder.connect_timeout(config.timeout.dial_timeout);
        }
        if !config.timeout.request_timeout.is_zero() {
            builder = builder.timeout(config.timeout.request_timeout);
        }
        let inner = builder.build().map_err(TransportError::Client)?;

        Ok(Self { inner, config })
    }

    pub fn config(&self) -> &RetryableClientConfig {
        &self.config
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.inner.request(method, url)
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn head<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.inner.head(url)
    }

    /// Build and execute a request.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, TransportError> {
        let request = builder.build().map_err(TransportError::Build)?;
        self.execute(request).await
    }

    /// Execute a request, retrying per the retry policy.
    ///
    /// A response is returned for any status the policy treats as terminal,
    /// including 4xx; callers decide what a status means. Retryable outcomes
    /// that persist past `max_retries` become [`TransportError::GaveUp`].
    pub async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let retry = self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            let Some(this_attempt) = request.try_clone() else {
                return Err(TransportError::BodyNotReplayable {
                    method: request.method().clone(),
                    url: request.url().clone(),
                });
            };

            let outcome = self.attempt(this_attempt).await;

            let (status, retry_after, last) = match outcome {
                Ok(response) if !policy::is_retryable_status(response.status()) => {
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status();
                    let hint = backoff::retry_after(status, response.headers());
                    (Some(status), hint, format!("unexpected status {status}"))
                }
                Err(AttemptError::Request(source)) if !policy::is_retryable_error(&source) => {
                    return Err(TransportError::Request {
                        method: request.method().clone(),
                        url: request.url().clone(),
                        source,
                    });
                }
                Err(err) => (None, None, err.to_string()),
            };

            if attempt >= retry.max_retries {
                return Err(TransportError::GaveUp {
                    method: request.method().clone(),
                    url: request.url().clone(),
                    attempts: attempt + 1,
                    status,
                    last,
                });
            }

            let wait = backoff::delay(&retry, attempt, retry_after);
            debug!(
                method = %request.method(),
                url = %request.url(),
                attempt = attempt + 1,
                status = ?status,
                error = %last,
                wait_ms = wait.as_millis() as u64,
                "Retrying request"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    /// One attempt. The header timeout spans connect, upload and headers.
    async fn attempt(&self, request: Request) -> Result<Response, AttemptError> {
        let header_timeout = self.config.timeout.response_header_timeout;
        let pending = self.inner.execute(request);

        if header_timeout.is_zero() {
            return pending.await.map_err(AttemptError::Request);
        }

        match tokio::time::timeout(header_timeout, pending).await {
            Ok(result) => result.map_err(AttemptError::Request),
            Err(_) => Err(AttemptError::ResponseHeaderTimeout(header_timeout)),
        }
    }
}
