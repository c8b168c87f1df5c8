//! Transport errors.

use reqwest::{Method, StatusCode, Url};
use thiserror::Error;

/// Errors returned by the retryable transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    Build(#[source] reqwest::Error),

    /// A failure the retry policy classifies as terminal.
    #[error("{method} {url}: {source}")]
    Request {
        method: Method,
        url: Url,
        source: reqwest::Error,
    },

    /// The request body is a stream and cannot be sent a second time.
    #[error("{method} {url}: request body cannot be replayed for a retry")]
    BodyNotReplayable { method: Method, url: Url },

    /// Every attempt failed with a retryable outcome.
    #[error("{method} {url} giving up after {attempts} attempt(s): {last}")]
    GaveUp {
        method: Method,
        url: Url,
        attempts: u32,
        /// Status of the last attempt, if it produced a response.
        status: Option<StatusCode>,
        last: String,
    },
}

impl TransportError {
    /// Status code of the final attempt, when there was a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::GaveUp { status, .. } => *status,
            TransportError::Request { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Returns true if retries were exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, TransportError::GaveUp { .. })
    }
}
