//! Error types for the fetch pipeline.

use std::io;

use plfm_retryable_http::TransportError;
use plfm_span_index::{Digest, DigestError, IndexError};
use reqwest::StatusCode;
use thiserror::Error;

/// Errors from parsing an image reference.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("reference cannot be empty")]
    Empty,

    /// The first path component is not a registry host.
    #[error("reference '{0}' does not name a registry host")]
    MissingHost(String),

    #[error("invalid repository name '{0}'")]
    InvalidRepository(String),

    #[error("invalid tag '{0}'")]
    InvalidTag(String),

    #[error("invalid digest in reference '{reference}': {source}")]
    InvalidDigest {
        reference: String,
        #[source]
        source: DigestError,
    },
}

/// Errors from talking to a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("{reference}: not found")]
    NotFound { reference: String },

    #[error("{method} {url}: unexpected status {status}")]
    Status {
        method: reqwest::Method,
        url: String,
        status: StatusCode,
    },

    #[error("authentication against {realm} failed: {reason}")]
    Auth { realm: String, reason: String },

    #[error("failed to look up credentials for {host}: {reason}")]
    Credentials { host: String, reason: String },

    #[error("invalid registry url '{0}'")]
    Url(String),

    /// Resolution refuses manifests above the size ceiling.
    #[error("{reference} is {size} bytes, exceeds limit of {limit} bytes")]
    TooLarge {
        reference: String,
        size: u64,
        limit: u64,
    },

    #[error("registry returned digest {actual} for {expected}")]
    DigestMismatch { expected: Digest, actual: String },

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from a content store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The digest is not present. Not a failure for local lookups.
    #[error("content {0} not found")]
    NotFound(Digest),

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// Content failed verification against its descriptor.
    #[error(transparent)]
    Verify(#[from] DigestError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Registry(RegistryError::NotFound { .. }) => true,
            _ => false,
        }
    }
}

impl From<io::Error> for StoreError {
    /// Verification failures surface from readers as `InvalidData` I/O errors
    /// carrying a [`DigestError`]; unwrap them back into [`StoreError::Verify`].
    fn from(err: io::Error) -> Self {
        match err.get_ref().and_then(|inner| inner.downcast_ref::<DigestError>()) {
            Some(digest_err) => StoreError::Verify(digest_err.clone()),
            None => StoreError::Io(err),
        }
    }
}

/// Errors from fetching and materializing artifacts.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to parse image reference '{reference}'")]
    ReferenceParse {
        reference: String,
        #[source]
        source: ReferenceError,
    },

    #[error("failed to parse index digest '{digest}'")]
    DigestParse {
        digest: String,
        #[source]
        source: DigestError,
    },

    #[error("size of descriptor is 0; unable to resolve {reference}")]
    Resolution {
        reference: String,
        #[source]
        source: RegistryError,
    },

    #[error("unable to fetch {digest} from remote store")]
    RemoteFetch {
        digest: Digest,
        #[source]
        source: StoreError,
    },

    #[error("unable to store {digest} in local store")]
    LocalStore {
        digest: Digest,
        #[source]
        source: StoreError,
    },

    #[error("cannot parse index {digest}")]
    IndexParse {
        digest: Digest,
        #[source]
        source: IndexError,
    },

    #[error("failed to read {digest}")]
    Io {
        digest: Digest,
        #[source]
        source: io::Error,
    },

    /// First failure among the concurrent blob tasks.
    #[error("failed to materialize blob {digest}")]
    Blob {
        digest: Digest,
        #[source]
        source: Box<FetchError>,
    },

    /// Skipped because a sibling task had already failed or the caller gave up.
    #[error("fetch of {digest} cancelled")]
    Cancelled { digest: Digest },

    #[error("blob task panicked: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("failed to set up registry client: {0}")]
    Client(#[from] TransportError),
}

impl FetchError {
    /// True for cancellations, including a blob failure that was only a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            FetchError::Cancelled { .. } => true,
            FetchError::Blob { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_unwraps_digest_error() {
        let digest_err = DigestError::SizeMismatch {
            digest: "sha256:00".to_string(),
            expected: 4,
            actual: 5,
        };
        let io_err = io::Error::new(io::ErrorKind::InvalidData, digest_err.clone());

        match StoreError::from(io_err) {
            StoreError::Verify(err) => assert_eq!(err, digest_err),
            other => panic!("expected Verify, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_io_error_stays_io() {
        let err = StoreError::from(io::Error::other("disk full"));
        assert!(matches!(err, StoreError::Io(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_cancelled_is_seen_through_blob_wrapper() {
        let digest = Digest::sha256(b"blob");
        let err = FetchError::Blob {
            digest: digest.clone(),
            source: Box::new(FetchError::Cancelled { digest }),
        };
        assert!(err.is_cancelled());
    }
}
