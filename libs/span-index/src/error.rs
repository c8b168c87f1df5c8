//! Error types for digests and index decoding.

use thiserror::Error;

/// Errors that can occur when parsing or verifying a content digest.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The digest string is empty.
    #[error("digest cannot be empty")]
    Empty,

    /// The digest has no `algorithm:` prefix.
    #[error("digest missing algorithm prefix: '{0}'")]
    MissingAlgorithm(String),

    /// The algorithm is not one we can verify.
    #[error("unsupported digest algorithm: '{0}'")]
    UnsupportedAlgorithm(String),

    /// The encoded portion is not lowercase hex of the right length.
    #[error("invalid {algorithm} digest encoding: {reason}")]
    InvalidEncoded {
        algorithm: &'static str,
        reason: String,
    },

    /// Content did not hash to the expected digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },

    /// Content length did not match the descriptor size.
    #[error("size mismatch for {digest}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        digest: String,
        expected: u64,
        actual: u64,
    },
}

/// Errors that can occur when decoding a span index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The buffer failed FlatBuffers verification (no valid root table).
    #[error("invalid index buffer: {0}")]
    Invalid(#[from] flatbuffers::InvalidFlatbuffer),

    /// A field the index cannot be used without is absent.
    #[error("index is missing required field '{0}'")]
    MissingField(&'static str),

    /// The version string is not `major.minor`.
    #[error("invalid index version '{0}': expected major.minor")]
    InvalidVersion(String),

    /// The major version is newer than this reader understands.
    #[error("unsupported index version {found} (newest supported major version is {supported})")]
    UnsupportedVersion { found: String, supported: u32 },

    /// The compression algorithm tag is not in the vocabulary.
    #[error("unknown compression algorithm {0}")]
    UnknownCompressionAlgorithm(i8),

    /// The number of span digests disagrees with `max_span_id`.
    #[error("span count mismatch: max_span_id {max_span_id} implies {expected} spans, found {found} span digests")]
    SpanCountMismatch {
        max_span_id: i32,
        expected: i64,
        found: usize,
    },

    /// A span digest does not parse.
    #[error("invalid digest for span {span}: {source}")]
    InvalidSpanDigest {
        span: usize,
        #[source]
        source: DigestError,
    },

    /// A blob descriptor carries a digest that does not parse.
    #[error("invalid digest for blob {position}: {source}")]
    InvalidBlobDigest {
        position: usize,
        #[source]
        source: DigestError,
    },

    /// A blob descriptor has a negative size.
    #[error("blob {position} has negative size {size}")]
    NegativeBlobSize { position: usize, size: i64 },
}

impl IndexError {
    /// Returns true if the buffer itself is malformed, as opposed to a
    /// well-formed buffer with unacceptable contents.
    pub fn is_malformed(&self) -> bool {
        matches!(self, IndexError::Invalid(_))
    }
}
