//! Content digests and the descriptors that address content by them.
//!
//! Digests are algorithm-prefixed lowercase hex (`sha256:<64 hex>`). They are
//! the only addressing key in both the local and the remote content store.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256, Sha512};

use crate::error::DigestError;

/// Hash algorithm of a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// The algorithm prefix as it appears in digest strings.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex-encoded hash.
    pub const fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated content digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Parses a digest from its canonical `algorithm:hex` form.
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        if s.is_empty() {
            return Err(DigestError::Empty);
        }

        let Some((algorithm, encoded)) = s.split_once(':') else {
            return Err(DigestError::MissingAlgorithm(s.to_string()));
        };

        let algorithm = match algorithm {
            "sha256" => Algorithm::Sha256,
            "sha512" => Algorithm::Sha512,
            other => return Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        };

        if encoded.len() != algorithm.hex_len() {
            return Err(DigestError::InvalidEncoded {
                algorithm: algorithm.as_str(),
                reason: format!(
                    "expected {} hex characters, got {}",
                    algorithm.hex_len(),
                    encoded.len()
                ),
            });
        }

        if !encoded
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(DigestError::InvalidEncoded {
                algorithm: algorithm.as_str(),
                reason: "encoded portion must be lowercase hex".to_string(),
            });
        }

        Ok(Self {
            algorithm,
            hex: encoded.to_string(),
        })
    }

    /// Computes the sha256 digest of `data`.
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    /// Computes the digest of `data` with the given algorithm.
    pub fn compute(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut hasher = Hasher::new(algorithm);
        hasher.update(data);
        hasher.finish()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The hex-encoded hash without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Starts an incremental verification of content against this digest.
    pub fn verifier(&self) -> Verifier {
        Verifier {
            expected: self.clone(),
            hasher: Hasher::new(self.algorithm),
            written: 0,
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            Algorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> Digest {
        match self {
            Hasher::Sha256(h) => Digest {
                algorithm: Algorithm::Sha256,
                hex: hex::encode(h.finalize()),
            },
            Hasher::Sha512(h) => Digest {
                algorithm: Algorithm::Sha512,
                hex: hex::encode(h.finalize()),
            },
        }
    }
}

/// Incremental content verifier.
///
/// Feed it every byte of the content with [`Verifier::update`], then call
/// [`Verifier::verify`] once the content is exhausted.
pub struct Verifier {
    expected: Digest,
    hasher: Hasher,
    written: u64,
}

impl Verifier {
    pub fn update(&mut self, data: &[u8]) {
        self.written += data.len() as u64;
        self.hasher.update(data);
    }

    /// Number of bytes fed so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn expected(&self) -> &Digest {
        &self.expected
    }

    /// Checks the content against the expected digest and, when `size` is
    /// known (non-zero), against the expected length.
    pub fn verify(self, size: u64) -> Result<Digest, DigestError> {
        if size != 0 && self.written != size {
            return Err(DigestError::SizeMismatch {
                digest: self.expected.to_string(),
                expected: size,
                actual: self.written,
            });
        }

        let actual = self.hasher.finish();
        if actual != self.expected {
            return Err(DigestError::Mismatch {
                expected: self.expected.to_string(),
                actual: actual.to_string(),
            });
        }

        Ok(actual)
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("expected", &self.expected)
            .field("written", &self.written)
            .finish()
    }
}

/// Identifies a piece of content: digest, size and an optional media type.
///
/// A size of zero is the "unknown" sentinel; it is never a real artifact size.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub digest: Digest,
    #[serde(default)]
    pub size: u64,
}

impl Descriptor {
    pub fn new(digest: Digest, size: u64) -> Self {
        Self {
            media_type: None,
            digest,
            size,
        }
    }

    /// A descriptor that only knows its digest.
    pub fn from_digest(digest: Digest) -> Self {
        Self::new(digest, 0)
    }

    /// Describes `data` with a sha256 digest.
    pub fn for_bytes(data: &[u8]) -> Self {
        Self::new(Digest::sha256(data), data.len() as u64)
    }

    #[must_use]
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn is_size_known(&self) -> bool {
        self.size != 0
    }
}
