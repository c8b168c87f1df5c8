//! Owned, decoded form of the span index.

use std::fmt;

use chrono::{DateTime, FixedOffset};

use crate::codec;
use crate::digest::{Descriptor, Digest};
use crate::error::IndexError;

/// `major.minor` version of the index format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    /// Version written by this crate.
    pub const CURRENT: FormatVersion = FormatVersion { major: 1, minor: 0 };

    pub fn parse(s: &str) -> Result<Self, IndexError> {
        let invalid = || IndexError::InvalidVersion(s.to_string());

        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        if major.is_empty()
            || minor.is_empty()
            || !major.bytes().all(|b| b.is_ascii_digit())
            || !minor.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }

    /// Whether a reader at [`FormatVersion::CURRENT`] can decode this version.
    pub fn is_supported(&self) -> bool {
        self.major <= Self::CURRENT.major
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The root artifact: table of contents plus span compression metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Format version, `major.minor`. Kept verbatim so re-encoding is exact.
    pub version: String,
    /// Free-form tag naming the tool that produced the index.
    pub build_tool_identifier: String,
    pub compressed_archive_size: i64,
    pub uncompressed_archive_size: i64,
    pub toc: Toc,
    pub compression_info: CompressionInfo,
    /// Blobs that must be materialized alongside the index.
    pub blobs: Vec<Descriptor>,
}

impl Index {
    /// Decodes and validates an index buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, IndexError> {
        codec::decode(buf)
    }

    /// Encodes the index into its FlatBuffers wire form.
    pub fn encode(&self) -> Vec<u8> {
        codec::encode(self)
    }

    /// Digest of the encoded index.
    pub fn digest(&self) -> Digest {
        Digest::sha256(&self.encode())
    }

    pub fn format_version(&self) -> Result<FormatVersion, IndexError> {
        FormatVersion::parse(&self.version)
    }

    /// Number of spans in the compressed stream.
    pub fn num_spans(&self) -> usize {
        self.compression_info.num_spans()
    }

    /// First entry with the given name, in archive order.
    pub fn find(&self, name: &str) -> Option<&FileMetadata> {
        self.toc.metadata.iter().find(|m| m.name == name)
    }
}

/// Table of contents. Entry order is archive order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toc {
    pub metadata: Vec<FileMetadata>,
}

/// Tar member type.
///
/// Unknown tags are preserved in [`EntryType::Other`] so they survive a
/// decode/encode cycle unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum EntryType {
    #[default]
    Regular,
    Directory,
    Symlink,
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Other(String),
}

impl EntryType {
    pub fn as_str(&self) -> &str {
        match self {
            EntryType::Regular => "reg",
            EntryType::Directory => "dir",
            EntryType::Symlink => "symlink",
            EntryType::Hardlink => "hardlink",
            EntryType::CharDevice => "char",
            EntryType::BlockDevice => "block",
            EntryType::Fifo => "fifo",
            EntryType::Other(tag) => tag,
        }
    }
}

impl From<&str> for EntryType {
    fn from(tag: &str) -> Self {
        match tag {
            "reg" => EntryType::Regular,
            "dir" => EntryType::Directory,
            "symlink" => EntryType::Symlink,
            "hardlink" => EntryType::Hardlink,
            "char" => EntryType::CharDevice,
            "block" => EntryType::BlockDevice,
            "fifo" => EntryType::Fifo,
            other => EntryType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extended attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Xattr {
    pub key: String,
    pub value: String,
}

impl Xattr {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One archive member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub entry_type: EntryType,
    /// Offset of the member's content in the uncompressed stream.
    pub uncompressed_offset: i64,
    pub uncompressed_size: i64,
    pub linkname: String,
    pub mode: i64,
    pub uid: u32,
    pub gid: u32,
    pub uname: String,
    pub gname: String,
    /// RFC 3339 timestamp, optionally with sub-second precision.
    pub mod_time: String,
    pub devmajor: i64,
    pub devminor: i64,
    pub xattrs: Vec<Xattr>,
}

impl FileMetadata {
    /// Parses `mod_time`. Returns `None` when it is empty or malformed.
    pub fn modified_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.mod_time).ok()
    }

    /// Value of the first extended attribute with `key`.
    pub fn xattr(&self, key: &str) -> Option<&str> {
        self.xattrs
            .iter()
            .find(|x| x.key == key)
            .map(|x| x.value.as_str())
    }
}

/// Compression of the layer the index describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum CompressionAlgorithm {
    #[default]
    Gzip = 1,
    Uncompressed = 2,
}

impl CompressionAlgorithm {
    pub fn from_tag(tag: i8) -> Result<Self, IndexError> {
        match tag {
            1 => Ok(CompressionAlgorithm::Gzip),
            2 => Ok(CompressionAlgorithm::Uncompressed),
            other => Err(IndexError::UnknownCompressionAlgorithm(other)),
        }
    }

    pub fn tag(self) -> i8 {
        self as i8
    }
}

/// Span metadata for random access into the compressed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionInfo {
    pub algorithm: CompressionAlgorithm,
    /// Number of spans minus one.
    pub max_span_id: i32,
    /// One digest per span, in stream order.
    pub span_digests: Vec<Digest>,
    /// Opaque decompressor state snapshots, one region per span boundary.
    pub checkpoints: Vec<u8>,
}

impl CompressionInfo {
    pub fn num_spans(&self) -> usize {
        usize::try_from(i64::from(self.max_span_id) + 1).unwrap_or(0)
    }
}

impl Default for CompressionInfo {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Gzip,
            max_span_id: -1,
            span_digests: Vec::new(),
            checkpoints: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_version_parse() {
        assert_eq!(
            FormatVersion::parse("1.0").unwrap(),
            FormatVersion { major: 1, minor: 0 }
        );
        assert_eq!(FormatVersion::parse("0.9").unwrap().to_string(), "0.9");
        assert!(FormatVersion::parse("0.9").unwrap().is_supported());
        assert!(!FormatVersion::parse("2.0").unwrap().is_supported());

        for bad in ["", "1", "1.", ".1", "1.0.0", "a.b", "-1.0", "1.+2"] {
            assert!(
                matches!(FormatVersion::parse(bad), Err(IndexError::InvalidVersion(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_entry_type_vocabulary() {
        for tag in ["reg", "dir", "symlink", "hardlink", "char", "block", "fifo"] {
            let entry_type = EntryType::from(tag);
            assert!(!matches!(entry_type, EntryType::Other(_)));
            assert_eq!(entry_type.as_str(), tag);
        }

        let unknown = EntryType::from("chunk");
        assert_eq!(unknown, EntryType::Other("chunk".to_string()));
        assert_eq!(unknown.to_string(), "chunk");
    }

    #[test]
    fn test_compression_algorithm_tags() {
        assert_eq!(CompressionAlgorithm::default(), CompressionAlgorithm::Gzip);
        assert_eq!(CompressionAlgorithm::Gzip.tag(), 1);
        assert_eq!(
            CompressionAlgorithm::from_tag(2).unwrap(),
            CompressionAlgorithm::Uncompressed
        );
        assert!(matches!(
            CompressionAlgorithm::from_tag(0),
            Err(IndexError::UnknownCompressionAlgorithm(0))
        ));
    }

    #[test]
    fn test_num_spans() {
        let info = CompressionInfo {
            max_span_id: 2,
            ..Default::default()
        };
        assert_eq!(info.num_spans(), 3);

        let empty = CompressionInfo {
            max_span_id: -1,
            ..Default::default()
        };
        assert_eq!(empty.num_spans(), 0);
    }

    #[test]
    fn test_modified_at() {
        let entry = FileMetadata {
            mod_time: "2024-03-01T12:30:45.123456789Z".to_string(),
            ..Default::default()
        };
        let parsed = entry.modified_at().unwrap();
        assert_eq!(parsed.timestamp(), 1_709_296_245);
        assert_eq!(parsed.timestamp_subsec_nanos(), 123_456_789);

        let no_fraction = FileMetadata {
            mod_time: "2024-03-01T12:30:45+02:00".to_string(),
            ..Default::default()
        };
        assert!(no_fraction.modified_at().is_some());

        assert!(FileMetadata::default().modified_at().is_none());
    }
}
