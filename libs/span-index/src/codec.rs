//! Conversion between [`Index`] and its FlatBuffers wire form.

use flatbuffers::{FlatBufferBuilder, WIPOffset};

use crate::digest::{Descriptor, Digest};
use crate::error::IndexError;
use crate::fbs;
use crate::model::{
    CompressionAlgorithm, CompressionInfo, EntryType, FileMetadata, FormatVersion, Index, Toc,
    Xattr,
};

const INITIAL_CAPACITY: usize = 4096;

// =============================================================================
// Encoding
// =============================================================================

pub(crate) fn encode(index: &Index) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::with_capacity(INITIAL_CAPACITY);

    let version = fbb.create_string(&index.version);
    let build_tool = fbb.create_string(&index.build_tool_identifier);
    let toc = write_toc(&mut fbb, &index.toc);
    let compression_info = write_compression_info(&mut fbb, &index.compression_info);
    let blobs: Vec<_> = index
        .blobs
        .iter()
        .map(|blob| write_blob(&mut fbb, blob))
        .collect();
    let blobs = fbb.create_vector(&blobs);

    let start = fbb.start_table();
    fbb.push_slot::<i64>(
        fbs::Index::VT_COMPRESSED_ARCHIVE_SIZE,
        index.compressed_archive_size,
        0,
    );
    fbb.push_slot::<i64>(
        fbs::Index::VT_UNCOMPRESSED_ARCHIVE_SIZE,
        index.uncompressed_archive_size,
        0,
    );
    fbb.push_slot_always(fbs::Index::VT_VERSION, version);
    fbb.push_slot_always(fbs::Index::VT_BUILD_TOOL_IDENTIFIER, build_tool);
    fbb.push_slot_always(fbs::Index::VT_TOC, toc);
    fbb.push_slot_always(fbs::Index::VT_COMPRESSION_INFO, compression_info);
    fbb.push_slot_always(fbs::Index::VT_BLOBS, blobs);
    let root = fbb.end_table(start);

    fbb.finish(WIPOffset::<fbs::Index>::new(root.value()), None);
    fbb.finished_data().to_vec()
}

fn write_toc<'fbb>(fbb: &mut FlatBufferBuilder<'fbb>, toc: &Toc) -> WIPOffset<fbs::Toc<'fbb>> {
    let entries: Vec<_> = toc
        .metadata
        .iter()
        .map(|entry| write_file_metadata(fbb, entry))
        .collect();
    let entries = fbb.create_vector(&entries);

    let start = fbb.start_table();
    fbb.push_slot_always(fbs::Toc::VT_METADATA, entries);
    WIPOffset::new(fbb.end_table(start).value())
}

fn write_file_metadata<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    entry: &FileMetadata,
) -> WIPOffset<fbs::FileMetadata<'fbb>> {
    let xattrs: Vec<_> = entry
        .xattrs
        .iter()
        .map(|xattr| write_xattr(fbb, xattr))
        .collect();
    let xattrs = fbb.create_vector(&xattrs);
    let name = fbb.create_string(&entry.name);
    let entry_type = fbb.create_string(entry.entry_type.as_str());
    let linkname = fbb.create_string(&entry.linkname);
    let uname = fbb.create_string(&entry.uname);
    let gname = fbb.create_string(&entry.gname);
    let mod_time = fbb.create_string(&entry.mod_time);

    let start = fbb.start_table();
    fbb.push_slot::<i64>(
        fbs::FileMetadata::VT_UNCOMPRESSED_OFFSET,
        entry.uncompressed_offset,
        0,
    );
    fbb.push_slot::<i64>(
        fbs::FileMetadata::VT_UNCOMPRESSED_SIZE,
        entry.uncompressed_size,
        0,
    );
    fbb.push_slot::<i64>(fbs::FileMetadata::VT_MODE, entry.mode, 0);
    fbb.push_slot::<i64>(fbs::FileMetadata::VT_DEVMAJOR, entry.devmajor, 0);
    fbb.push_slot::<i64>(fbs::FileMetadata::VT_DEVMINOR, entry.devminor, 0);
    fbb.push_slot_always(fbs::FileMetadata::VT_NAME, name);
    fbb.push_slot_always(fbs::FileMetadata::VT_TYPE, entry_type);
    fbb.push_slot_always(fbs::FileMetadata::VT_LINKNAME, linkname);
    fbb.push_slot::<u32>(fbs::FileMetadata::VT_UID, entry.uid, 0);
    fbb.push_slot::<u32>(fbs::FileMetadata::VT_GID, entry.gid, 0);
    fbb.push_slot_always(fbs::FileMetadata::VT_UNAME, uname);
    fbb.push_slot_always(fbs::FileMetadata::VT_GNAME, gname);
    fbb.push_slot_always(fbs::FileMetadata::VT_MOD_TIME, mod_time);
    fbb.push_slot_always(fbs::FileMetadata::VT_XATTRS, xattrs);
    WIPOffset::new(fbb.end_table(start).value())
}

fn write_xattr<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    xattr: &Xattr,
) -> WIPOffset<fbs::Xattr<'fbb>> {
    let key = fbb.create_string(&xattr.key);
    let value = fbb.create_string(&xattr.value);

    let start = fbb.start_table();
    fbb.push_slot_always(fbs::Xattr::VT_KEY, key);
    fbb.push_slot_always(fbs::Xattr::VT_VALUE, value);
    WIPOffset::new(fbb.end_table(start).value())
}

fn write_compression_info<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    info: &CompressionInfo,
) -> WIPOffset<fbs::CompressionInfo<'fbb>> {
    let span_digests: Vec<_> = info
        .span_digests
        .iter()
        .map(|digest| fbb.create_string(&digest.to_string()))
        .collect();
    let span_digests = fbb.create_vector(&span_digests);
    let checkpoints = fbb.create_vector(&info.checkpoints);

    let start = fbb.start_table();
    fbb.push_slot_always(fbs::CompressionInfo::VT_SPAN_DIGESTS, span_digests);
    fbb.push_slot_always(fbs::CompressionInfo::VT_CHECKPOINTS, checkpoints);
    fbb.push_slot::<i32>(fbs::CompressionInfo::VT_MAX_SPAN_ID, info.max_span_id, 0);
    fbb.push_slot::<i8>(
        fbs::CompressionInfo::VT_COMPRESSION_ALGORITHM,
        info.algorithm.tag(),
        fbs::CompressionInfo::DEFAULT_COMPRESSION_ALGORITHM,
    );
    WIPOffset::new(fbb.end_table(start).value())
}

fn write_blob<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    blob: &Descriptor,
) -> WIPOffset<fbs::BlobDescriptor<'fbb>> {
    let media_type = blob
        .media_type
        .as_deref()
        .map(|media_type| fbb.create_string(media_type));
    let digest = fbb.create_string(&blob.digest.to_string());
    let size = wire_size(blob.size);

    let start = fbb.start_table();
    fbb.push_slot::<i64>(fbs::BlobDescriptor::VT_SIZE, size, 0);
    if let Some(media_type) = media_type {
        fbb.push_slot_always(fbs::BlobDescriptor::VT_MEDIA_TYPE, media_type);
    }
    fbb.push_slot_always(fbs::BlobDescriptor::VT_DIGEST, digest);
    WIPOffset::new(fbb.end_table(start).value())
}

/// Blob sizes are `long` on the wire. Content past `i64::MAX` bytes cannot
/// exist, so a larger size is a caller bug: it panics in debug builds and is
/// clamped in release builds, where the clamped size then fails verification.
fn wire_size(size: u64) -> i64 {
    debug_assert!(
        i64::try_from(size).is_ok(),
        "blob size {size} does not fit the index format"
    );
    i64::try_from(size).unwrap_or(i64::MAX)
}

// =============================================================================
// Decoding
// =============================================================================

pub(crate) fn decode(buf: &[u8]) -> Result<Index, IndexError> {
    let root = fbs::root(buf)?;

    let version = root
        .version()
        .filter(|v| !v.is_empty())
        .ok_or(IndexError::MissingField("version"))?;
    let parsed = FormatVersion::parse(version)?;
    if !parsed.is_supported() {
        return Err(IndexError::UnsupportedVersion {
            found: version.to_string(),
            supported: FormatVersion::CURRENT.major,
        });
    }

    let toc = root.toc().ok_or(IndexError::MissingField("toc"))?;
    let compression_info = root
        .compression_info()
        .ok_or(IndexError::MissingField("compression_info"))?;

    Ok(Index {
        version: version.to_string(),
        build_tool_identifier: root.build_tool_identifier().unwrap_or_default().to_string(),
        compressed_archive_size: root.compressed_archive_size(),
        uncompressed_archive_size: root.uncompressed_archive_size(),
        toc: read_toc(toc),
        compression_info: read_compression_info(compression_info)?,
        blobs: read_blobs(&root)?,
    })
}

fn read_toc(toc: fbs::Toc<'_>) -> Toc {
    let metadata = toc
        .metadata()
        .map(|entries| entries.iter().map(read_file_metadata).collect())
        .unwrap_or_default();
    Toc { metadata }
}

fn read_file_metadata(entry: fbs::FileMetadata<'_>) -> FileMetadata {
    let xattrs = entry
        .xattrs()
        .map(|xattrs| {
            xattrs
                .iter()
                .map(|x| Xattr::new(x.key().unwrap_or_default(), x.value().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();

    FileMetadata {
        name: entry.name().unwrap_or_default().to_string(),
        entry_type: EntryType::from(entry.type_().unwrap_or_default()),
        uncompressed_offset: entry.uncompressed_offset(),
        uncompressed_size: entry.uncompressed_size(),
        linkname: entry.linkname().unwrap_or_default().to_string(),
        mode: entry.mode(),
        uid: entry.uid(),
        gid: entry.gid(),
        uname: entry.uname().unwrap_or_default().to_string(),
        gname: entry.gname().unwrap_or_default().to_string(),
        mod_time: entry.mod_time().unwrap_or_default().to_string(),
        devmajor: entry.devmajor(),
        devminor: entry.devminor(),
        xattrs,
    }
}

fn read_compression_info(info: fbs::CompressionInfo<'_>) -> Result<CompressionInfo, IndexError> {
    let algorithm = CompressionAlgorithm::from_tag(info.compression_algorithm())?;
    let max_span_id = info.max_span_id();

    let span_digests = info
        .span_digests()
        .map(|digests| {
            digests
                .iter()
                .enumerate()
                .map(|(span, digest)| {
                    Digest::parse(digest)
                        .map_err(|source| IndexError::InvalidSpanDigest { span, source })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    // One digest per span, `max_span_id + 1` of them.
    let expected = i64::from(max_span_id) + 1;
    if expected != span_digests.len() as i64 {
        return Err(IndexError::SpanCountMismatch {
            max_span_id,
            expected,
            found: span_digests.len(),
        });
    }

    Ok(CompressionInfo {
        algorithm,
        max_span_id,
        span_digests,
        checkpoints: info
            .checkpoints()
            .map(|c| c.bytes().to_vec())
            .unwrap_or_default(),
    })
}

fn read_blobs(root: &fbs::Index<'_>) -> Result<Vec<Descriptor>, IndexError> {
    let Some(blobs) = root.blobs() else {
        return Ok(Vec::new());
    };

    blobs
        .iter()
        .enumerate()
        .map(|(position, blob)| {
            let digest = Digest::parse(blob.digest().unwrap_or_default())
                .map_err(|source| IndexError::InvalidBlobDigest { position, source })?;
            let size = u64::try_from(blob.size()).map_err(|_| IndexError::NegativeBlobSize {
                position,
                size: blob.size(),
            })?;
            Ok(Descriptor {
                media_type: blob.media_type().map(str::to_string),
                digest,
                size,
            })
        })
        .collect()
}
