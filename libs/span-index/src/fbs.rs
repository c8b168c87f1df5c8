//! FlatBuffers bindings for the span index schema.
//!
//! ```text
//! table Xattr { key:string; value:string; }
//!
//! table FileMetadata {
//!   name:string; type:string;
//!   uncompressed_offset:long; uncompressed_size:long;
//!   linkname:string; mode:long; uid:uint; gid:uint;
//!   uname:string; gname:string; mod_time:string;
//!   devmajor:long; devminor:long;
//!   xattrs:[Xattr];
//! }
//!
//! table TOC { metadata:[FileMetadata]; }
//!
//! enum CompressionAlgorithm : byte { Gzip = 1, Uncompressed = 2 }
//!
//! table CompressionInfo {
//!   compression_algorithm:CompressionAlgorithm = Gzip;
//!   max_span_id:int; span_digests:[string]; checkpoints:[ubyte];
//! }
//!
//! table BlobDescriptor { media_type:string; digest:string; size:long; }
//!
//! table Index {
//!   version:string; build_tool_identifier:string;
//!   compressed_archive_size:long; uncompressed_archive_size:long;
//!   toc:TOC; compression_info:CompressionInfo;
//!   blobs:[BlobDescriptor];
//! }
//!
//! root_type Index;
//! ```
//!
//! Slot offsets are derived from field order. Fields may be appended, never
//! reordered or removed.
//!
//! Accessors assume the buffer was checked with the FlatBuffers verifier;
//! the only way to obtain a table here is through [`root`], which verifies.

use flatbuffers::{
    Follow, ForwardsUOffset, InvalidFlatbuffer, Table, VOffsetT, Vector, Verifiable, Verifier,
    VerifierOptions,
};

/// Upper bound on tables in one index. Every TOC entry and xattr is a table.
const MAX_TABLES: usize = 64 * 1024 * 1024;

/// Verifies `buf` and returns its root `Index` table.
pub fn root(buf: &[u8]) -> Result<Index<'_>, InvalidFlatbuffer> {
    let opts = VerifierOptions {
        max_tables: MAX_TABLES,
        ..Default::default()
    };
    flatbuffers::root_with_opts::<Index>(&opts, buf)
}

const fn slot(field: VOffsetT) -> VOffsetT {
    4 + 2 * field
}

macro_rules! table {
    ($name:ident) => {
        #[derive(Copy, Clone)]
        pub struct $name<'a> {
            tab: Table<'a>,
        }

        impl<'a> Follow<'a> for $name<'a> {
            type Inner = $name<'a>;

            #[inline]
            unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
                Self {
                    tab: Table::new(buf, loc),
                }
            }
        }
    };
}

#[inline]
fn string<'a>(tab: &Table<'a>, slot: VOffsetT) -> Option<&'a str> {
    // SAFETY: tables are only reachable through a verified root.
    unsafe { tab.get::<ForwardsUOffset<&'a str>>(slot, None) }
}

#[inline]
fn scalar<'a, T>(tab: &Table<'a>, slot: VOffsetT, default: T) -> T
where
    T: Follow<'a, Inner = T> + Copy + 'a,
{
    // SAFETY: tables are only reachable through a verified root.
    unsafe { tab.get::<T>(slot, Some(default)) }.unwrap_or(default)
}

#[inline]
fn vector<'a, T>(tab: &Table<'a>, slot: VOffsetT) -> Option<Vector<'a, T>>
where
    T: Follow<'a> + 'a,
{
    // SAFETY: tables are only reachable through a verified root.
    unsafe { tab.get::<ForwardsUOffset<Vector<'a, T>>>(slot, None) }
}

#[inline]
fn child<'a, T>(tab: &Table<'a>, slot: VOffsetT) -> Option<T::Inner>
where
    T: Follow<'a> + 'a,
{
    // SAFETY: tables are only reachable through a verified root.
    unsafe { tab.get::<ForwardsUOffset<T>>(slot, None) }
}

// =============================================================================
// Xattr
// =============================================================================

table!(Xattr);

impl<'a> Xattr<'a> {
    pub const VT_KEY: VOffsetT = slot(0);
    pub const VT_VALUE: VOffsetT = slot(1);

    pub fn key(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_KEY)
    }

    pub fn value(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_VALUE)
    }
}

impl Verifiable for Xattr<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("key", Self::VT_KEY, false)?
            .visit_field::<ForwardsUOffset<&str>>("value", Self::VT_VALUE, false)?
            .finish();
        Ok(())
    }
}

// =============================================================================
// FileMetadata
// =============================================================================

table!(FileMetadata);

impl<'a> FileMetadata<'a> {
    pub const VT_NAME: VOffsetT = slot(0);
    pub const VT_TYPE: VOffsetT = slot(1);
    pub const VT_UNCOMPRESSED_OFFSET: VOffsetT = slot(2);
    pub const VT_UNCOMPRESSED_SIZE: VOffsetT = slot(3);
    pub const VT_LINKNAME: VOffsetT = slot(4);
    pub const VT_MODE: VOffsetT = slot(5);
    pub const VT_UID: VOffsetT = slot(6);
    pub const VT_GID: VOffsetT = slot(7);
    pub const VT_UNAME: VOffsetT = slot(8);
    pub const VT_GNAME: VOffsetT = slot(9);
    pub const VT_MOD_TIME: VOffsetT = slot(10);
    pub const VT_DEVMAJOR: VOffsetT = slot(11);
    pub const VT_DEVMINOR: VOffsetT = slot(12);
    pub const VT_XATTRS: VOffsetT = slot(13);

    pub fn name(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_NAME)
    }

    pub fn type_(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_TYPE)
    }

    pub fn uncompressed_offset(&self) -> i64 {
        scalar(&self.tab, Self::VT_UNCOMPRESSED_OFFSET, 0)
    }

    pub fn uncompressed_size(&self) -> i64 {
        scalar(&self.tab, Self::VT_UNCOMPRESSED_SIZE, 0)
    }

    pub fn linkname(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_LINKNAME)
    }

    pub fn mode(&self) -> i64 {
        scalar(&self.tab, Self::VT_MODE, 0)
    }

    pub fn uid(&self) -> u32 {
        scalar(&self.tab, Self::VT_UID, 0)
    }

    pub fn gid(&self) -> u32 {
        scalar(&self.tab, Self::VT_GID, 0)
    }

    pub fn uname(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_UNAME)
    }

    pub fn gname(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_GNAME)
    }

    pub fn mod_time(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_MOD_TIME)
    }

    pub fn devmajor(&self) -> i64 {
        scalar(&self.tab, Self::VT_DEVMAJOR, 0)
    }

    pub fn devminor(&self) -> i64 {
        scalar(&self.tab, Self::VT_DEVMINOR, 0)
    }

    pub fn xattrs(&self) -> Option<Vector<'a, ForwardsUOffset<Xattr<'a>>>> {
        vector(&self.tab, Self::VT_XATTRS)
    }
}

impl Verifiable for FileMetadata<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("name", Self::VT_NAME, false)?
            .visit_field::<ForwardsUOffset<&str>>("type", Self::VT_TYPE, false)?
            .visit_field::<i64>("uncompressed_offset", Self::VT_UNCOMPRESSED_OFFSET, false)?
            .visit_field::<i64>("uncompressed_size", Self::VT_UNCOMPRESSED_SIZE, false)?
            .visit_field::<ForwardsUOffset<&str>>("linkname", Self::VT_LINKNAME, false)?
            .visit_field::<i64>("mode", Self::VT_MODE, false)?
            .visit_field::<u32>("uid", Self::VT_UID, false)?
            .visit_field::<u32>("gid", Self::VT_GID, false)?
            .visit_field::<ForwardsUOffset<&str>>("uname", Self::VT_UNAME, false)?
            .visit_field::<ForwardsUOffset<&str>>("gname", Self::VT_GNAME, false)?
            .visit_field::<ForwardsUOffset<&str>>("mod_time", Self::VT_MOD_TIME, false)?
            .visit_field::<i64>("devmajor", Self::VT_DEVMAJOR, false)?
            .visit_field::<i64>("devminor", Self::VT_DEVMINOR, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<Xattr>>>>(
                "xattrs",
                Self::VT_XATTRS,
                false,
            )?
            .finish();
        Ok(())
    }
}

// =============================================================================
// TOC
// =============================================================================

table!(Toc);

impl<'a> Toc<'a> {
    pub const VT_METADATA: VOffsetT = slot(0);

    pub fn metadata(&self) -> Option<Vector<'a, ForwardsUOffset<FileMetadata<'a>>>> {
        vector(&self.tab, Self::VT_METADATA)
    }
}

impl Verifiable for Toc<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<FileMetadata>>>>(
                "metadata",
                Self::VT_METADATA,
                false,
            )?
            .finish();
        Ok(())
    }
}

// =============================================================================
// CompressionInfo
// =============================================================================

table!(CompressionInfo);

impl<'a> CompressionInfo<'a> {
    pub const VT_COMPRESSION_ALGORITHM: VOffsetT = slot(0);
    pub const VT_MAX_SPAN_ID: VOffsetT = slot(1);
    pub const VT_SPAN_DIGESTS: VOffsetT = slot(2);
    pub const VT_CHECKPOINTS: VOffsetT = slot(3);

    /// Schema default for `compression_algorithm` (Gzip).
    pub const DEFAULT_COMPRESSION_ALGORITHM: i8 = 1;

    pub fn compression_algorithm(&self) -> i8 {
        scalar(
            &self.tab,
            Self::VT_COMPRESSION_ALGORITHM,
            Self::DEFAULT_COMPRESSION_ALGORITHM,
        )
    }

    pub fn max_span_id(&self) -> i32 {
        scalar(&self.tab, Self::VT_MAX_SPAN_ID, 0)
    }

    pub fn span_digests(&self) -> Option<Vector<'a, ForwardsUOffset<&'a str>>> {
        vector(&self.tab, Self::VT_SPAN_DIGESTS)
    }

    pub fn checkpoints(&self) -> Option<Vector<'a, u8>> {
        vector(&self.tab, Self::VT_CHECKPOINTS)
    }
}

impl Verifiable for CompressionInfo<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i8>(
                "compression_algorithm",
                Self::VT_COMPRESSION_ALGORITHM,
                false,
            )?
            .visit_field::<i32>("max_span_id", Self::VT_MAX_SPAN_ID, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<&str>>>>(
                "span_digests",
                Self::VT_SPAN_DIGESTS,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, u8>>>(
                "checkpoints",
                Self::VT_CHECKPOINTS,
                false,
            )?
            .finish();
        Ok(())
    }
}

// =============================================================================
// BlobDescriptor
// =============================================================================

table!(BlobDescriptor);

impl<'a> BlobDescriptor<'a> {
    pub const VT_MEDIA_TYPE: VOffsetT = slot(0);
    pub const VT_DIGEST: VOffsetT = slot(1);
    pub const VT_SIZE: VOffsetT = slot(2);

    pub fn media_type(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_MEDIA_TYPE)
    }

    pub fn digest(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_DIGEST)
    }

    pub fn size(&self) -> i64 {
        scalar(&self.tab, Self::VT_SIZE, 0)
    }
}

impl Verifiable for BlobDescriptor<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("media_type", Self::VT_MEDIA_TYPE, false)?
            .visit_field::<ForwardsUOffset<&str>>("digest", Self::VT_DIGEST, false)?
            .visit_field::<i64>("size", Self::VT_SIZE, false)?
            .finish();
        Ok(())
    }
}

// =============================================================================
// Index (root)
// =============================================================================

table!(Index);

impl<'a> Index<'a> {
    pub const VT_VERSION: VOffsetT = slot(0);
    pub const VT_BUILD_TOOL_IDENTIFIER: VOffsetT = slot(1);
    pub const VT_COMPRESSED_ARCHIVE_SIZE: VOffsetT = slot(2);
    pub const VT_UNCOMPRESSED_ARCHIVE_SIZE: VOffsetT = slot(3);
    pub const VT_TOC: VOffsetT = slot(4);
    pub const VT_COMPRESSION_INFO: VOffsetT = slot(5);
    pub const VT_BLOBS: VOffsetT = slot(6);

    pub fn version(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_VERSION)
    }

    pub fn build_tool_identifier(&self) -> Option<&'a str> {
        string(&self.tab, Self::VT_BUILD_TOOL_IDENTIFIER)
    }

    pub fn compressed_archive_size(&self) -> i64 {
        scalar(&self.tab, Self::VT_COMPRESSED_ARCHIVE_SIZE, 0)
    }

    pub fn uncompressed_archive_size(&self) -> i64 {
        scalar(&self.tab, Self::VT_UNCOMPRESSED_ARCHIVE_SIZE, 0)
    }

    pub fn toc(&self) -> Option<Toc<'a>> {
        child::<Toc<'a>>(&self.tab, Self::VT_TOC)
    }

    pub fn compression_info(&self) -> Option<CompressionInfo<'a>> {
        child::<CompressionInfo<'a>>(&self.tab, Self::VT_COMPRESSION_INFO)
    }

    pub fn blobs(&self) -> Option<Vector<'a, ForwardsUOffset<BlobDescriptor<'a>>>> {
        vector(&self.tab, Self::VT_BLOBS)
    }
}

impl Verifiable for Index<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("version", Self::VT_VERSION, false)?
            .visit_field::<ForwardsUOffset<&str>>(
                "build_tool_identifier",
                Self::VT_BUILD_TOOL_IDENTIFIER,
                false,
            )?
            .visit_field::<i64>(
                "compressed_archive_size",
                Self::VT_COMPRESSED_ARCHIVE_SIZE,
                false,
            )?
            .visit_field::<i64>(
                "uncompressed_archive_size",
                Self::VT_UNCOMPRESSED_ARCHIVE_SIZE,
                false,
            )?
            .visit_field::<ForwardsUOffset<Toc>>("toc", Self::VT_TOC, false)?
            .visit_field::<ForwardsUOffset<CompressionInfo>>(
                "compression_info",
                Self::VT_COMPRESSION_INFO,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<BlobDescriptor>>>>(
                "blobs",
                Self::VT_BLOBS,
                false,
            )?
            .finish();
        Ok(())
    }
}
