//! # plfm-span-index
//!
//! The span index is the root artifact that makes lazy loading of a container
//! layer possible. It carries:
//!
//! - the layer's table of contents, in archive order
//! - span-based compression metadata: one digest per span of the compressed
//!   stream plus the decompressor checkpoints needed to resume at each span
//!   boundary
//! - the descriptors of every blob the index references
//!
//! ## Wire format
//!
//! The index is a FlatBuffers buffer with `Index` as its root table. Slot
//! order is fixed (see [`fbs`]) and new fields are only ever appended, so
//! older readers keep working against newer buffers.
//!
//! ```ignore
//! let index = Index::decode(&bytes)?;
//! for entry in &index.toc.metadata {
//!     println!("{} {}", entry.entry_type, entry.name);
//! }
//! ```

mod codec;
mod digest;
mod error;
pub mod fbs;
mod model;

pub use digest::{Algorithm, Descriptor, Digest, Verifier};
pub use error::{DigestError, IndexError};
pub use model::{
    CompressionAlgorithm, CompressionInfo, EntryType, FileMetadata, FormatVersion, Index, Toc,
    Xattr,
};
