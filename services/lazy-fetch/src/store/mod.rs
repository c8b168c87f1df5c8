//! Content-addressable stores.
//!
//! Every store is keyed by digest. Readers handed out by [`ContentStore::fetch`]
//! verify the content as it streams: a digest or size mismatch fails the read
//! instead of surfacing as corrupt data.

mod local;
mod memory;
mod remote;
mod verify;

use std::pin::Pin;

use async_trait::async_trait;
use plfm_span_index::Descriptor;
use tokio::io::AsyncRead;

use crate::error::StoreError;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use remote::RemoteStore;
pub use verify::VerifyingReader;

/// An owned, sendable byte stream.
pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;

/// Content store addressed by digest.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Opens the content for `descriptor`.
    ///
    /// A size of zero means the size is unknown; the content is then looked
    /// up by digest alone. Returns [`StoreError::NotFound`] on a miss.
    async fn fetch(&self, descriptor: &Descriptor) -> Result<BoxReader, StoreError>;

    /// Writes `content` under `descriptor.digest`.
    ///
    /// The content is verified before it becomes visible. Pushing a digest
    /// that is already present succeeds without reading `content`.
    async fn push(&self, descriptor: &Descriptor, content: BoxReader) -> Result<(), StoreError>;

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool, StoreError>;
}
