use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use plfm_span_index::{Descriptor, Digest};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use super::{BoxReader, ContentStore, VerifyingReader};
use crate::error::StoreError;

/// In-process content store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<Digest, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` without verification and returns its sha256 descriptor.
    pub async fn insert(&self, data: impl Into<Bytes>) -> Descriptor {
        let data = data.into();
        let descriptor = Descriptor::for_bytes(&data);
        self.blobs
            .write()
            .await
            .insert(descriptor.digest.clone(), data);
        descriptor
    }

    pub async fn get(&self, digest: &Digest) -> Option<Bytes> {
        self.blobs.read().await.get(digest).cloned()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<BoxReader, StoreError> {
        let data = self
            .get(&descriptor.digest)
            .await
            .ok_or_else(|| StoreError::NotFound(descriptor.digest.clone()))?;
        Ok(Box::pin(VerifyingReader::new(Cursor::new(data), descriptor)))
    }

    async fn push(&self, descriptor: &Descriptor, content: BoxReader) -> Result<(), StoreError> {
        if self.blobs.read().await.contains_key(&descriptor.digest) {
            return Ok(());
        }

        let mut data = Vec::new();
        VerifyingReader::new(content, descriptor)
            .read_to_end(&mut data)
            .await?;

        self.blobs
            .write()
            .await
            .entry(descriptor.digest.clone())
            .or_insert_with(|| Bytes::from(data));
        Ok(())
    }

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool, StoreError> {
        Ok(self.blobs.read().await.contains_key(&descriptor.digest))
    }
}
