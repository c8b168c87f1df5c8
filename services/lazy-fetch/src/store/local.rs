//! Directory-backed content store.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use plfm_span_index::{Descriptor, Digest};
use rand::Rng;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, info};

use super::{BoxReader, ContentStore, VerifyingReader};
use crate::error::StoreError;

/// Content store rooted at a directory, laid out as `<root>/<algorithm>/<hex>`.
///
/// Writes land in a temporary file next to their destination and are renamed
/// into place once verified, so a digest path only ever holds complete,
/// verified content.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the content for `digest`.
    pub fn path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(digest.algorithm().as_str())
            .join(digest.hex())
    }

    fn temp_path(&self, digest: &Digest) -> PathBuf {
        let suffix: u32 = rand::rng().random();
        self.root
            .join(digest.algorithm().as_str())
            .join(format!(".{}.{suffix:08x}.tmp", digest.hex()))
    }

    async fn write(
        &self,
        descriptor: &Descriptor,
        content: BoxReader,
        temp: &Path,
    ) -> Result<u64, StoreError> {
        let mut file = File::create(temp).await?;
        let mut verified = VerifyingReader::new(content, descriptor);
        let written = tokio::io::copy(&mut verified, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl ContentStore for LocalStore {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<BoxReader, StoreError> {
        let path = self.path(&descriptor.digest);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(descriptor.digest.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Box::pin(VerifyingReader::new(BufReader::new(file), descriptor)))
    }

    async fn push(&self, descriptor: &Descriptor, content: BoxReader) -> Result<(), StoreError> {
        let path = self.path(&descriptor.digest);
        if fs::try_exists(&path).await? {
            debug!(digest = %descriptor.digest, "Content already present");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path(&descriptor.digest);
        let written = match self.write(descriptor, content, &temp).await {
            Ok(written) => written,
            Err(e) => {
                fs::remove_file(&temp).await.ok();
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&temp, &path).await {
            fs::remove_file(&temp).await.ok();
            return Err(e.into());
        }

        info!(digest = %descriptor.digest, size = written, "Content stored");
        Ok(())
    }

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool, StoreError> {
        Ok(fs::try_exists(self.path(&descriptor.digest)).await?)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn reader(data: &'static [u8]) -> BoxReader {
        Box::pin(data)
    }

    async fn read_all(mut reader: BoxReader) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        Ok(out)
    }

    #[test]
    fn test_path_layout() {
        let store = LocalStore::new("/var/lib/test/content");
        let digest = Digest::sha256(b"hello");
        assert_eq!(
            store.path(&digest),
            PathBuf::from(format!("/var/lib/test/content/sha256/{}", digest.hex()))
        );
    }

    #[tokio::test]
    async fn test_push_then_fetch() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        let descriptor = Descriptor::for_bytes(b"checkpoint data");

        assert!(!store.exists(&descriptor).await.unwrap());
        store.push(&descriptor, reader(b"checkpoint data")).await.unwrap();
        assert!(store.exists(&descriptor).await.unwrap());

        let content = read_all(store.fetch(&descriptor).await.unwrap()).await.unwrap();
        assert_eq!(content, b"checkpoint data");

        // Lookup by digest alone.
        let by_digest = Descriptor::from_digest(descriptor.digest.clone());
        let content = read_all(store.fetch(&by_digest).await.unwrap()).await.unwrap();
        assert_eq!(content, b"checkpoint data");
    }

    #[tokio::test]
    async fn test_fetch_miss_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        let err = store
            .fetch(&Descriptor::for_bytes(b"absent"))
            .await
            .err()
            .unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_push_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        let descriptor = Descriptor::for_bytes(b"blob");

        store.push(&descriptor, reader(b"blob")).await.unwrap();
        // The second push does not read its content, so garbage is harmless.
        store.push(&descriptor, reader(b"garbage")).await.unwrap();

        let content = read_all(store.fetch(&descriptor).await.unwrap()).await.unwrap();
        assert_eq!(content, b"blob");
    }

    #[tokio::test]
    async fn test_corrupt_push_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        let descriptor = Descriptor::for_bytes(b"expected");

        let err = store.push(&descriptor, reader(b"tampered")).await.unwrap_err();
        assert!(matches!(err, StoreError::Verify(_)));
        assert!(!store.exists(&descriptor).await.unwrap());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("sha256"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_detects_on_disk_corruption() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        let descriptor = Descriptor::for_bytes(b"original");
        store.push(&descriptor, reader(b"original")).await.unwrap();

        std::fs::write(store.path(&descriptor.digest), b"modified").unwrap();

        let err = read_all(store.fetch(&descriptor).await.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Verify(_)));
    }
}
