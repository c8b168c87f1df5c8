//! Local-first artifact fetching.

use std::sync::Arc;

use async_trait::async_trait;
use plfm_span_index::Descriptor;
use tracing::debug;

use crate::error::FetchError;
use crate::reference::Reference;
use crate::resolver::Resolver;
use crate::store::{BoxReader, ContentStore};

/// Content returned by a [`Fetcher`].
pub struct Fetched {
    pub reader: BoxReader,
    /// True when the content came from the local store.
    pub is_local: bool,
}

impl std::fmt::Debug for Fetched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetched")
            .field("is_local", &self.is_local)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<Fetched, FetchError>;

    /// Writes content to the local store.
    async fn store(&self, descriptor: &Descriptor, reader: BoxReader) -> Result<(), FetchError>;
}

/// Fetches from the local store, falling back to the remote store.
///
/// Descriptors of unknown size (zero) are resolved against the registry
/// before the remote fetch.
pub struct ArtifactFetcher {
    local: Arc<dyn ContentStore>,
    remote: Arc<dyn ContentStore>,
    resolver: Arc<dyn Resolver>,
    reference: Reference,
}

impl ArtifactFetcher {
    pub fn new(
        local: Arc<dyn ContentStore>,
        remote: Arc<dyn ContentStore>,
        resolver: Arc<dyn Resolver>,
        reference: Reference,
    ) -> Self {
        Self {
            local,
            remote,
            resolver,
            reference,
        }
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    async fn resolve(&self, descriptor: &Descriptor) -> Result<Descriptor, FetchError> {
        let reference = format!("{}@{}", self.reference.locator(), descriptor.digest);
        debug!(reference = %reference, "Resolving descriptor of unknown size");
        self.resolver
            .resolve(&reference)
            .await
            .map_err(|source| FetchError::Resolution { reference, source })
    }
}

#[async_trait]
impl Fetcher for ArtifactFetcher {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<Fetched, FetchError> {
        match self.local.fetch(descriptor).await {
            Ok(reader) => {
                debug!(digest = %descriptor.digest, "Fetched from local store");
                return Ok(Fetched {
                    reader,
                    is_local: true,
                });
            }
            Err(e) => {
                debug!(digest = %descriptor.digest, error = %e, "Local fetch missed, trying remote");
            }
        }

        let resolved;
        let descriptor = if descriptor.is_size_known() {
            descriptor
        } else {
            resolved = self.resolve(descriptor).await?;
            &resolved
        };

        let reader = self
            .remote
            .fetch(descriptor)
            .await
            .map_err(|source| FetchError::RemoteFetch {
                digest: descriptor.digest.clone(),
                source,
            })?;

        debug!(
            digest = %descriptor.digest,
            size = descriptor.size,
            "Fetched from remote store"
        );
        Ok(Fetched {
            reader,
            is_local: false,
        })
    }

    async fn store(&self, descriptor: &Descriptor, reader: BoxReader) -> Result<(), FetchError> {
        self.local
            .push(descriptor, reader)
            .await
            .map_err(|source| FetchError::LocalStore {
                digest: descriptor.digest.clone(),
                source,
            })
    }
}
