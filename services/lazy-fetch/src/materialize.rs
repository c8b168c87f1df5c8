//! Index and blob materialization.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use plfm_retryable_http::{RetryableClient, RetryableClientConfig};
use plfm_span_index::{Descriptor, Digest, Index};
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{self, AuthCache, CredentialFn};
use crate::error::FetchError;
use crate::fetcher::{ArtifactFetcher, Fetcher};
use crate::reference::Reference;
use crate::registry::Repository;
use crate::resolver::{RegistryResolver, DEFAULT_MAX_MANIFEST_SIZE};
use crate::store::{ContentStore, RemoteStore};

/// Settings for [`materialize_with`].
#[derive(Clone)]
pub struct MaterializeOptions {
    pub http: RetryableClientConfig,
    /// Credential lookup, per registry host.
    pub credentials: CredentialFn,
    /// Extra hosts reached over plain HTTP. Loopback hosts always are.
    pub plain_http: HashSet<String>,
    pub max_manifest_size: u64,
    /// Cancelling this aborts the materialization, including in-flight
    /// requests.
    pub cancellation: CancellationToken,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            http: RetryableClientConfig::default(),
            credentials: auth::anonymous(),
            plain_http: HashSet::new(),
            max_manifest_size: DEFAULT_MAX_MANIFEST_SIZE,
            cancellation: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for MaterializeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializeOptions")
            .field("http", &self.http)
            .field("plain_http", &self.plain_http)
            .field("max_manifest_size", &self.max_manifest_size)
            .finish_non_exhaustive()
    }
}

/// Fetches the index `index_digest` from the repository named by
/// `image_ref`, then every blob it lists, into `local`.
pub async fn materialize(
    image_ref: &str,
    index_digest: &str,
    local: Arc<dyn ContentStore>,
) -> Result<Index, FetchError> {
    materialize_with(image_ref, index_digest, local, &MaterializeOptions::default()).await
}

pub async fn materialize_with(
    image_ref: &str,
    index_digest: &str,
    local: Arc<dyn ContentStore>,
    options: &MaterializeOptions,
) -> Result<Index, FetchError> {
    let reference = Reference::parse(image_ref).map_err(|source| FetchError::ReferenceParse {
        reference: image_ref.to_string(),
        source,
    })?;

    // One auth state for every request of this materialization.
    let client = RetryableClient::new(options.http)?;
    let auth = Arc::new(AuthCache::new(Arc::clone(&options.credentials)));

    let repository = Repository::new(
        &reference,
        client.clone(),
        Arc::clone(&auth),
        &options.plain_http,
    );
    let remote = Arc::new(RemoteStore::new(repository));
    let resolver = Arc::new(
        RegistryResolver::new(client, auth, options.plain_http.clone())
            .with_max_manifest_size(options.max_manifest_size),
    );
    let fetcher = Arc::new(ArtifactFetcher::new(
        local,
        remote,
        resolver,
        reference.clone(),
    ));

    let digest = Digest::parse(index_digest).map_err(|source| FetchError::DigestParse {
        digest: index_digest.to_string(),
        source,
    })?;

    let index = fetch_index(fetcher.as_ref(), &digest, &options.cancellation).await?;

    info!(
        reference = %reference,
        digest = %digest,
        entries = index.toc.metadata.len(),
        spans = index.num_spans(),
        blobs = index.blobs.len(),
        "Index loaded"
    );

    fetch_blobs(fetcher, index.blobs.clone(), &options.cancellation).await?;

    info!(reference = %reference, digest = %digest, "Index materialized");
    Ok(index)
}

/// Fetches and decodes the index, writing it back locally when it came
/// from the remote store.
pub async fn fetch_index(
    fetcher: &dyn Fetcher,
    digest: &Digest,
    cancellation: &CancellationToken,
) -> Result<Index, FetchError> {
    let cancelled = || FetchError::Cancelled {
        digest: digest.clone(),
    };

    // Size unknown: resolves unless the index is already local.
    let descriptor = Descriptor::from_digest(digest.clone());
    let fetched = tokio::select! {
        _ = cancellation.cancelled() => return Err(cancelled()),
        fetched = fetcher.fetch(&descriptor) => fetched?,
    };

    let mut data = Vec::new();
    let mut reader = fetched.reader;
    tokio::select! {
        _ = cancellation.cancelled() => return Err(cancelled()),
        read = reader.read_to_end(&mut data) => {
            read.map_err(|source| FetchError::Io {
                digest: digest.clone(),
                source,
            })?;
        }
    }
    drop(reader);

    let index = Index::decode(&data).map_err(|source| FetchError::IndexParse {
        digest: digest.clone(),
        source,
    })?;

    if !fetched.is_local {
        let observed = Descriptor::new(digest.clone(), data.len() as u64);
        fetcher
            .store(&observed, Box::pin(Cursor::new(data)))
            .await?;
    }

    Ok(index)
}

/// Fetches every blob concurrently and stores those not already local.
///
/// After the first failure, tasks that have not yet started fail with
/// [`FetchError::Cancelled`]; tasks already in flight run to completion and
/// keep what they stored. Returns the first real failure. Cancelling
/// `cancellation` aborts every task, in flight or not.
pub async fn fetch_blobs(
    fetcher: Arc<dyn Fetcher>,
    blobs: Vec<Descriptor>,
    cancellation: &CancellationToken,
) -> Result<(), FetchError> {
    let failed = cancellation.child_token();
    let mut tasks = JoinSet::new();

    for blob in blobs {
        let fetcher = Arc::clone(&fetcher);
        let abort = cancellation.clone();
        let failed = failed.clone();

        tasks.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = abort.cancelled() => Err(FetchError::Cancelled {
                    digest: blob.digest.clone(),
                }),
                result = fetch_and_store(fetcher.as_ref(), &blob, &failed) => result,
            };

            result.map_err(|source| {
                failed.cancel();
                FetchError::Blob {
                    digest: blob.digest.clone(),
                    source: Box::new(source),
                }
            })
        });
    }

    let mut first: Option<FetchError> = None;
    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(join_err) => FetchError::TaskJoin(join_err),
        };

        failed.cancel();
        // A cancellation can be joined before the failure that caused it.
        match &first {
            None => first = Some(err),
            Some(existing) if existing.is_cancelled() && !err.is_cancelled() => first = Some(err),
            Some(_) => debug!(error = %err, "Additional blob failure"),
        }
    }

    match first {
        Some(err) => {
            warn!(error = %err, "Blob materialization failed");
            Err(err)
        }
        None => Ok(()),
    }
}

async fn fetch_and_store(
    fetcher: &dyn Fetcher,
    blob: &Descriptor,
    failed: &CancellationToken,
) -> Result<(), FetchError> {
    if failed.is_cancelled() {
        return Err(FetchError::Cancelled {
            digest: blob.digest.clone(),
        });
    }

    let fetched = fetcher.fetch(blob).await?;
    if fetched.is_local {
        debug!(digest = %blob.digest, "Blob already local");
        return Ok(());
    }

    fetcher.store(blob, fetched.reader).await
}
