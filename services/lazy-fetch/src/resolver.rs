//! Reference resolution.
//!
//! Turns `<locator>:<tag>` or `<locator>@<digest>` into a complete
//! descriptor. Only needed when a descriptor's size is unknown.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use plfm_retryable_http::RetryableClient;
use plfm_span_index::{Descriptor, Digest};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::auth::AuthCache;
use crate::error::RegistryError;
use crate::reference::Reference;
use crate::registry::{self, Endpoint, Repository, DOCKER_CONTENT_DIGEST};

/// Largest manifest resolution will read.
pub const DEFAULT_MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

/// Maps a reference string to a descriptor.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<Descriptor, RegistryError>;
}

/// Resolver that asks the registry named in the reference.
///
/// Tries `HEAD` on the manifests endpoint, then on the blobs endpoint for
/// digest references. Falls back to a bounded `GET` when the registry
/// rejects `HEAD` or does not report a length.
#[derive(Debug, Clone)]
pub struct RegistryResolver {
    client: RetryableClient,
    auth: Arc<AuthCache>,
    plain_http: HashSet<String>,
    max_manifest_size: u64,
}

impl RegistryResolver {
    pub fn new(client: RetryableClient, auth: Arc<AuthCache>, plain_http: HashSet<String>) -> Self {
        Self {
            client,
            auth,
            plain_http,
            max_manifest_size: DEFAULT_MAX_MANIFEST_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_manifest_size(mut self, limit: u64) -> Self {
        self.max_manifest_size = limit;
        self
    }

    async fn head(
        &self,
        repository: &Repository,
        endpoint: Endpoint,
        reference: &Reference,
    ) -> Result<Descriptor, RegistryError> {
        let url = repository.url(endpoint, &reference.object());
        let response = repository
            .send(|client| accept(client.head(&url), endpoint))
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::METHOD_NOT_ALLOWED => {
                return self.get(repository, endpoint, reference).await;
            }
            status => return Err(registry::status_error(Method::HEAD, &url, status)),
        }

        let headers = response.headers();
        let Some(size) = header_length(headers).filter(|size| *size > 0) else {
            debug!(url = %url, "HEAD reported no length, falling back to GET");
            return self.get(repository, endpoint, reference).await;
        };
        if endpoint == Endpoint::Manifests && size > self.max_manifest_size {
            return Err(RegistryError::TooLarge {
                reference: reference.to_string(),
                size,
                limit: self.max_manifest_size,
            });
        }

        let reported = header_digest(headers)?;
        let digest = match (reference.digest(), reported) {
            (Some(expected), Some(actual)) if *expected != actual => {
                return Err(RegistryError::DigestMismatch {
                    expected: expected.clone(),
                    actual: actual.to_string(),
                });
            }
            (Some(expected), _) => expected.clone(),
            (None, Some(actual)) => actual,
            // A tag without a reported digest needs the content to be hashed.
            (None, None) => return self.get(repository, endpoint, reference).await,
        };

        Ok(descriptor(digest, size, endpoint, headers))
    }

    async fn get(
        &self,
        repository: &Repository,
        endpoint: Endpoint,
        reference: &Reference,
    ) -> Result<Descriptor, RegistryError> {
        let url = repository.url(endpoint, &reference.object());
        let response = repository
            .send(|client| accept(client.get(&url), endpoint))
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(registry::status_error(Method::GET, &url, status));
        }

        let headers = response.headers().clone();
        let body = self.read_bounded(response, reference).await?;
        let size = body.len() as u64;

        let digest = match reference.digest() {
            Some(expected) => {
                let mut verifier = expected.verifier();
                verifier.update(&body);
                verifier.verify(size)?
            }
            None => {
                let computed = Digest::sha256(&body);
                if let Some(reported) = header_digest(&headers)? {
                    if reported != computed {
                        return Err(RegistryError::DigestMismatch {
                            expected: reported,
                            actual: computed.to_string(),
                        });
                    }
                }
                computed
            }
        };

        Ok(descriptor(digest, size, endpoint, &headers))
    }

    async fn read_bounded(
        &self,
        mut response: Response,
        reference: &Reference,
    ) -> Result<Vec<u8>, RegistryError> {
        let limit = self.max_manifest_size;
        let too_large = |size: u64| RegistryError::TooLarge {
            reference: reference.to_string(),
            size,
            limit,
        };

        if let Some(length) = response.content_length().filter(|length| *length > limit) {
            return Err(too_large(length));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(RegistryError::Body)? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > limit {
                return Err(too_large(body.len() as u64));
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl Resolver for RegistryResolver {
    async fn resolve(&self, reference: &str) -> Result<Descriptor, RegistryError> {
        let reference = Reference::parse(reference)?;
        let repository = Repository::new(
            &reference,
            self.client.clone(),
            Arc::clone(&self.auth),
            &self.plain_http,
        );

        let resolved = match self.head(&repository, Endpoint::Manifests, &reference).await {
            Err(RegistryError::NotFound { .. }) if reference.digest().is_some() => {
                self.head(&repository, Endpoint::Blobs, &reference).await
            }
            result => result,
        }?;

        debug!(
            reference = %reference,
            digest = %resolved.digest,
            size = resolved.size,
            "Reference resolved"
        );
        Ok(resolved)
    }
}

fn accept(request: RequestBuilder, endpoint: Endpoint) -> RequestBuilder {
    match endpoint {
        Endpoint::Manifests => request.header(ACCEPT, registry::manifest_accept()),
        Endpoint::Blobs => request,
    }
}

fn header_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn header_digest(headers: &HeaderMap) -> Result<Option<Digest>, RegistryError> {
    let Some(value) = headers.get(DOCKER_CONTENT_DIGEST) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| RegistryError::Url(format!("non-ASCII {DOCKER_CONTENT_DIGEST} header")))?;
    Ok(Some(Digest::parse(value.trim())?))
}

/// Only known manifest media types are recorded. Anything else is left unset
/// so the remote store can still find the content on either endpoint.
fn descriptor(digest: Digest, size: u64, endpoint: Endpoint, headers: &HeaderMap) -> Descriptor {
    let descriptor = Descriptor::new(digest, size);
    if endpoint != Endpoint::Manifests {
        return descriptor;
    }

    let media_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim())
        .filter(|v| registry::is_manifest_media_type(v));

    match media_type {
        Some(media_type) => descriptor.with_media_type(media_type),
        None => descriptor,
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;
    use crate::registry::OCI_MANIFEST;

    #[test]
    fn test_header_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(header_length(&headers), None);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1234"));
        assert_eq!(header_length(&headers), Some(1234));
    }

    #[test]
    fn test_descriptor_keeps_only_manifest_media_types() {
        let digest = Digest::sha256(b"m");
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/vnd.oci.image.manifest.v1+json; charset=utf-8"),
        );
        let resolved = descriptor(digest.clone(), 1, Endpoint::Manifests, &headers);
        assert_eq!(resolved.media_type.as_deref(), Some(OCI_MANIFEST));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        let resolved = descriptor(digest.clone(), 1, Endpoint::Manifests, &headers);
        assert_eq!(resolved.media_type, None);

        let resolved = descriptor(digest, 1, Endpoint::Blobs, &HeaderMap::new());
        assert_eq!(resolved.media_type, None);
    }

    #[test]
    fn test_invalid_reported_digest() {
        let mut headers = HeaderMap::new();
        headers.insert(DOCKER_CONTENT_DIGEST, HeaderValue::from_static("sha256:nothex"));
        assert!(header_digest(&headers).is_err());
    }
}
