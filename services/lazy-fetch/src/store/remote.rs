//! Registry-backed content store.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use plfm_span_index::{Descriptor, DigestError};
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Method, StatusCode};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use super::{BoxReader, ContentStore, VerifyingReader};
use crate::error::{RegistryError, StoreError};
use crate::registry::{self, Endpoint, Repository};

const OCTET_STREAM: &str = "application/octet-stream";

/// Content store backed by one registry repository.
///
/// Descriptors with a manifest media type go to the `manifests` endpoint,
/// everything else to `blobs`. A descriptor without a media type that is not
/// found as a blob is retried as a manifest.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    repository: Repository,
}

impl RemoteStore {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    async fn get(
        &self,
        endpoint: Endpoint,
        descriptor: &Descriptor,
    ) -> Result<BoxReader, StoreError> {
        let url = self
            .repository
            .url(endpoint, &descriptor.digest.to_string());
        debug!(url = %url, "Fetching remote content");

        let accept = registry::manifest_accept();
        let response = self
            .repository
            .send(|client| {
                let request = client.get(&url);
                match endpoint {
                    Endpoint::Manifests => request.header(ACCEPT, &accept),
                    Endpoint::Blobs => request,
                }
            })
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(registry::status_error(Method::GET, &url, status).into());
        }

        if let Some(length) = response.content_length() {
            if descriptor.size != 0 && length != descriptor.size {
                return Err(StoreError::Verify(DigestError::SizeMismatch {
                    digest: descriptor.digest.to_string(),
                    expected: descriptor.size,
                    actual: length,
                }));
            }
        }

        let stream = response.bytes_stream().map_err(io::Error::other);
        let body: BoxReader = Box::pin(StreamReader::new(stream));
        Ok(Box::pin(VerifyingReader::new(body, descriptor)))
    }

    async fn push_manifest(&self, descriptor: &Descriptor, body: Bytes) -> Result<(), StoreError> {
        let url = self
            .repository
            .url(Endpoint::Manifests, &descriptor.digest.to_string());
        let media_type = descriptor.media_type.as_deref().unwrap_or(OCTET_STREAM);

        let response = self
            .repository
            .send(|client| {
                client
                    .request(Method::PUT, &url)
                    .header(CONTENT_TYPE, media_type)
                    .body(body.clone())
            })
            .await?;

        expect_success(Method::PUT, &url, response.status())
    }

    async fn push_blob(&self, descriptor: &Descriptor, body: Bytes) -> Result<(), StoreError> {
        let start = self.repository.url(Endpoint::Blobs, "uploads/");
        let response = self
            .repository
            .send(|client| {
                client
                    .request(Method::POST, &start)
                    .header(CONTENT_LENGTH, 0)
            })
            .await?;
        expect_success(Method::POST, &start, response.status())?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::Url(format!("{start}: upload has no Location")))?;
        let upload = self.repository.absolute_url(location)?;
        let digest = descriptor.digest.to_string();

        let response = self
            .repository
            .send(|client| {
                client
                    .request(Method::PUT, &upload)
                    .query(&[("digest", digest.as_str())])
                    .header(CONTENT_TYPE, OCTET_STREAM)
                    .body(body.clone())
            })
            .await?;

        expect_success(Method::PUT, &upload, response.status())
    }
}

fn endpoint_for(descriptor: &Descriptor) -> Endpoint {
    match descriptor.media_type.as_deref() {
        Some(media_type) if registry::is_manifest_media_type(media_type) => Endpoint::Manifests,
        _ => Endpoint::Blobs,
    }
}

fn expect_success(method: Method, url: &str, status: StatusCode) -> Result<(), StoreError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(registry::status_error(method, url, status).into())
    }
}

#[async_trait]
impl ContentStore for RemoteStore {
    async fn fetch(&self, descriptor: &Descriptor) -> Result<BoxReader, StoreError> {
        let endpoint = endpoint_for(descriptor);
        match self.get(endpoint, descriptor).await {
            Err(e)
                if e.is_not_found()
                    && endpoint == Endpoint::Blobs
                    && descriptor.media_type.is_none() =>
            {
                self.get(Endpoint::Manifests, descriptor).await
            }
            result => result,
        }
    }

    async fn push(&self, descriptor: &Descriptor, content: BoxReader) -> Result<(), StoreError> {
        if self.exists(descriptor).await? {
            debug!(digest = %descriptor.digest, "Remote content already present");
            return Ok(());
        }

        // The transport may replay the body, so it is buffered.
        let mut data = Vec::new();
        VerifyingReader::new(content, descriptor)
            .read_to_end(&mut data)
            .await?;
        let size = data.len();
        let body = Bytes::from(data);

        match endpoint_for(descriptor) {
            Endpoint::Manifests => self.push_manifest(descriptor, body).await?,
            Endpoint::Blobs => self.push_blob(descriptor, body).await?,
        }

        info!(
            digest = %descriptor.digest,
            repository = %self.repository.name(),
            size,
            "Content pushed"
        );
        Ok(())
    }

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool, StoreError> {
        let endpoint = endpoint_for(descriptor);
        let url = self
            .repository
            .url(endpoint, &descriptor.digest.to_string());
        let accept = registry::manifest_accept();

        let response = self
            .repository
            .send(|client| {
                let request = client.head(&url);
                match endpoint {
                    Endpoint::Manifests => request.header(ACCEPT, &accept),
                    Endpoint::Blobs => request,
                }
            })
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(registry::status_error(Method::HEAD, &url, status).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OCI_MANIFEST;

    #[test]
    fn test_endpoint_routing() {
        let blob = Descriptor::for_bytes(b"x");
        assert_eq!(endpoint_for(&blob), Endpoint::Blobs);
        assert_eq!(
            endpoint_for(&blob.clone().with_media_type("application/octet-stream")),
            Endpoint::Blobs
        );
        assert_eq!(
            endpoint_for(&blob.with_media_type(OCI_MANIFEST)),
            Endpoint::Manifests
        );
    }
}
