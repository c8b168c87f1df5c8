//! OCI Distribution repository client.
//!
//! Thin layer over [`RetryableClient`] that builds `/v2/` URLs for one
//! repository and answers `WWW-Authenticate` challenges through the shared
//! [`AuthCache`]. Status handling is left to callers.
//!
//! Reference: https://github.com/opencontainers/distribution-spec

use std::collections::HashSet;
use std::sync::Arc;

use plfm_retryable_http::RetryableClient;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::auth::{AuthCache, Challenge};
use crate::error::RegistryError;
use crate::reference::Reference;

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_ARTIFACT_MANIFEST: &str = "application/vnd.oci.artifact.manifest.v1+json";

/// Media types served from the `manifests` endpoint.
pub const MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_MANIFEST,
    OCI_INDEX,
    DOCKER_MANIFEST,
    DOCKER_MANIFEST_LIST,
    OCI_ARTIFACT_MANIFEST,
];

pub const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Hosts always reached over plain HTTP.
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];

pub fn is_manifest_media_type(media_type: &str) -> bool {
    MANIFEST_MEDIA_TYPES.contains(&media_type)
}

/// `Accept` header value listing every manifest media type.
pub fn manifest_accept() -> String {
    MANIFEST_MEDIA_TYPES.join(", ")
}

/// Registry endpoint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Manifests,
    Blobs,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Manifests => "manifests",
            Endpoint::Blobs => "blobs",
        }
    }
}

/// Client for a single repository.
#[derive(Debug, Clone)]
pub struct Repository {
    client: RetryableClient,
    auth: Arc<AuthCache>,
    base_url: String,
    host: String,
    name: String,
}

impl Repository {
    pub fn new(
        reference: &Reference,
        client: RetryableClient,
        auth: Arc<AuthCache>,
        plain_http: &HashSet<String>,
    ) -> Self {
        let scheme = if uses_plain_http(reference, plain_http) {
            "http"
        } else {
            "https"
        };

        Self {
            client,
            auth,
            base_url: format!("{scheme}://{}", reference.host()),
            host: reference.host().to_string(),
            name: reference.repository().to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &RetryableClient {
        &self.client
    }

    /// `<base>/v2/<name>/<endpoint>/<object>`.
    pub fn url(&self, endpoint: Endpoint, object: &str) -> String {
        format!(
            "{}/v2/{}/{}/{}",
            self.base_url,
            self.name,
            endpoint.as_str(),
            object
        )
    }

    /// Resolves a `Location` header against the registry base URL.
    pub fn absolute_url(&self, location: &str) -> Result<String, RegistryError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(location.to_string());
        }
        if location.starts_with('/') {
            return Ok(format!("{}{}", self.base_url, location));
        }
        Err(RegistryError::Url(location.to_string()))
    }

    /// Sends a request, answering at most one auth challenge.
    ///
    /// `build` is called again for the authenticated retry, so it must be
    /// able to produce the request twice.
    pub async fn send<F>(&self, build: F) -> Result<Response, RegistryError>
    where
        F: Fn(&RetryableClient) -> RequestBuilder,
    {
        let cached = self.auth.authorization(&self.host).await;
        let response = self.send_with(&build, cached.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(Challenge::parse)
        else {
            return Ok(response);
        };

        debug!(host = %self.host, repository = %self.name, "Registry requested authentication");
        let scope = format!("repository:{}:pull", self.name);
        match self
            .auth
            .authenticate(&self.client, &self.host, &challenge, &scope)
            .await?
        {
            Some(header) => self.send_with(&build, Some(&header)).await,
            None => Ok(response),
        }
    }

    async fn send_with<F>(
        &self,
        build: &F,
        authorization: Option<&str>,
    ) -> Result<Response, RegistryError>
    where
        F: Fn(&RetryableClient) -> RequestBuilder,
    {
        let mut request = build(&self.client);
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }
        Ok(self.client.send(request).await?)
    }
}

fn uses_plain_http(reference: &Reference, plain_http: &HashSet<String>) -> bool {
    LOOPBACK_HOSTS.contains(&reference.hostname())
        || plain_http.contains(reference.host())
        || plain_http.contains(reference.hostname())
}

/// Maps a non-success status to an error.
pub fn status_error(method: reqwest::Method, url: &str, status: StatusCode) -> RegistryError {
    if status == StatusCode::NOT_FOUND {
        return RegistryError::NotFound {
            reference: url.to_string(),
        };
    }
    RegistryError::Status {
        method,
        url: url.to_string(),
        status,
    }
}
