//! Registry authentication.
//!
//! Credentials come from a per-host callback returning `(username, secret)`.
//! The shape of the pair decides how the registry is authenticated:
//!
//! - both empty: anonymous
//! - empty username, non-empty secret: the secret is a refresh (identity)
//!   token, exchanged for an access token with an OAuth2 `refresh_token` grant
//! - otherwise: username and password, used for HTTP Basic or a token GET
//!
//! [`AuthCache`] remembers the `Authorization` header that last worked for
//! each host so later requests skip the challenge round trip.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use plfm_retryable_http::RetryableClient;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::RegistryError;

/// Error type returned by credential callbacks.
pub type CredentialError = Box<dyn std::error::Error + Send + Sync>;

/// Looks up `(username, secret)` for a registry host (`host[:port]`).
pub type CredentialFn = Arc<dyn Fn(&str) -> Result<(String, String), CredentialError> + Send + Sync>;

/// OAuth2 client id presented when exchanging refresh tokens.
const CLIENT_ID: &str = "plfm-lazy-fetch";

/// A credential in the shape the registry should see it.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Anonymous,
    Basic { username: String, password: String },
    RefreshToken(String),
}

impl Credential {
    pub fn from_pair(username: String, secret: String) -> Self {
        match (username.is_empty(), secret.is_empty()) {
            (true, true) => Credential::Anonymous,
            (true, false) => Credential::RefreshToken(secret),
            _ => Credential::Basic {
                username,
                password: secret,
            },
        }
    }

    fn basic_header(username: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Anonymous => f.write_str("Anonymous"),
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Credential::RefreshToken(_) => f.write_str("RefreshToken([REDACTED])"),
        }
    }
}

/// A callback that never returns credentials.
pub fn anonymous() -> CredentialFn {
    Arc::new(|_: &str| -> Result<(String, String), CredentialError> {
        Ok((String::new(), String::new()))
    })
}

// =============================================================================
// Docker client config
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    identitytoken: Option<String>,
}

/// Credentials read from a Docker client `config.json`.
#[derive(Debug, Default)]
pub struct DockerConfig {
    auths: HashMap<String, DockerAuthEntry>,
}

impl DockerConfig {
    /// Loads a config file. A missing file yields an empty config.
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No docker config, using anonymous access");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, CredentialError> {
        let file: DockerConfigFile = serde_json::from_slice(raw)?;
        Ok(Self { auths: file.auths })
    }

    /// `(username, secret)` for `host`, empty when the host is unknown.
    pub fn credentials(&self, host: &str) -> Result<(String, String), CredentialError> {
        let Some(entry) = self.entry(host) else {
            return Ok((String::new(), String::new()));
        };

        if let Some(token) = entry.identitytoken.as_deref().filter(|t| !t.is_empty()) {
            return Ok((String::new(), token.to_string()));
        }

        if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
            let decoded = String::from_utf8(STANDARD.decode(auth)?)?;
            let (username, password) = decoded
                .split_once(':')
                .ok_or_else(|| format!("malformed auth entry for {host}"))?;
            return Ok((username.to_string(), password.to_string()));
        }

        Ok((
            entry.username.clone().unwrap_or_default(),
            entry.password.clone().unwrap_or_default(),
        ))
    }

    fn entry(&self, host: &str) -> Option<&DockerAuthEntry> {
        let candidates = [
            host.to_string(),
            format!("https://{host}"),
            format!("http://{host}"),
            format!("https://{host}/v1/"),
            format!("https://{host}/v2/"),
        ];
        candidates.iter().find_map(|key| self.auths.get(key))
    }
}

/// A credential callback backed by the Docker config at `path`.
///
/// The file is read once; an unreadable file logs a warning and falls back
/// to anonymous access.
pub fn docker_credentials(path: PathBuf) -> CredentialFn {
    let config = match DockerConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable docker config");
            DockerConfig::default()
        }
    };
    Arc::new(move |host: &str| config.credentials(host))
}

// =============================================================================
// Challenges
// =============================================================================

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic,
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    /// Parses a header value. Unknown schemes yield `None`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut params = parse_params(rest);
        Some(Challenge::Bearer {
            realm: params.remove("realm")?,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }
}

/// Parses `key="value", key=value` pairs. Quoted values may contain commas.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => value.extend(chars.next()),
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                value.push(c);
            }
        }

        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    params
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

// =============================================================================
// Auth cache
// =============================================================================

/// In-memory authentication state, shared by every client of one
/// materialization.
pub struct AuthCache {
    credentials: CredentialFn,
    headers: RwLock<HashMap<String, String>>,
}

impl AuthCache {
    pub fn new(credentials: CredentialFn) -> Self {
        Self {
            credentials,
            headers: RwLock::new(HashMap::new()),
        }
    }

    /// The cached `Authorization` header for `host`, if any.
    pub async fn authorization(&self, host: &str) -> Option<String> {
        self.headers.read().await.get(host).cloned()
    }

    pub fn credential(&self, host: &str) -> Result<Credential, RegistryError> {
        let (username, secret) =
            (self.credentials)(host).map_err(|e| RegistryError::Credentials {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Credential::from_pair(username, secret))
    }

    /// Answers a challenge for `host` and caches the resulting header.
    ///
    /// `default_scope` is used when a bearer challenge does not name one.
    /// Returns `None` when there is no way to satisfy the challenge.
    pub async fn authenticate(
        &self,
        client: &RetryableClient,
        host: &str,
        challenge: &Challenge,
        default_scope: &str,
    ) -> Result<Option<String>, RegistryError> {
        let credential = self.credential(host)?;

        let header = match challenge {
            Challenge::Basic => match &credential {
                Credential::Basic { username, password } => {
                    Credential::basic_header(username, password)
                }
                _ => return Ok(None),
            },
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let scope = scope.as_deref().unwrap_or(default_scope);
                let token =
                    fetch_token(client, realm, service.as_deref(), scope, &credential).await?;
                format!("Bearer {token}")
            }
        };

        debug!(host = %host, credential = ?credential, "Registry authentication refreshed");
        self.headers
            .write()
            .await
            .insert(host.to_string(), header.clone());
        Ok(Some(header))
    }
}

impl std::fmt::Debug for AuthCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCache").finish_non_exhaustive()
    }
}

async fn fetch_token(
    client: &RetryableClient,
    realm: &str,
    service: Option<&str>,
    scope: &str,
    credential: &Credential,
) -> Result<String, RegistryError> {
    let request = match credential {
        Credential::RefreshToken(refresh_token) => {
            let mut form = vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", CLIENT_ID),
                ("scope", scope),
            ];
            if let Some(service) = service {
                form.push(("service", service));
            }
            client.request(reqwest::Method::POST, realm).form(&form)
        }
        Credential::Basic { username, password } => client
            .get(realm)
            .query(&token_query(service, scope))
            .basic_auth(username, Some(password)),
        Credential::Anonymous => client.get(realm).query(&token_query(service, scope)),
    };

    let response = client.send(request).await?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(RegistryError::Auth {
            realm: realm.to_string(),
            reason: format!("token endpoint returned {status}"),
        });
    }

    let body = response.bytes().await.map_err(RegistryError::Body)?;
    let token: TokenResponse = serde_json::from_slice(&body)?;
    token
        .access_token
        .or(token.token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RegistryError::Auth {
            realm: realm.to_string(),
            reason: "token endpoint returned no token".to_string(),
        })
}

fn token_query<'a>(service: Option<&'a str>, scope: &'a str) -> Vec<(&'static str, &'a str)> {
    let mut query = vec![("scope", scope)];
    if let Some(service) = service {
        query.push(("service", service));
    }
    query
}
