//! Lazy fetch configuration.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use plfm_retryable_http::{
    RetryConfig, RetryableClientConfig, TimeoutConfig, DEFAULT_DIAL_TIMEOUT_MS,
    DEFAULT_MAX_RETRIES, DEFAULT_MAX_WAIT_MS, DEFAULT_MIN_WAIT_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_RESPONSE_HEADER_TIMEOUT_MS,
};

use crate::auth;
use crate::materialize::MaterializeOptions;

const DEFAULT_STORE_DIR: &str = "/var/lib/ghost/lazy/content";

/// Lazy fetch configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the local content store.
    pub store_dir: PathBuf,

    /// Transport timeouts and retry policy.
    pub http: RetryableClientConfig,

    /// Registry hosts reached over plain HTTP, besides loopback.
    pub plain_http: HashSet<String>,

    /// Docker client config used for registry credentials.
    pub docker_config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let millis = |key: &str, default: u64| -> Result<Duration> {
            let ms = var(key)
                .map(|v| v.parse::<u64>())
                .transpose()
                .with_context(|| format!("{key} must be an integer (milliseconds)."))?
                .unwrap_or(default);
            Ok(Duration::from_millis(ms))
        };

        let store_dir = var("GHOST_LAZY_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));

        let timeout = TimeoutConfig {
            dial_timeout: millis("GHOST_HTTP_DIAL_TIMEOUT_MS", DEFAULT_DIAL_TIMEOUT_MS)?,
            response_header_timeout: millis(
                "GHOST_HTTP_RESPONSE_HEADER_TIMEOUT_MS",
                DEFAULT_RESPONSE_HEADER_TIMEOUT_MS,
            )?,
            request_timeout: millis("GHOST_HTTP_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?,
        };

        let max_retries: u32 = var("GHOST_HTTP_MAX_RETRIES")
            .map(|v| v.parse())
            .transpose()
            .context("GHOST_HTTP_MAX_RETRIES must be a non-negative integer.")?
            .unwrap_or(DEFAULT_MAX_RETRIES);

        let retry = RetryConfig {
            max_retries,
            min_wait: millis("GHOST_HTTP_MIN_WAIT_MS", DEFAULT_MIN_WAIT_MS)?,
            max_wait: millis("GHOST_HTTP_MAX_WAIT_MS", DEFAULT_MAX_WAIT_MS)?,
        };
        if retry.min_wait > retry.max_wait {
            anyhow::bail!("GHOST_HTTP_MIN_WAIT_MS must not exceed GHOST_HTTP_MAX_WAIT_MS.");
        }

        let plain_http = var("GHOST_REGISTRY_PLAIN_HTTP")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let docker_config = match var("GHOST_DOCKER_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => var("HOME")
                .map(|home| PathBuf::from(home).join(".docker/config.json"))
                .context("Missing docker config path. Set GHOST_DOCKER_CONFIG or HOME.")?,
        };

        let log_level = var("GHOST_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            store_dir,
            http: RetryableClientConfig { timeout, retry },
            plain_http,
            docker_config,
            log_level,
        })
    }

    /// Materialization options backed by this configuration.
    pub fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            http: self.http,
            credentials: auth::docker_credentials(self.docker_config.clone()),
            plain_http: self.plain_http.clone(),
            ..MaterializeOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("HOME", "/home/ghost")]).unwrap();
        assert_eq!(config.store_dir, PathBuf::from(DEFAULT_STORE_DIR));
        assert_eq!(config.http, RetryableClientConfig::default());
        assert!(config.plain_http.is_empty());
        assert_eq!(
            config.docker_config,
            PathBuf::from("/home/ghost/.docker/config.json")
        );
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("GHOST_LAZY_STORE_DIR", "/tmp/content"),
            ("GHOST_HTTP_DIAL_TIMEOUT_MS", "100"),
            ("GHOST_HTTP_MAX_RETRIES", "2"),
            ("GHOST_HTTP_MIN_WAIT_MS", "5"),
            ("GHOST_HTTP_MAX_WAIT_MS", "50"),
            ("GHOST_REGISTRY_PLAIN_HTTP", "registry.local:5000, mirror.local ,"),
            ("GHOST_DOCKER_CONFIG", "/etc/ghost/docker.json"),
        ])
        .unwrap();

        assert_eq!(config.store_dir, PathBuf::from("/tmp/content"));
        assert_eq!(config.http.timeout.dial_timeout, Duration::from_millis(100));
        assert_eq!(config.http.retry.max_retries, 2);
        assert_eq!(config.http.retry.max_wait, Duration::from_millis(50));
        assert_eq!(config.plain_http.len(), 2);
        assert!(config.plain_http.contains("mirror.local"));
        assert_eq!(config.docker_config, PathBuf::from("/etc/ghost/docker.json"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load(&[("HOME", "/h"), ("GHOST_HTTP_MAX_RETRIES", "many")]).is_err());
        assert!(load(&[("HOME", "/h"), ("GHOST_HTTP_REQUEST_TIMEOUT_MS", "-1")]).is_err());
        assert!(load(&[
            ("HOME", "/h"),
            ("GHOST_HTTP_MIN_WAIT_MS", "100"),
            ("GHOST_HTTP_MAX_WAIT_MS", "10"),
        ])
        .is_err());
    }
}
