//! Image reference parsing.
//!
//! A reference is `<host>[:port]/<repository>[:tag][@digest]`. The host is
//! mandatory: a reference must address a specific registry, so there is no
//! implicit Docker Hub fallback.

use std::fmt;
use std::str::FromStr;

use plfm_span_index::Digest;

use crate::error::ReferenceError;

const MAX_TAG_LEN: usize = 128;

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    host: String,
    repository: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl Reference {
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        if s.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                let digest =
                    Digest::parse(digest).map_err(|source| ReferenceError::InvalidDigest {
                        reference: s.to_string(),
                        source,
                    })?;
                (name, Some(digest))
            }
            None => (s, None),
        };

        // A ':' followed by a '/' is a port, not a tag.
        let (name, tag) = match name.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, Some(tag)),
            _ => (name, None),
        };

        let (host, repository) = name
            .split_once('/')
            .ok_or_else(|| ReferenceError::MissingHost(s.to_string()))?;
        if !is_host(host) {
            return Err(ReferenceError::MissingHost(s.to_string()));
        }
        if !is_repository(repository) {
            return Err(ReferenceError::InvalidRepository(repository.to_string()));
        }
        if let Some(tag) = tag {
            if !is_tag(tag) {
                return Err(ReferenceError::InvalidTag(tag.to_string()));
            }
        }

        Ok(Self {
            host: host.to_string(),
            repository: repository.to_string(),
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// Registry host, including the port when one was given.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host name without the port.
    pub fn hostname(&self) -> &str {
        if let Some(rest) = self.host.strip_prefix('[') {
            return rest.split_once(']').map_or(rest, |(ip, _)| ip);
        }
        self.host
            .rsplit_once(':')
            .map_or(self.host.as_str(), |(name, _)| name)
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// `<host>/<repository>`.
    pub fn locator(&self) -> String {
        format!("{}/{}", self.host, self.repository)
    }

    /// The object a registry request addresses: the digest when present,
    /// otherwise the tag, otherwise `latest`.
    pub fn object(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.to_string(),
            (None, Some(tag)) => tag.clone(),
            (None, None) => "latest".to_string(),
        }
    }

    /// The same repository, pinned to `digest`.
    pub fn with_digest(&self, digest: &Digest) -> Self {
        Self {
            host: self.host.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.clone()),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_host(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    if !(host.contains('.') || host.contains(':') || host == "localhost") {
        return false;
    }
    host.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}

fn is_repository(repository: &str) -> bool {
    !repository.is_empty() && repository.split('/').all(is_path_component)
}

fn is_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    alnum(first)
        && alnum(last)
        && bytes
            .iter()
            .all(|b| alnum(b) || matches!(b, b'.' | b'_' | b'-'))
}

fn is_tag(tag: &str) -> bool {
    let bytes = tag.as_bytes();
    let Some(first) = bytes.first() else {
        return false;
    };
    let word = |b: &u8| b.is_ascii_alphanumeric() || *b == b'_';
    bytes.len() <= MAX_TAG_LEN
        && word(first)
        && bytes.iter().all(|b| word(b) || matches!(b, b'.' | b'-'))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const DIGEST: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_parse_tagged() {
        let reference = Reference::parse("registry.example.com/team/app:v1.2").unwrap();
        assert_eq!(reference.host(), "registry.example.com");
        assert_eq!(reference.repository(), "team/app");
        assert_eq!(reference.tag(), Some("v1.2"));
        assert_eq!(reference.digest(), None);
        assert_eq!(reference.locator(), "registry.example.com/team/app");
        assert_eq!(reference.object(), "v1.2");
    }

    #[test]
    fn test_parse_port_without_tag() {
        let reference = Reference::parse("localhost:5000/app").unwrap();
        assert_eq!(reference.host(), "localhost:5000");
        assert_eq!(reference.hostname(), "localhost");
        assert_eq!(reference.tag(), None);
        assert_eq!(reference.object(), "latest");
    }

    #[test]
    fn test_parse_digest() {
        let reference = Reference::parse(&format!("127.0.0.1:5000/repo@{DIGEST}")).unwrap();
        assert_eq!(reference.host(), "127.0.0.1:5000");
        assert_eq!(reference.hostname(), "127.0.0.1");
        assert_eq!(reference.digest().unwrap().to_string(), DIGEST);
        assert_eq!(reference.object(), DIGEST);
    }

    #[test]
    fn test_ipv6_hostname() {
        let reference = Reference::parse("[::1]:5000/repo:latest").unwrap();
        assert_eq!(reference.host(), "[::1]:5000");
        assert_eq!(reference.hostname(), "::1");
    }

    #[test]
    fn test_with_digest_drops_tag() {
        let digest = Digest::parse(DIGEST).unwrap();
        let reference = Reference::parse("ghcr.io/org/app:latest")
            .unwrap()
            .with_digest(&digest);
        assert_eq!(reference.to_string(), format!("ghcr.io/org/app@{DIGEST}"));
        assert_eq!(reference.locator(), "ghcr.io/org/app");
    }

    #[test]
    fn test_display_round_trips() {
        for s in [
            "ghcr.io/org/app",
            "ghcr.io/org/app:1.0",
            "localhost:5000/a/b/c:x",
        ] {
            assert_eq!(Reference::parse(s).unwrap().to_string(), s);
        }
    }

    #[rstest]
    #[case("")]
    #[case("alpine")]
    #[case("alpine:latest")]
    #[case("library/alpine")]
    #[case("ghcr.io/")]
    #[case("ghcr.io/Org/app")]
    #[case("ghcr.io/org//app")]
    #[case("ghcr.io/org/app:-bad")]
    #[case("ghcr.io/org/app@sha256:xyz")]
    fn test_rejects_invalid(#[case] input: &str) {
        assert!(Reference::parse(input).is_err(), "{input:?} should be rejected");
    }

    #[test]
    fn test_missing_host_error() {
        assert_eq!(
            Reference::parse("library/alpine"),
            Err(ReferenceError::MissingHost("library/alpine".to_string()))
        );
    }
}
