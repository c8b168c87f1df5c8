//! # plfm-lazy-fetch
//!
//! Artifact retrieval for lazily loaded container images. Given an image
//! reference and the digest of a span index, [`materialize`] makes the index
//! and every blob it references available in a local content store:
//!
//! 1. The index is looked up locally, then fetched from the registry
//!    (resolving its size first, since only the digest is known).
//! 2. A remotely fetched index is decoded and written back locally.
//! 3. Every blob listed in the index is fetched and stored concurrently.
//!    The first failure is reported; blobs already stored stay stored.
//!
//! All registry traffic goes through `plfm-retryable-http`, so transient
//! registry failures are retried below this crate, never within it.

pub mod auth;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod materialize;
pub mod reference;
pub mod registry;
pub mod resolver;
pub mod store;

pub use auth::{Credential, CredentialFn};
pub use config::Config;
pub use error::{FetchError, ReferenceError, RegistryError, StoreError};
pub use fetcher::{ArtifactFetcher, Fetched, Fetcher};
pub use materialize::{fetch_blobs, fetch_index, materialize, materialize_with, MaterializeOptions};
pub use reference::Reference;
pub use resolver::{RegistryResolver, Resolver};
pub use store::{BoxReader, ContentStore, LocalStore, MemoryStore, RemoteStore};
