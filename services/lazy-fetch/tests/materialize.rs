//! End-to-end materialization against a mock registry.

use std::sync::Arc;
use std::time::Duration;

use plfm_lazy_fetch::auth::CredentialError;
use plfm_lazy_fetch::{
    materialize_with, ContentStore, FetchError, LocalStore, MaterializeOptions, MemoryStore,
    StoreError,
};
use plfm_retryable_http::{RetryConfig, RetryableClientConfig, TimeoutConfig};
use plfm_span_index::{
    CompressionAlgorithm, CompressionInfo, Descriptor, Digest, EntryType, FileMetadata, Index,
    Toc, Xattr,
};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const REPO: &str = "team/app";

fn options() -> MaterializeOptions {
    MaterializeOptions {
        http: RetryableClientConfig {
            timeout: TimeoutConfig {
                dial_timeout: Duration::from_secs(1),
                response_header_timeout: Duration::from_secs(2),
                request_timeout: Duration::from_secs(5),
            },
            retry: RetryConfig {
                max_retries: 2,
                min_wait: Duration::from_millis(1),
                max_wait: Duration::from_millis(10),
            },
        },
        ..MaterializeOptions::default()
    }
}

fn image_ref(server: &MockServer) -> String {
    format!("{}/{REPO}:latest", server.address())
}

fn sample_index(blobs: Vec<Descriptor>) -> Index {
    Index {
        version: "1.0".to_string(),
        build_tool_identifier: "plfm-test".to_string(),
        compressed_archive_size: 4096,
        uncompressed_archive_size: 10240,
        toc: Toc {
            metadata: vec![
                FileMetadata {
                    name: "etc/".to_string(),
                    entry_type: EntryType::Directory,
                    mode: 0o755,
                    mod_time: "2024-05-01T12:00:00Z".to_string(),
                    ..Default::default()
                },
                FileMetadata {
                    name: "etc/hosts".to_string(),
                    entry_type: EntryType::Regular,
                    uncompressed_offset: 512,
                    uncompressed_size: 120,
                    mode: 0o644,
                    uname: "root".to_string(),
                    gname: "root".to_string(),
                    mod_time: "2024-05-01T12:00:00.123456789Z".to_string(),
                    xattrs: vec![Xattr::new("user.origin", "test")],
                    ..Default::default()
                },
                FileMetadata {
                    name: "bin/sh".to_string(),
                    entry_type: EntryType::Symlink,
                    linkname: "busybox".to_string(),
                    mode: 0o777,
                    ..Default::default()
                },
            ],
        },
        compression_info: CompressionInfo {
            algorithm: CompressionAlgorithm::Gzip,
            max_span_id: 2,
            span_digests: (0..3)
                .map(|i| Digest::sha256(format!("span-{i}").as_bytes()))
                .collect(),
            checkpoints: vec![0x1f, 0x8b, 0x08, 0x00],
        },
        blobs,
    }
}

/// Mounts `HEAD` and `GET` for `data` on the blobs endpoint.
async fn serve_blob(server: &MockServer, data: &[u8]) -> Descriptor {
    let descriptor = Descriptor::for_bytes(data);
    let blob_path = format!("/v2/{REPO}/blobs/{}", descriptor.digest);

    Mock::given(method("HEAD"))
        .and(path(blob_path.as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Docker-Content-Digest", descriptor.digest.to_string()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(blob_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.to_vec()))
        .mount(server)
        .await;

    descriptor
}

/// Serves three blobs and an index listing them. Returns the index and its digest.
async fn serve_image(server: &MockServer) -> (Index, Digest, Vec<(Descriptor, Vec<u8>)>) {
    let mut blobs = Vec::new();
    let contents: [&[u8]; 3] = [
        b"ztoc for layer one",
        b"ztoc for layer two",
        b"ztoc for layer three",
    ];
    for data in contents {
        let descriptor = serve_blob(server, data).await;
        blobs.push((descriptor, data.to_vec()));
    }

    let index = sample_index(blobs.iter().map(|(d, _)| d.clone()).collect());
    let encoded = index.encode();
    let index_descriptor = serve_blob(server, &encoded).await;

    (index, index_descriptor.digest, blobs)
}

async fn local_bytes(store: &dyn ContentStore, digest: &Digest) -> Vec<u8> {
    use tokio::io::AsyncReadExt;

    let mut reader = store
        .fetch(&Descriptor::from_digest(digest.clone()))
        .await
        .ok()
        .unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn materializes_index_and_blobs() {
    let server = MockServer::start().await;
    let (expected, index_digest, blobs) = serve_image(&server).await;
    let local = Arc::new(MemoryStore::new());

    let index = materialize_with(
        &image_ref(&server),
        &index_digest.to_string(),
        local.clone(),
        &options(),
    )
    .await
    .unwrap();

    assert_eq!(index, expected);
    let names: Vec<_> = index.toc.metadata.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["etc/", "etc/hosts", "bin/sh"]);
    assert_eq!(index.num_spans(), 3);
    assert_eq!(index.compression_info.span_digests.len(), 3);

    // Index plus three blobs.
    assert_eq!(local.len().await, 4);
    assert_eq!(
        local.get(&index_digest).await.unwrap().as_ref(),
        expected.encode().as_slice()
    );
    for (descriptor, data) in &blobs {
        assert_eq!(local.get(&descriptor.digest).await.unwrap().as_ref(), data.as_slice());
    }
}

#[tokio::test]
async fn second_run_is_served_locally() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let (expected, index_digest, blobs) = serve_image(&server).await;

    let first = materialize_with(
        &image_ref(&server),
        &index_digest.to_string(),
        Arc::new(LocalStore::new(dir.path())),
        &options(),
    )
    .await
    .unwrap();
    assert_eq!(first, expected);

    // A fresh store over the same directory, and a registry that knows nothing.
    let empty = MockServer::start().await;
    let store = Arc::new(LocalStore::new(dir.path()));
    let second = materialize_with(
        &image_ref(&empty),
        &index_digest.to_string(),
        store.clone(),
        &options(),
    )
    .await
    .unwrap();

    assert_eq!(second, expected);
    assert!(empty.received_requests().await.unwrap().is_empty());
    assert_eq!(
        local_bytes(store.as_ref(), &index_digest).await,
        expected.encode()
    );
    for (descriptor, data) in &blobs {
        assert_eq!(&local_bytes(store.as_ref(), &descriptor.digest).await, data);
    }
}

#[tokio::test]
async fn failed_blob_keeps_completed_ones() {
    let server = MockServer::start().await;
    let good_one = serve_blob(&server, b"first good blob").await;
    let good_two = serve_blob(&server, b"second good blob").await;

    // Same length as the real content, wrong bytes, and slow enough that
    // the good blobs finish first.
    let bad = Descriptor::for_bytes(b"the real third blob");
    Mock::given(method("GET"))
        .and(path(format!("/v2/{REPO}/blobs/{}", bad.digest).as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"not the third blob!".to_vec())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let index = sample_index(vec![good_one.clone(), bad.clone(), good_two.clone()]);
    let index_descriptor = serve_blob(&server, &index.encode()).await;
    let local = Arc::new(MemoryStore::new());

    let err = materialize_with(
        &image_ref(&server),
        &index_descriptor.digest.to_string(),
        local.clone(),
        &options(),
    )
    .await
    .unwrap_err();

    match &err {
        FetchError::Blob { digest, source } => {
            assert_eq!(digest, &bad.digest);
            assert!(matches!(
                source.as_ref(),
                FetchError::LocalStore {
                    source: StoreError::Verify(_),
                    ..
                }
            ));
        }
        other => panic!("expected a blob failure, got {other:?}"),
    }

    assert!(local.get(&index_descriptor.digest).await.is_some());
    assert!(local.get(&good_one.digest).await.is_some());
    assert!(local.get(&good_two.digest).await.is_some());
    assert!(local.get(&bad.digest).await.is_none());
}

#[tokio::test]
async fn transient_registry_errors_are_absorbed() {
    let server = MockServer::start().await;
    let (expected, index_digest, blobs) = serve_image(&server).await;

    let flaky = format!("/v2/{REPO}/blobs/{}", blobs[1].0.digest);
    Mock::given(method("GET"))
        .and(path(flaky.as_str()))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;

    let local = Arc::new(MemoryStore::new());
    let index = materialize_with(
        &image_ref(&server),
        &index_digest.to_string(),
        local.clone(),
        &options(),
    )
    .await
    .unwrap();

    assert_eq!(index, expected);
    assert_eq!(local.len().await, 4);
}

#[tokio::test]
async fn unknown_index_is_a_resolution_error() {
    let server = MockServer::start().await;
    let local = Arc::new(MemoryStore::new());

    let err = materialize_with(
        &image_ref(&server),
        &Digest::sha256(b"no such index").to_string(),
        local.clone(),
        &options(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, FetchError::Resolution { .. }), "{err:?}");
    assert!(local.is_empty().await);
}

#[tokio::test]
async fn malformed_index_is_not_stored() {
    let server = MockServer::start().await;
    let garbage = serve_blob(&server, b"definitely not a flatbuffer").await;
    let local = Arc::new(MemoryStore::new());

    let err = materialize_with(
        &image_ref(&server),
        &garbage.digest.to_string(),
        local.clone(),
        &options(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, FetchError::IndexParse { .. }), "{err:?}");
    assert!(local.is_empty().await);
}

#[tokio::test]
async fn bad_inputs_fail_before_any_request() {
    let server = MockServer::start().await;
    let local = Arc::new(MemoryStore::new());
    let digest = Digest::sha256(b"index").to_string();

    let err = materialize_with("no-registry-host", &digest, local.clone(), &options())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::ReferenceParse { .. }));

    let err = materialize_with(&image_ref(&server), "sha256:short", local.clone(), &options())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::DigestParse { .. }));

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn refresh_token_credentials_are_exchanged() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=my-refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "granted" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(path_regex("^/v2/"))
        .and(|request: &Request| !request.headers.contains_key("authorization"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            format!(
                r#"Bearer realm="{}/token",service="mock-registry",scope="repository:{REPO}:pull""#,
                server.uri()
            )
            .as_str(),
        ))
        .with_priority(1)
        .mount(&server)
        .await;

    let blob = b"ztoc behind auth";
    let blob_descriptor = Descriptor::for_bytes(blob);
    let index = sample_index(vec![blob_descriptor.clone()]);
    let encoded = index.encode();
    let index_descriptor = Descriptor::for_bytes(&encoded);

    for (descriptor, data) in [(&blob_descriptor, blob.to_vec()), (&index_descriptor, encoded)] {
        let blob_path = format!("/v2/{REPO}/blobs/{}", descriptor.digest);
        Mock::given(method("GET"))
            .and(path(blob_path.as_str()))
            .and(header("authorization", "Bearer granted"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path(blob_path.as_str()))
            .and(header("authorization", "Bearer granted"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
    }

    let options = MaterializeOptions {
        credentials: Arc::new(|_: &str| -> Result<(String, String), CredentialError> {
            Ok((String::new(), "my-refresh-token".to_string()))
        }),
        ..options()
    };
    let local = Arc::new(MemoryStore::new());

    let materialized = materialize_with(
        &image_ref(&server),
        &index_descriptor.digest.to_string(),
        local.clone(),
        &options,
    )
    .await
    .unwrap();

    assert_eq!(materialized, index);
    assert_eq!(local.len().await, 2);
}
