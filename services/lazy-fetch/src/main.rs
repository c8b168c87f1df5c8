//! lazy-fetch
//!
//! Materializes a span index and its blobs into the local content store.
//!
//! ```text
//! lazy-fetch registry.example.com/team/app:v1 sha256:<index digest>
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use plfm_lazy_fetch::{materialize_with, Config, LocalStore};

#[derive(Debug, Parser)]
#[command(name = "lazy-fetch", version, about)]
struct Args {
    /// Image reference, `<host>[:port]/<repository>[:tag]`.
    image_ref: String,

    /// Digest of the span index, `sha256:<hex>`.
    index_digest: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        store_dir = %config.store_dir.display(),
        image_ref = %args.image_ref,
        index_digest = %args.index_digest,
        "Starting lazy fetch"
    );

    let local = Arc::new(LocalStore::new(&config.store_dir));
    let options = config.materialize_options();

    let shutdown = options.cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            shutdown.cancel();
        }
    });

    let index = materialize_with(&args.image_ref, &args.index_digest, local, &options)
        .await
        .with_context(|| format!("failed to materialize {}", args.index_digest))?;

    info!(
        version = %index.version,
        build_tool = %index.build_tool_identifier,
        entries = index.toc.metadata.len(),
        spans = index.num_spans(),
        blobs = index.blobs.len(),
        compressed_size = index.compressed_archive_size,
        uncompressed_size = index.uncompressed_archive_size,
        "Lazy fetch complete"
    );

    Ok(())
}
