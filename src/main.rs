//! Process entry for the transfer agent.
//!
//! stdout is the protocol channel; diagnostics go to stderr. The store is
//! configured entirely from the environment (see `store::StoreConfig`), and
//! configuration failures are reported to the peer through the init-error
//! response rather than a crash.

use anyhow::Result;
use lfs_s3_agent::protocol::{decoder::spawn_event_reader, emitter::ResponseEmitter};
use lfs_s3_agent::session::run_session;
use lfs_s3_agent::store::{BlobStore, S3Store, StoreConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let events = spawn_event_reader(tokio::io::stdin());
    let emitter = ResponseEmitter::stdout();
    let work_dir = std::env::current_dir()?;

    run_session(
        events,
        emitter,
        Box::new(|| {
            let config = StoreConfig::from_env()?;
            let store = S3Store::connect(&config)?;
            Ok(Arc::new(store) as Arc<dyn BlobStore>)
        }),
        work_dir,
    )
    .await
}
