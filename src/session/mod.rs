//! Transfer session: handshake, sequential dispatch loop, and cleanup.
//!
//! One session per process. The first event must be the `init` handshake;
//! readiness (or the failure to reach the store) is reported before any
//! transfer is accepted. Handlers run one event to completion before the
//! next is taken from the conduit, so the only shared resource is the
//! response emitter.

use crate::progress::ProgressRelay;
use crate::protocol::{emitter::ResponseEmitter, Event, InitAck, Response};
use crate::store::BlobStore;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Factory producing the session's blob store once the handshake arrives.
pub type StoreFactory = Box<dyn FnOnce() -> Result<Arc<dyn BlobStore>> + Send>;

/// One recorded download target.
///
/// Entries are appended before the transfer can fail, so cleanup always
/// finds the file. A resolved entry is the handoff artifact reported to the
/// peer and stays on disk.
struct TempEntry {
    oid: String,
    path: PathBuf,
    resolved: bool,
}

/// Per-session transfer state: the store handle, the response emitter, and
/// the temp-file ledger for download targets.
pub struct TransferAgent {
    store: Arc<dyn BlobStore>,
    emitter: ResponseEmitter,
    work_dir: PathBuf,
    temp_files: Vec<TempEntry>,
}

impl TransferAgent {
    pub fn new(store: Arc<dyn BlobStore>, emitter: ResponseEmitter, work_dir: PathBuf) -> Self {
        Self {
            store,
            emitter,
            work_dir,
            temp_files: Vec::new(),
        }
    }

    /// Handle one upload request. Per-transfer failures become a terminal
    /// `complete{oid, error}` line; the session carries on.
    async fn handle_upload(&mut self, oid: String, size: u64, path: PathBuf) -> Result<()> {
        match self.upload(&oid, size, &path).await {
            Ok(()) => self.emitter.emit(&Response::upload_complete(&oid)),
            Err(err) => self.emitter.emit(&Response::transfer_error(&oid, &err)),
        }
    }

    async fn upload(&self, oid: &str, size: u64, path: &Path) -> Result<()> {
        let file = File::open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        let relay = ProgressRelay::new(file, oid, self.emitter.clone());
        self.store.put(oid, Box::new(relay), size).await?;
        Ok(())
    }

    /// Handle one download request. The fetched content lands in a
    /// uniquely-named temp file in the working directory, reported to the
    /// peer via `complete{oid, path}`.
    async fn handle_download(&mut self, oid: String, size: u64) -> Result<()> {
        match self.download(&oid, size).await {
            Ok(path) => {
                self.mark_resolved(&path);
                self.emitter.emit(&Response::download_complete(&oid, &path))
            }
            Err(err) => self.emitter.emit(&Response::transfer_error(&oid, &err)),
        }
    }

    async fn download(&mut self, oid: &str, _size: u64) -> Result<PathBuf> {
        let temp = tempfile::Builder::new()
            .prefix(".lfs-dl-")
            .tempfile_in(&self.work_dir)
            .context("create temp file")?;
        let (file, path) = temp.keep().context("persist temp file")?;

        // Recorded before the store call so a failure below still leaves a
        // ledger entry for cleanup.
        self.temp_files.push(TempEntry {
            oid: oid.to_string(),
            path: path.clone(),
            resolved: false,
        });

        let reader = self.store.get(oid).await?;
        let mut relay = ProgressRelay::new(reader, oid, self.emitter.clone());
        let mut out = File::from_std(file);
        tokio::io::copy(&mut relay, &mut out)
            .await
            .context("write object body")?;
        out.flush().await.context("flush object body")?;

        Ok(path)
    }

    fn mark_resolved(&mut self, path: &Path) {
        if let Some(entry) = self.temp_files.iter_mut().find(|e| e.path == path) {
            entry.resolved = true;
        }
    }

    /// Best-effort removal of download targets that never completed.
    pub async fn cleanup(&mut self) {
        for entry in &self.temp_files {
            if entry.resolved {
                continue;
            }
            if let Err(err) = tokio::fs::remove_file(&entry.path).await {
                tracing::warn!(
                    oid = %entry.oid,
                    "failed to remove {}: {err}",
                    entry.path.display()
                );
            }
        }
        self.temp_files.clear();
    }
}

/// Run one protocol session to completion.
///
/// Consumes the handshake, reports readiness or failure, dispatches
/// transfer events sequentially until `terminate` or end-of-stream, then
/// cleans up unresolved download targets. Errors escaping here mean the
/// response transport itself is gone.
pub async fn run_session(
    mut events: mpsc::Receiver<Event>,
    emitter: ResponseEmitter,
    make_store: StoreFactory,
    work_dir: PathBuf,
) -> Result<()> {
    match events.recv().await {
        Some(Event::Init {
            operation, remote, ..
        }) => {
            tracing::debug!(operation, remote, "handshake received");
        }
        Some(_) => {
            let err = anyhow::anyhow!("expected init as first event");
            emitter.emit(&InitAck::failed(&err))?;
            return Ok(());
        }
        // Peer went away before the handshake; nothing to report to.
        None => return Ok(()),
    }

    let store = match make_store() {
        Ok(store) => store,
        Err(err) => {
            emitter.emit(&InitAck::failed(&err.context("store init")))?;
            return Ok(());
        }
    };
    emitter.emit(&InitAck::ok())?;

    let mut agent = TransferAgent::new(store, emitter, work_dir);

    // End-of-stream on the conduit is an implicit terminate. A handler
    // error means the response transport is gone; stop dispatching, but
    // cleanup below must still run so recorded temp files do not leak.
    let mut outcome = Ok(());
    while let Some(event) = events.recv().await {
        let result = match event {
            Event::Upload { oid, size, path } => agent.handle_upload(oid, size, path).await,
            Event::Download { oid, size } => agent.handle_download(oid, size).await,
            Event::Terminate => break,
            Event::Init { .. } => {
                tracing::warn!("ignoring repeated init event");
                Ok(())
            }
        };
        if let Err(err) = result {
            outcome = Err(err);
            break;
        }
    }

    agent.cleanup().await;
    outcome
}
