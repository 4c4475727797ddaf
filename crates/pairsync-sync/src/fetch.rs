//! Inbound half of a sync session
//!
//! The [`FetchActor`] receives [`ClientUpdate`]s pushed by the paired
//! server and applies them to the local directory. Every applied write
//! and delete is reported to the session's serve side so the next poll
//! cycle does not echo it back to the server.
//!
//! ## Design Decisions
//!
//! - **Live pushes overwrite, catalogs defer**: a targeted `Update` always
//!   replaces the local copy, but an `UpdateAll` catalog entry only lands
//!   when the local copy is absent or strictly older than its mtime.
//! - **Transient failures are non-fatal**: a failed write, delete, or
//!   decompress is logged at warn level and the actor keeps running;
//!   the server re-pushes on its next cycle.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pairsync_core::domain::newtypes::FileName;

use crate::filesystem::LocalDir;
use crate::serve::ServeMessage;
use crate::transport::{ClientUpdate, FilePayload};

// ============================================================================
// Mailbox
// ============================================================================

/// Messages accepted by a [`FetchActor`]
#[derive(Debug)]
pub enum FetchMessage {
    /// An update pushed by the paired server
    Remote(ClientUpdate),
    /// Stop the actor, with a human-readable reason
    Cancel(String),
}

// ============================================================================
// Actor
// ============================================================================

/// Applies server pushes to the local directory
pub struct FetchActor {
    dir: LocalDir,
    rx: mpsc::Receiver<FetchMessage>,
    serve_tx: mpsc::Sender<ServeMessage>,
}

impl FetchActor {
    pub fn new(
        dir: LocalDir,
        rx: mpsc::Receiver<FetchMessage>,
        serve_tx: mpsc::Sender<ServeMessage>,
    ) -> Self {
        Self { dir, rx, serve_tx }
    }

    /// Run until cancelled or the mailbox closes
    ///
    /// Returns the cancellation reason, or `None` when every sender was
    /// dropped without an explicit cancel.
    pub async fn run(mut self) -> Option<String> {
        debug!(dir = %self.dir.root().display(), "fetch actor started");
        while let Some(msg) = self.rx.recv().await {
            match msg {
                FetchMessage::Remote(update) => self.apply(update).await,
                FetchMessage::Cancel(reason) => {
                    info!(dir = %self.dir.root().display(), %reason, "fetch actor cancelled");
                    return Some(reason);
                }
            }
        }
        debug!(dir = %self.dir.root().display(), "fetch actor mailbox closed");
        None
    }

    async fn apply(&mut self, update: ClientUpdate) {
        match update {
            ClientUpdate::Update { file, payload } => {
                self.apply_update(&file, &payload, false).await;
            }
            ClientUpdate::UpdateAll(files) => {
                // Catalog entries are a snapshot, not live pushes; a local
                // copy that is as new or newer wins.
                for (file, payload) in files {
                    self.apply_update(&file, &payload, true).await;
                }
            }
            ClientUpdate::Delete { file } => {
                self.apply_delete(&file).await;
            }
        }
    }

    /// Write one pushed file, skipping catalog entries older than the
    /// local copy
    async fn apply_update(&mut self, file: &FileName, payload: &FilePayload, skip_stale: bool) {
        if skip_stale {
            if let Some(local_mtime) = self.dir.mtime_secs(file).await {
                if local_mtime >= payload.mtime_secs {
                    debug!(%file, local_mtime, remote_mtime = payload.mtime_secs, "keeping newer local copy");
                    return;
                }
            }
        }

        let content = match payload.decompress() {
            Ok(content) => content,
            Err(err) => {
                warn!(%file, error = %err, "failed to decompress pushed file");
                return;
            }
        };

        if let Err(err) = self.dir.write(file, &content).await {
            warn!(%file, error = %err, "failed to apply pushed file");
            return;
        }
        info!(%file, bytes = content.len(), "applied remote update");

        // The digest reported to the serve side must match what its next
        // poll cycle will compute, so re-stat the file as written.
        match self.dir.digest(file).await {
            Some(digest) => {
                let _ = self
                    .serve_tx
                    .send(ServeMessage::Applied { file: file.clone(), digest })
                    .await;
            }
            None => {
                warn!(%file, "applied file vanished before it could be digested");
            }
        }
    }

    /// Remove one file the server deleted
    async fn apply_delete(&mut self, file: &FileName) {
        match self.dir.remove(file).await {
            Ok(true) => {
                info!(%file, "applied remote delete");
                let _ = self
                    .serve_tx
                    .send(ServeMessage::Removed { file: file.clone() })
                    .await;
            }
            Ok(false) => {
                debug!(%file, "remote delete for already-absent file");
                let _ = self
                    .serve_tx
                    .send(ServeMessage::Removed { file: file.clone() })
                    .await;
            }
            Err(err) => {
                warn!(%file, error = %err, "failed to apply remote delete");
            }
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
