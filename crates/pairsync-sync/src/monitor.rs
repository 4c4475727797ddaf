//! Liveness monitors for a sync session
//!
//! Two small watchdog tasks per session, each polling one precondition of
//! the session at a fixed interval and tearing the actor pair down with a
//! descriptive reason when it fails:
//!
//! - [`ServerLivenessMonitor`] watches the server endpoint.
//! - [`DirectoryExistenceMonitor`] watches the synced directory itself.
//!
//! A monitor whose session actors have already terminated stops silently;
//! the actors carry the authoritative termination reason.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::fetch::FetchMessage;
use crate::filesystem::LocalDir;
use crate::serve::ServeMessage;
use crate::transport::Endpoint;

/// Cancellation fan-out shared by both monitors
struct SessionCancel {
    dir: PathBuf,
    fetch_tx: mpsc::Sender<FetchMessage>,
    serve_tx: mpsc::Sender<ServeMessage>,
}

impl SessionCancel {
    /// Whether either session actor has already terminated
    fn session_gone(&self) -> bool {
        self.fetch_tx.is_closed() || self.serve_tx.is_closed()
    }

    /// Deliver the reason to both actors; sends to a closed mailbox are
    /// dropped, cancellation is idempotent
    async fn cancel_both(&self, reason: String) {
        let _ = self
            .serve_tx
            .send(ServeMessage::Cancel(reason.clone()))
            .await;
        let _ = self.fetch_tx.send(FetchMessage::Cancel(reason)).await;
    }
}

// ============================================================================
// ServerLivenessMonitor
// ============================================================================

/// Tears the session down when the server endpoint becomes unreachable
pub struct ServerLivenessMonitor {
    endpoint: Endpoint,
    interval: Duration,
    cancel: SessionCancel,
}

impl ServerLivenessMonitor {
    pub fn new(
        endpoint: Endpoint,
        dir: PathBuf,
        interval: Duration,
        fetch_tx: mpsc::Sender<FetchMessage>,
        serve_tx: mpsc::Sender<ServeMessage>,
    ) -> Self {
        Self {
            endpoint,
            interval,
            cancel: SessionCancel { dir, fetch_tx, serve_tx },
        }
    }

    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            if self.cancel.session_gone() {
                debug!(dir = %self.cancel.dir.display(), "session gone, server monitor stopping");
                return;
            }
            if !self.endpoint.reachable().await {
                let reason = format!(
                    "server down: {} no longer reachable for {}",
                    self.endpoint,
                    self.cancel.dir.display()
                );
                warn!(dir = %self.cancel.dir.display(), endpoint = %self.endpoint, "server unreachable, cancelling session");
                self.cancel.cancel_both(reason).await;
                return;
            }
        }
    }
}

// ============================================================================
// DirectoryExistenceMonitor
// ============================================================================

/// Tears the session down when the synced directory disappears
pub struct DirectoryExistenceMonitor {
    dir: LocalDir,
    interval: Duration,
    cancel: SessionCancel,
}

impl DirectoryExistenceMonitor {
    pub fn new(
        dir: LocalDir,
        interval: Duration,
        fetch_tx: mpsc::Sender<FetchMessage>,
        serve_tx: mpsc::Sender<ServeMessage>,
    ) -> Self {
        let cancel = SessionCancel {
            dir: dir.root().to_path_buf(),
            fetch_tx,
            serve_tx,
        };
        Self { dir, interval, cancel }
    }

    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            if self.cancel.session_gone() {
                debug!(dir = %self.cancel.dir.display(), "session gone, directory monitor stopping");
                return;
            }
            if !self.dir.exists().await {
                let reason = format!("directory removed: {}", self.cancel.dir.display());
                warn!(dir = %self.cancel.dir.display(), "directory disappeared, cancelling session");
                self.cancel.cancel_both(reason).await;
                return;
            }
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
