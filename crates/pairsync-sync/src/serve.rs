//! Outbound half of a sync session
//!
//! The [`ServeActor`] watches the local directory by polling and pushes
//! local changes to the server endpoint: a full catalog on startup, then
//! per-file updates and deletes as the directory diverges from the digest
//! map retained from the previous cycle.
//!
//! ## Design Decisions
//!
//! - **Emitter owns its digests**: the digest map lives inside this actor;
//!   nothing else reads or writes it.
//! - **Echo suppression**: writes and deletes applied by the session's own
//!   FetchActor arrive here as [`ServeMessage::Applied`] and
//!   [`ServeMessage::Removed`] and are folded into the digest map before
//!   diffing, so remote changes are never pushed back to the server. The
//!   mailbox is drained both before and after scanning the directory to
//!   close the race with applies landing mid-scan.
//! - **A failed scan skips the cycle**: if the directory cannot be listed,
//!   no diff is computed; treating a transient listing failure as
//!   mass-deletion would be destructive on the other side.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pairsync_core::domain::digest::{diff, DigestMap, FileDigest};
use pairsync_core::domain::newtypes::{ActorId, FileName};

use crate::filesystem::LocalDir;
use crate::transport::{FilePayload, ServerCast, SyncServer};

// ============================================================================
// Mailbox
// ============================================================================

/// Messages accepted by a [`ServeActor`]
#[derive(Debug)]
pub enum ServeMessage {
    /// Stop the actor, with a human-readable reason
    Cancel(String),
    /// The session's FetchActor wrote `file` with this digest; record it
    /// so the next cycle does not push it back to the server
    Applied { file: FileName, digest: FileDigest },
    /// The session's FetchActor removed `file`; forget it so the next
    /// cycle does not report it as a local deletion
    Removed { file: FileName },
}

/// Outcome of draining the mailbox
enum Flow {
    Continue,
    Cancelled(String),
    Closed,
}

// ============================================================================
// Actor
// ============================================================================

/// Polls the local directory and pushes changes to the server
pub struct ServeActor {
    dir: LocalDir,
    server: Arc<dyn SyncServer>,
    sender_tag: ActorId,
    rx: mpsc::Receiver<ServeMessage>,
    poll_interval: Duration,
    digests: DigestMap,
}

impl ServeActor {
    pub fn new(
        dir: LocalDir,
        server: Arc<dyn SyncServer>,
        sender_tag: ActorId,
        rx: mpsc::Receiver<ServeMessage>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            dir,
            server,
            sender_tag,
            rx,
            poll_interval,
            digests: DigestMap::new(),
        }
    }

    /// Run until cancelled or the mailbox closes
    ///
    /// Returns the cancellation reason, or `None` when every sender was
    /// dropped without an explicit cancel.
    pub async fn run(mut self) -> Option<String> {
        debug!(dir = %self.dir.root().display(), "serve actor started");

        // The first cycle runs against an empty digest map, so it pushes
        // the whole directory: the initial full sync.
        if let Some(reason) = self.poll_cycle().await {
            return self.cancelled(reason);
        }
        info!(dir = %self.dir.root().display(), files = self.digests.len(), "initial push complete");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {
                    match self.drain_mailbox(None) {
                        Flow::Cancelled(reason) => return self.cancelled(reason),
                        Flow::Closed => return self.closed(),
                        Flow::Continue => {}
                    }
                    if let Some(reason) = self.poll_cycle().await {
                        return self.cancelled(reason);
                    }
                }
                msg = self.rx.recv() => match msg {
                    Some(ServeMessage::Cancel(reason)) => return self.cancelled(reason),
                    Some(other) => self.absorb(other, None),
                    None => return self.closed(),
                }
            }
        }
    }

    fn cancelled(&self, reason: String) -> Option<String> {
        info!(dir = %self.dir.root().display(), %reason, "serve actor cancelled");
        Some(reason)
    }

    fn closed(&self) -> Option<String> {
        debug!(dir = %self.dir.root().display(), "serve actor mailbox closed");
        None
    }

    /// One poll cycle: scan the directory, diff against the retained
    /// digests, and push the differences
    ///
    /// Returns a cancellation reason if one arrived mid-cycle.
    async fn poll_cycle(&mut self) -> Option<String> {
        let mut files = match self.dir.list_files().await {
            Ok(files) => files,
            Err(err) => {
                warn!(error = %err, "skipping poll cycle, directory not listable");
                return None;
            }
        };
        let mut new_digests = self.dir.digest_map(&files).await;

        // Applies that landed while we were scanning must be reflected in
        // this cycle's view, or they would be diffed as local changes.
        match self.drain_mailbox(Some((&mut files, &mut new_digests))) {
            Flow::Cancelled(reason) => return Some(reason),
            Flow::Closed | Flow::Continue => {}
        }

        let changes = diff(&self.digests, &files, &new_digests);

        for file in &changes.changed {
            if self.push_update(file).await.is_none() {
                // Unreadable right now; drop it from the retained map so
                // the next cycle diffs it as changed again and retries.
                new_digests.remove(file);
            }
        }
        for file in &changes.deleted {
            debug!(%file, "pushing local delete");
            self.server
                .cast(ServerCast::Delete {
                    file: file.clone(),
                    sender: self.sender_tag,
                })
                .await;
        }

        self.digests = new_digests;
        None
    }

    /// Load and push one file; returns its digest, or `None` if unreadable
    async fn push_update(&self, file: &FileName) -> Option<FileDigest> {
        let (mtime_secs, content) = self.dir.load(file).await?;
        let payload = match FilePayload::compress(mtime_secs, &content) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%file, error = %err, "failed to compress file for push");
                return None;
            }
        };
        debug!(%file, bytes = content.len(), "pushing local update");
        let digest = FileDigest::of_bytes(mtime_secs, &content);
        self.server
            .cast(ServerCast::Update {
                file: file.clone(),
                payload,
                sender: self.sender_tag,
            })
            .await;
        Some(digest)
    }

    /// Drain every queued message without blocking
    ///
    /// When `cycle` carries the in-progress scan state, applies are folded
    /// into it as well as into the retained map.
    fn drain_mailbox(
        &mut self,
        mut cycle: Option<(&mut Vec<FileName>, &mut DigestMap)>,
    ) -> Flow {
        loop {
            match self.rx.try_recv() {
                Ok(ServeMessage::Cancel(reason)) => return Flow::Cancelled(reason),
                Ok(msg) => self.absorb(msg, cycle.as_mut().map(|(f, d)| (&mut **f, &mut **d))),
                Err(mpsc::error::TryRecvError::Empty) => return Flow::Continue,
                Err(mpsc::error::TryRecvError::Disconnected) => return Flow::Closed,
            }
        }
    }

    /// Fold one `Applied`/`Removed` into the retained digests and, when a
    /// scan is in progress, into its listing and digest map too
    fn absorb(&mut self, msg: ServeMessage, cycle: Option<(&mut Vec<FileName>, &mut DigestMap)>) {
        match msg {
            ServeMessage::Applied { file, digest } => {
                debug!(%file, "recording remote apply");
                if let Some((files, new_digests)) = cycle {
                    if !files.contains(&file) {
                        files.push(file.clone());
                    }
                    new_digests.insert(file.clone(), digest);
                }
                self.digests.insert(file, digest);
            }
            ServeMessage::Removed { file } => {
                debug!(%file, "recording remote delete");
                if let Some((files, new_digests)) = cycle {
                    files.retain(|f| f != &file);
                    new_digests.remove(&file);
                }
                self.digests.remove(&file);
            }
            ServeMessage::Cancel(_) => unreachable!("cancel handled by the caller"),
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::transport::ChannelServer;

    use super::*;

    const POLL: Duration = Duration::from_millis(25);

    fn name(s: &str) -> FileName {
        FileName::new(s).unwrap()
    }

    struct Harness {
        dir: TempDir,
        local: LocalDir,
        tx: mpsc::Sender<ServeMessage>,
        casts: mpsc::Receiver<ServerCast>,
        tag: ActorId,
        task: tokio::task::JoinHandle<Option<String>>,
    }

    fn spawn_actor(dir: TempDir) -> Harness {
        let local = LocalDir::new(dir.path().to_path_buf());
        let (server, casts) = ChannelServer::channel(64);
        let (tx, rx) = mpsc::channel(64);
        let tag = ActorId::new();
        let actor = ServeActor::new(local.clone(), Arc::new(server), tag, rx, POLL);
        let task = tokio::spawn(actor.run());
        Harness { dir, local, tx, casts, tag, task }
    }

    async fn recv_cast(h: &mut Harness) -> ServerCast {
        tokio::time::timeout(Duration::from_secs(2), h.casts.recv())
            .await
            .expect("timed out waiting for cast")
            .expect("server channel closed")
    }

    /// Assert no cast arrives for several poll intervals
    async fn assert_quiet(h: &mut Harness) {
        match tokio::time::timeout(POLL * 6, h.casts.recv()).await {
            Err(_) => {}
            Ok(Some(cast)) => panic!("unexpected cast: {cast:?}"),
            Ok(None) => panic!("server channel closed"),
        }
    }

    #[tokio::test]
    async fn test_initial_push_sends_whole_directory_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bee").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"ay").unwrap();
        let mut h = spawn_actor(dir);

        let first = recv_cast(&mut h).await;
        let second = recv_cast(&mut h).await;
        match (first, second) {
            (
                ServerCast::Update { file: f1, payload: p1, sender: s1 },
                ServerCast::Update { file: f2, payload: p2, sender: s2 },
            ) => {
                assert_eq!(f1, name("a.txt"));
                assert_eq!(p1.decompress().unwrap(), b"ay");
                assert_eq!(f2, name("b.txt"));
                assert_eq!(p2.decompress().unwrap(), b"bee");
                assert_eq!(s1, h.tag);
                assert_eq!(s2, h.tag);
            }
            other => panic!("expected two updates, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_created_file_is_pushed() {
        let mut h = spawn_actor(TempDir::new().unwrap());

        std::fs::write(h.dir.path().join("new.txt"), b"fresh").unwrap();

        match recv_cast(&mut h).await {
            ServerCast::Update { file, payload, .. } => {
                assert_eq!(file, name("new.txt"));
                assert_eq!(payload.decompress().unwrap(), b"fresh");
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_modified_file_is_pushed_again() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"v1").unwrap();
        let mut h = spawn_actor(dir);
        recv_cast(&mut h).await; // initial push

        std::fs::write(h.dir.path().join("a.txt"), b"v2").unwrap();

        match recv_cast(&mut h).await {
            ServerCast::Update { file, payload, .. } => {
                assert_eq!(file, name("a.txt"));
                assert_eq!(payload.decompress().unwrap(), b"v2");
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deleted_file_is_cast_as_delete() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bye.txt"), b"bye").unwrap();
        let mut h = spawn_actor(dir);
        recv_cast(&mut h).await; // initial push

        std::fs::remove_file(h.dir.path().join("bye.txt")).unwrap();

        match recv_cast(&mut h).await {
            ServerCast::Delete { file, sender } => {
                assert_eq!(file, name("bye.txt"));
                assert_eq!(sender, h.tag);
            }
            other => panic!("expected delete, got {other:?}"),
        }

        // One disappearance, one delete: later cycles must not repeat it.
        assert_quiet(&mut h).await;
    }

    #[tokio::test]
    async fn test_unchanged_directory_stays_quiet() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"stable").unwrap();
        let mut h = spawn_actor(dir);
        recv_cast(&mut h).await; // initial push

        assert_quiet(&mut h).await;
    }

    #[tokio::test]
    async fn test_applied_file_is_not_echoed_back() {
        let mut h = spawn_actor(TempDir::new().unwrap());

        // Mirror what the FetchActor does: write, digest as written, notify.
        h.local.write(&name("remote.txt"), b"from elsewhere").await.unwrap();
        let digest = h.local.digest(&name("remote.txt")).await.unwrap();
        h.tx
            .send(ServeMessage::Applied { file: name("remote.txt"), digest })
            .await
            .unwrap();

        assert_quiet(&mut h).await;
    }

    #[tokio::test]
    async fn test_removed_file_is_not_echoed_as_delete() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"short lived").unwrap();
        let mut h = spawn_actor(dir);
        recv_cast(&mut h).await; // initial push

        h.tx
            .send(ServeMessage::Removed { file: name("a.txt") })
            .await
            .unwrap();
        std::fs::remove_file(h.dir.path().join("a.txt")).unwrap();

        assert_quiet(&mut h).await;
    }

    #[tokio::test]
    async fn test_unlistable_directory_does_not_mass_delete() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"precious").unwrap();
        let mut h = spawn_actor(dir);
        recv_cast(&mut h).await; // initial push

        std::fs::remove_dir_all(h.dir.path()).unwrap();

        assert_quiet(&mut h).await;
    }

    #[tokio::test]
    async fn test_cancel_returns_reason() {
        let h = spawn_actor(TempDir::new().unwrap());

        h.tx
            .send(ServeMessage::Cancel("directory removed".into()))
            .await
            .unwrap();
        assert_eq!(h.task.await.unwrap(), Some("directory removed".to_string()));
    }

    #[tokio::test]
    async fn test_closed_mailbox_stops_actor_without_reason() {
        let h = spawn_actor(TempDir::new().unwrap());
        drop(h.tx);
        assert_eq!(h.task.await.unwrap(), None);
    }
}
