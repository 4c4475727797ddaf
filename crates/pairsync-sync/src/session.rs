//! Session orchestration
//!
//! [`SyncService`] is the entry point of the engine: it resolves a server
//! endpoint, validates the directory, spawns the session's actor pair and
//! its two monitors, performs the `Register` handshake, and hands back a
//! [`SessionHandle`] for observing and stopping the session.
//!
//! Endpoint wiring is injection-based: a co-located server is handed in
//! with [`SyncService::with_local_server`], remote peers are resolved
//! through the [`PeerNetwork`] installed with [`SyncService::with_network`]
//! (the default [`NoNetwork`](crate::transport::NoNetwork) refuses every
//! connection).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use pairsync_core::config::Config;
use pairsync_core::domain::newtypes::{ActorId, PeerName};

use crate::fetch::{FetchActor, FetchMessage};
use crate::filesystem::LocalDir;
use crate::monitor::{DirectoryExistenceMonitor, ServerLivenessMonitor};
use crate::serve::{ServeActor, ServeMessage};
use crate::transport::{ClientSink, ConnectError, Endpoint, NoNetwork, PeerNetwork, ServerCast, SyncServer};

// ============================================================================
// Errors
// ============================================================================

/// Why a session could not be started
#[derive(Debug, Error)]
pub enum SessionError {
    /// `sync` was called on a node without a co-located server
    #[error("no sync server is running on this node")]
    ServerNotRunning,

    /// `sync_to` could not reach the named peer
    #[error("failed to connect: {0}")]
    Connection(#[from] ConnectError),

    /// The path does not resolve to an existing directory
    #[error("invalid sync directory: {path}")]
    InvalidDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// SessionHandle
// ============================================================================

/// A running sync session
///
/// Dropping the handle does not stop the session; call
/// [`SessionHandle::unsync`] for an orderly shutdown, or
/// [`SessionHandle::terminated`] to wait for one initiated elsewhere
/// (a monitor trip, for instance).
pub struct SessionHandle {
    dir: PathBuf,
    fetch: ActorId,
    serve: ActorId,
    fetch_tx: mpsc::Sender<FetchMessage>,
    serve_tx: mpsc::Sender<ServeMessage>,
    fetch_task: JoinHandle<Option<String>>,
    serve_task: JoinHandle<Option<String>>,
}

impl SessionHandle {
    /// The canonical directory this session synchronizes
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Identity of the session's FetchActor
    pub fn fetch_id(&self) -> ActorId {
        self.fetch
    }

    /// Identity of the session's ServeActor
    pub fn serve_id(&self) -> ActorId {
        self.serve
    }

    /// Stop the session with the given reason (default "unsync requested")
    ///
    /// Idempotent: cancelling a session that is already down is a no-op.
    pub async fn unsync(&self, reason: Option<&str>) {
        let reason = reason.unwrap_or("unsync requested").to_string();
        info!(dir = %self.dir.display(), %reason, "stopping session");
        let _ = self
            .serve_tx
            .send(ServeMessage::Cancel(reason.clone()))
            .await;
        let _ = self.fetch_tx.send(FetchMessage::Cancel(reason)).await;
    }

    /// Whether both session actors have terminated
    pub fn is_terminated(&self) -> bool {
        self.fetch_tx.is_closed() && self.serve_tx.is_closed()
    }

    /// Wait for both actors to finish and collect their termination
    /// reasons, `(fetch, serve)`
    pub async fn terminated(self) -> (Option<String>, Option<String>) {
        let fetch_reason = self.fetch_task.await.ok().flatten();
        let serve_reason = self.serve_task.await.ok().flatten();
        (fetch_reason, serve_reason)
    }
}

// ============================================================================
// SyncService
// ============================================================================

/// Builds and starts sync sessions
pub struct SyncService {
    config: Config,
    local_server: Option<Arc<dyn SyncServer>>,
    network: Arc<dyn PeerNetwork>,
}

impl SyncService {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            local_server: None,
            network: Arc::new(NoNetwork),
        }
    }

    /// Install the handle of a server running on this node
    pub fn with_local_server(mut self, server: Arc<dyn SyncServer>) -> Self {
        self.local_server = Some(server);
        self
    }

    /// Install the peer network used to resolve remote servers
    pub fn with_network(mut self, network: Arc<dyn PeerNetwork>) -> Self {
        self.network = network;
        self
    }

    /// Start a session against the server on this node
    ///
    /// # Errors
    /// [`SessionError::ServerNotRunning`] when no local server was
    /// installed, [`SessionError::InvalidDirectory`] when `dir` does not
    /// resolve to a directory.
    pub async fn sync(&self, dir: impl AsRef<Path>) -> Result<SessionHandle, SessionError> {
        let server = self
            .local_server
            .clone()
            .ok_or(SessionError::ServerNotRunning)?;
        let endpoint = Endpoint::Local(Arc::clone(&server));
        self.start(dir.as_ref(), endpoint, server).await
    }

    /// Start a session against a named peer's server
    ///
    /// # Errors
    /// [`SessionError::Connection`] when the peer cannot be reached,
    /// [`SessionError::InvalidDirectory`] when `dir` does not resolve to
    /// a directory.
    pub async fn sync_to(
        &self,
        dir: impl AsRef<Path>,
        peer: PeerName,
    ) -> Result<SessionHandle, SessionError> {
        // Connect first: resolution failures must surface before any
        // session machinery is spawned.
        let server = self.network.connect(&peer).await?;
        let endpoint = Endpoint::Remote {
            network: Arc::clone(&self.network),
            peer,
        };
        self.start(dir.as_ref(), endpoint, server).await
    }

    /// Spawn the actor pair and monitors and perform the handshake
    async fn start(
        &self,
        dir: &Path,
        endpoint: Endpoint,
        server: Arc<dyn SyncServer>,
    ) -> Result<SessionHandle, SessionError> {
        let dir = canonical_dir(dir).await?;
        let local = LocalDir::new(dir.clone());
        let capacity = self.config.sync.mailbox_capacity;
        let poll_interval = Duration::from_millis(self.config.sync.poll_interval_ms);
        let monitor_interval = Duration::from_millis(self.config.sync.monitor_interval_ms);

        let fetch_id = ActorId::new();
        let serve_id = ActorId::new();
        let (fetch_tx, fetch_rx) = mpsc::channel(capacity);
        let (serve_tx, serve_rx) = mpsc::channel(capacity);

        let fetch = FetchActor::new(local.clone(), fetch_rx, serve_tx.clone());
        let fetch_task = tokio::spawn(fetch.run());

        // The serve side tags every cast with the fetch id so the server
        // can recognise this session as the origin.
        let serve = ServeActor::new(
            local.clone(),
            Arc::clone(&server),
            fetch_id,
            serve_rx,
            poll_interval,
        );
        let serve_task = tokio::spawn(serve.run());

        tokio::spawn(
            ServerLivenessMonitor::new(
                endpoint,
                dir.clone(),
                monitor_interval,
                fetch_tx.clone(),
                serve_tx.clone(),
            )
            .run(),
        );
        tokio::spawn(
            DirectoryExistenceMonitor::new(
                local,
                monitor_interval,
                fetch_tx.clone(),
                serve_tx.clone(),
            )
            .run(),
        );

        server
            .cast(ServerCast::Register {
                fetch: fetch_id,
                serve: serve_id,
                client: ClientSink::new(fetch_id, fetch_tx.clone()),
            })
            .await;

        info!(dir = %dir.display(), fetch = %fetch_id, serve = %serve_id, "session started");
        Ok(SessionHandle {
            dir,
            fetch: fetch_id,
            serve: serve_id,
            fetch_tx,
            serve_tx,
            fetch_task,
            serve_task,
        })
    }
}

/// Resolve `dir` to a canonical path and require it to be a directory
async fn canonical_dir(dir: &Path) -> Result<PathBuf, SessionError> {
    let canonical = tokio::fs::canonicalize(dir)
        .await
        .map_err(|source| SessionError::InvalidDirectory {
            path: dir.to_path_buf(),
            source,
        })?;
    let metadata =
        tokio::fs::metadata(&canonical)
            .await
            .map_err(|source| SessionError::InvalidDirectory {
                path: dir.to_path_buf(),
                source,
            })?;
    if !metadata.is_dir() {
        return Err(SessionError::InvalidDirectory {
            path: dir.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        });
    }
    debug!(requested = %dir.display(), canonical = %canonical.display(), "directory resolved");
    Ok(canonical)
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::transport::ChannelServer;

    use super::*;

    fn test_config() -> Config {
        Config::default()
    }

    fn local_service() -> (SyncService, mpsc::Receiver<ServerCast>) {
        let (server, rx) = ChannelServer::channel(64);
        let service = SyncService::new(test_config()).with_local_server(Arc::new(server));
        (service, rx)
    }

    #[tokio::test]
    async fn test_sync_without_local_server_fails() {
        let service = SyncService::new(test_config());
        let dir = TempDir::new().unwrap();

        match service.sync(dir.path()).await {
            Err(SessionError::ServerNotRunning) => {}
            other => panic!("expected ServerNotRunning, got {other:?}", other = other.err()),
        }
    }

    #[tokio::test]
    async fn test_sync_to_without_network_fails() {
        let service = SyncService::new(test_config());
        let dir = TempDir::new().unwrap();
        let peer = PeerName::new("elsewhere").unwrap();

        match service.sync_to(dir.path(), peer).await {
            Err(SessionError::Connection(ConnectError::NetworkingDisabled)) => {}
            other => panic!("expected NetworkingDisabled, got {other:?}", other = other.err()),
        }
    }

    #[tokio::test]
    async fn test_sync_rejects_missing_directory() {
        let (service, _rx) = local_service();
        let dir = TempDir::new().unwrap();

        let result = service.sync(dir.path().join("nope")).await;
        match result {
            Err(SessionError::InvalidDirectory { path, .. }) => {
                assert!(path.ends_with("nope"));
            }
            other => panic!("expected InvalidDirectory, got {other:?}", other = other.err()),
        }
    }

    #[tokio::test]
    async fn test_sync_rejects_plain_file() {
        let (service, _rx) = local_service();
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"not a dir").unwrap();

        assert!(matches!(
            service.sync(&file).await,
            Err(SessionError::InvalidDirectory { .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_registers_session_with_server() {
        let (service, mut rx) = local_service();
        let dir = TempDir::new().unwrap();

        let handle = service.sync(dir.path()).await.unwrap();

        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("server channel closed")
        {
            ServerCast::Register { fetch, serve, client } => {
                assert_eq!(fetch, handle.fetch_id());
                assert_eq!(serve, handle.serve_id());
                assert_eq!(client.fetch_id(), handle.fetch_id());
            }
            other => panic!("expected register, got {other:?}"),
        }
        handle.unsync(None).await;
    }

    #[tokio::test]
    async fn test_unsync_terminates_both_actors() {
        let (service, _rx) = local_service();
        let dir = TempDir::new().unwrap();

        let handle = service.sync(dir.path()).await.unwrap();
        assert!(!handle.is_terminated());

        handle.unsync(Some("test over")).await;
        let (fetch_reason, serve_reason) = handle.terminated().await;
        assert_eq!(fetch_reason.as_deref(), Some("test over"));
        assert_eq!(serve_reason.as_deref(), Some("test over"));
    }

    #[tokio::test]
    async fn test_unsync_default_reason() {
        let (service, _rx) = local_service();
        let dir = TempDir::new().unwrap();

        let handle = service.sync(dir.path()).await.unwrap();
        handle.unsync(None).await;

        let (fetch_reason, _) = handle.terminated().await;
        assert_eq!(fetch_reason.as_deref(), Some("unsync requested"));
    }

    #[tokio::test]
    async fn test_canonical_dir_resolves_relative_segments() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();

        let twisted = dir.path().join("inner").join("..").join("inner");
        let resolved = canonical_dir(&twisted).await.unwrap();
        assert!(resolved.ends_with("inner"));
    }
}
