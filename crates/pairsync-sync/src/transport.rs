//! Transport contract between a sync session and its server endpoint
//!
//! Defines the message vocabulary exchanged over the wire, the compressed
//! file payload, and the traits behind which the external collaborators
//! (the sync server and the peer network) live.
//!
//! All outbound traffic is fire-and-forget: a [`ServerCast`] is delivered
//! with no reply channel. Inbound traffic arrives as [`ClientUpdate`]s
//! pushed by the server into the session's FetchActor mailbox through the
//! [`ClientSink`] registered at handshake time.
//!
//! ## Flow
//!
//! ```text
//! ServeActor ──ServerCast──→ server ──ClientUpdate──→ FetchActor (other sessions)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::mpsc;
use tracing::debug;

use pairsync_core::domain::newtypes::{ActorId, FileName, PeerName};

use crate::fetch::FetchMessage;

// ============================================================================
// FilePayload
// ============================================================================

/// A whole file's content as carried on the wire: modification time plus
/// gzip-compressed bytes
///
/// Payloads are compressed before transmission and decompressed on receipt;
/// both peers only need to agree on the algorithm, not on raw content size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    /// POSIX modification time of the file at push time, whole seconds
    pub mtime_secs: i64,
    /// Gzip-compressed file content
    pub bytes: Vec<u8>,
}

impl FilePayload {
    /// Compress `content` into a payload stamped with `mtime_secs`
    ///
    /// # Errors
    /// Returns an I/O error if the encoder fails (effectively unreachable
    /// for an in-memory sink, but propagated rather than swallowed).
    pub fn compress(mtime_secs: i64, content: &[u8]) -> io::Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content)?;
        Ok(Self {
            mtime_secs,
            bytes: encoder.finish()?,
        })
    }

    /// Decompress the payload back into the original file content
    ///
    /// # Errors
    /// Returns an I/O error if the bytes are not a valid gzip stream.
    pub fn decompress(&self) -> io::Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(self.bytes.as_slice());
        let mut content = Vec::new();
        decoder.read_to_end(&mut content)?;
        Ok(content)
    }
}

// ============================================================================
// Message vocabulary
// ============================================================================

/// A change pushed by the server to a session's FetchActor
#[derive(Debug, Clone)]
pub enum ClientUpdate {
    /// The server's full catalog, sent to a newly joined/rejoined client.
    /// Each entry is applied only if the local copy is absent or strictly
    /// older than the server's mtime.
    UpdateAll(HashMap<FileName, FilePayload>),
    /// A file was created or modified elsewhere; overwrite the local copy
    Update { file: FileName, payload: FilePayload },
    /// A file was deleted elsewhere; remove the local copy if present
    Delete { file: FileName },
}

/// An asynchronous, fire-and-forget message from a session to its server
#[derive(Debug, Clone)]
pub enum ServerCast {
    /// The `sync` handshake: registers this session's actor pair and hands
    /// the server a sink for targeting this session's FetchActor
    Register {
        fetch: ActorId,
        serve: ActorId,
        client: ClientSink,
    },
    /// A file was created or modified locally. `sender` identifies the
    /// session's FetchActor so the server can avoid echoing the update
    /// back to its origin.
    Update {
        file: FileName,
        payload: FilePayload,
        sender: ActorId,
    },
    /// A file was removed locally, likewise tagged with its origin
    Delete { file: FileName, sender: ActorId },
}

// ============================================================================
// ClientSink
// ============================================================================

/// Write end of a session's inbound channel, held by the server
///
/// Replaces a mailbox-address lookup: the handshake carries the sink, and
/// the server uses it to target this client with pushes (including the
/// initial [`ClientUpdate::UpdateAll`] catalog).
#[derive(Debug, Clone)]
pub struct ClientSink {
    fetch: ActorId,
    tx: mpsc::Sender<FetchMessage>,
}

impl ClientSink {
    pub fn new(fetch: ActorId, tx: mpsc::Sender<FetchMessage>) -> Self {
        Self { fetch, tx }
    }

    /// Identity of the FetchActor behind this sink
    ///
    /// Matches the `sender` tag on the session's outbound casts, which is
    /// how a server recognises its own origin and skips the echo.
    pub fn fetch_id(&self) -> ActorId {
        self.fetch
    }

    /// Deliver an update to the session's FetchActor
    ///
    /// A send to a terminated session is simply dropped.
    pub async fn deliver(&self, update: ClientUpdate) {
        if self.tx.send(FetchMessage::Remote(update)).await.is_err() {
            debug!(fetch = %self.fetch, "dropping update for terminated session");
        }
    }
}

// ============================================================================
// Endpoint traits
// ============================================================================

/// The server endpoint a session synchronizes against
///
/// Implementations wrap whatever delivery substrate carries casts to the
/// actual server process; the engine only needs fire-and-forget delivery
/// and a liveness check.
#[async_trait]
pub trait SyncServer: Send + Sync {
    /// Deliver a cast; failures are absorbed by the implementation
    async fn cast(&self, msg: ServerCast);

    /// Whether the endpoint can still accept casts
    fn is_alive(&self) -> bool;
}

/// Resolution and liveness of named remote peers
///
/// Injected into [`SyncService`](crate::session::SyncService); the default
/// [`NoNetwork`] implementation reports networking as disabled.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Attempt to reach the named peer's sync server
    async fn connect(&self, peer: &PeerName) -> Result<Arc<dyn SyncServer>, ConnectError>;

    /// Whether the named peer is currently connected
    async fn is_connected(&self, peer: &PeerName) -> bool;
}

/// Why a connection attempt to a remote peer failed
///
/// The two variants are deliberately distinguishable: a node with
/// networking disabled is a local configuration problem, an absent peer
/// is a remote one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// This node has no networking enabled
    #[error("networking is disabled on this node")]
    NetworkingDisabled,

    /// The named peer is not reachable
    #[error("peer not found: {0}")]
    PeerNotFound(PeerName),
}

// ============================================================================
// Endpoint
// ============================================================================

/// A resolved endpoint, bound at session start and immutable thereafter
#[derive(Clone)]
pub enum Endpoint {
    /// A same-machine server reached through its handle
    Local(Arc<dyn SyncServer>),
    /// A named server on a connected peer
    Remote {
        network: Arc<dyn PeerNetwork>,
        peer: PeerName,
    },
}

impl Endpoint {
    /// Liveness predicate used by the server monitor
    pub async fn reachable(&self) -> bool {
        match self {
            Endpoint::Local(server) => server.is_alive(),
            Endpoint::Remote { network, peer } => network.is_connected(peer).await,
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local(_) => write!(f, "Endpoint::Local"),
            Endpoint::Remote { peer, .. } => write!(f, "Endpoint::Remote({peer})"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local(_) => write!(f, "local server"),
            Endpoint::Remote { peer, .. } => write!(f, "peer {peer}"),
        }
    }
}

// ============================================================================
// ChannelServer
// ============================================================================

/// An mpsc-backed [`SyncServer`] for a co-located server process
///
/// Liveness is the channel itself: once the server drops its receiver the
/// handle reports dead and the session monitor tears the session down.
#[derive(Debug, Clone)]
pub struct ChannelServer {
    tx: mpsc::Sender<ServerCast>,
}

impl ChannelServer {
    pub fn new(tx: mpsc::Sender<ServerCast>) -> Self {
        Self { tx }
    }

    /// Convenience constructor returning the handle and the server-side
    /// receiver in one step
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerCast>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl SyncServer for ChannelServer {
    async fn cast(&self, msg: ServerCast) {
        if self.tx.send(msg).await.is_err() {
            debug!("dropping cast to terminated server");
        }
    }

    fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

// ============================================================================
// NoNetwork
// ============================================================================

/// Default [`PeerNetwork`] for nodes without networking
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNetwork;

#[async_trait]
impl PeerNetwork for NoNetwork {
    async fn connect(&self, _peer: &PeerName) -> Result<Arc<dyn SyncServer>, ConnectError> {
        Err(ConnectError::NetworkingDisabled)
    }

    async fn is_connected(&self, _peer: &PeerName) -> bool {
        false
    }
}

// ============================================================================
// Unit tests
// ============================================================================
