//! PairSync engine: continuous bidirectional directory synchronization
//!
//! A session pairs one local directory with one server endpoint and keeps
//! the two converged until stopped. Each session runs four tasks:
//!
//! - a [`fetch::FetchActor`] applying server pushes to disk,
//! - a [`serve::ServeActor`] polling the directory and pushing local
//!   changes out,
//! - a [`monitor::ServerLivenessMonitor`] and a
//!   [`monitor::DirectoryExistenceMonitor`] tearing the pair down when the
//!   endpoint or the directory goes away.
//!
//! Sessions are started through [`session::SyncService`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use pairsync_core::config::Config;
//! use pairsync_sync::session::SyncService;
//! use pairsync_sync::transport::ChannelServer;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (server, _casts) = ChannelServer::channel(64);
//! let service = SyncService::new(Config::default()).with_local_server(Arc::new(server));
//!
//! let session = service.sync("/home/me/shared").await?;
//! session.unsync(None).await;
//! # Ok(())
//! # }
//! ```

pub mod fetch;
pub mod filesystem;
pub mod monitor;
pub mod serve;
pub mod session;
pub mod transport;

pub use session::{SessionError, SessionHandle, SyncService};
pub use transport::{ClientUpdate, ConnectError, Endpoint, FilePayload, PeerNetwork, ServerCast, SyncServer};
