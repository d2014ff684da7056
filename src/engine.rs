//! The peer engine.
//!
//! The engine wires the piece store, the tracker client, and the peer
//! sessions together: a supervisor owns the session set and the TCP
//! listener, an announcer keeps the tracker informed, and each session runs
//! the wire protocol against one peer. Per-session failures never escape the
//! session; the engine survives degraded rather than crash.

mod announcer;
mod error;
mod session;
mod supervisor;

pub use error::EngineError;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::metainfo::{InfoHash, Metainfo};
use crate::peer::{PeerId, Transport};
use crate::storage::{PieceStore, SessionId};
use crate::tracker::TrackerClient;

use announcer::Announcer;
use session::Role;
use supervisor::Supervisor;

// State shared by the supervisor, the announcer, and every session task.
pub(crate) struct Shared {
    pub config: EngineConfig,
    pub store: Arc<PieceStore>,
    pub our_id: PeerId,
    pub info_hash: InfoHash,
    pub uploaded: AtomicU64,
    pub downloaded: AtomicU64,
    pub events_tx: mpsc::UnboundedSender<SessionEvent>,
    pub have_tx: broadcast::Sender<u32>,
    pub shutdown: watch::Receiver<bool>,
}

// Why a session or connection attempt ended.
#[derive(Debug)]
pub(crate) enum CloseReason {
    Disconnected,
    Idle,
    Protocol(String),
    Io(String),
    Shutdown,
}

// Sessions and dial tasks post these to the supervisor; no back-pointers.
pub(crate) enum SessionEvent {
    Established {
        addr: SocketAddr,
        transport: Transport,
        peer_id: [u8; 20],
        role: Role,
    },
    DialFailed {
        addr: SocketAddr,
    },
    SelfPeer {
        addr: SocketAddr,
    },
    HandshakeFailed {
        addr: SocketAddr,
    },
    Closed {
        id: SessionId,
        addr: SocketAddr,
        reason: CloseReason,
    },
    PieceCompleted {
        piece: u32,
    },
}

/// A running peer engine.
///
/// [`Engine::start`] spawns the supervisor and announcer and returns a
/// handle; [`Engine::run`] drives it until Ctrl-C, and [`Engine::shutdown`]
/// tears it down cleanly (best-effort `stopped` announce, store flush).
///
/// # Examples
///
/// ```no_run
/// use lanbit::{Engine, EngineConfig, Metainfo};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let metainfo = Metainfo::from_file("payload.torrent")?;
/// let engine = Engine::start(metainfo, ".".as_ref(), EngineConfig::default()).await?;
/// engine.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
    announcer: JoinHandle<()>,
    port: u16,
}

impl Engine {
    /// Opens the store, binds the listener, and spawns the engine tasks.
    ///
    /// Fatal initialization errors (bad data directory, port in use,
    /// unusable announce URL) surface here; after this, the engine only
    /// stops on [`Engine::shutdown`] or unrecoverable disk errors.
    pub async fn start(
        metainfo: Metainfo,
        data_dir: &Path,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let tracker = TrackerClient::new(&metainfo.announce, config.tracker_timeout)?;
        let info_hash = metainfo.info_hash;

        let store = Arc::new(PieceStore::open(metainfo, data_dir, &config).await?);

        let listener = TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
        let port = listener.local_addr()?.port();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (have_tx, _) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (peers_tx, peers_rx) = mpsc::channel(8);
        let (completed_tx, completed_rx) = mpsc::channel(1);

        let our_id = PeerId::generate();
        tracing::info!(
            "engine starting: {} ({} pieces), peer id {}, port {}",
            store.metainfo().info.name,
            store.metainfo().info.num_pieces(),
            our_id,
            port
        );

        let shared = Arc::new(Shared {
            config,
            store,
            our_id,
            info_hash,
            uploaded: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            events_tx,
            have_tx,
            shutdown: shutdown_rx,
        });

        let supervisor = Supervisor::new(shared.clone(), listener, events_rx, peers_rx, completed_tx);
        let supervisor = tokio::spawn(supervisor.run());

        let announcer = Announcer::new(shared.clone(), tracker, port, peers_tx, completed_rx);
        let announcer = tokio::spawn(announcer.run());

        Ok(Self {
            shared,
            shutdown_tx,
            supervisor,
            announcer,
            port,
        })
    }

    /// The TCP port the engine accepts peers on.
    pub fn listen_port(&self) -> u16 {
        self.port
    }

    /// True once every piece is complete.
    pub fn is_complete(&self) -> bool {
        self.shared.store.is_complete()
    }

    /// Bytes still missing.
    pub fn bytes_left(&self) -> u64 {
        self.shared.store.bytes_left()
    }

    /// Payload bytes received from peers so far.
    pub fn downloaded(&self) -> u64 {
        self.shared.downloaded.load(Ordering::Relaxed)
    }

    /// Payload bytes served to peers so far.
    pub fn uploaded(&self) -> u64 {
        self.shared.uploaded.load(Ordering::Relaxed)
    }

    /// Runs until Ctrl-C, then shuts down cleanly.
    pub async fn run(self) -> Result<(), EngineError> {
        tokio::signal::ctrl_c().await?;
        tracing::info!("shutting down");
        self.shutdown().await
    }

    /// Stops the engine: sessions close, a best-effort `stopped` announce
    /// goes out, and the store is flushed. The partial file stays on disk,
    /// ready for resume.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        let _ = self.shutdown_tx.send(true);

        // The announcer exits after its stopped announce; the supervisor
        // exits once it has torn the sessions down.
        let _ = self.announcer.await;
        let _ = self.supervisor.await;

        self.shared.store.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
