//! The session supervisor.
//!
//! Owns the set of live sessions keyed by endpoint. Accepts inbound
//! connections, dials peers the tracker reports, applies capped exponential
//! back-off to failed dials, and releases a session's piece-store
//! reservations when it ends. Sessions communicate exclusively through the
//! event channel; the supervisor holds no references into them beyond their
//! task handles.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::session::{self, EstablishError, Role, SessionHandle};
use super::{CloseReason, SessionEvent, Shared};
use crate::storage::SessionId;

const RETRY_TICK: Duration = Duration::from_secs(5);

struct Backoff {
    failures: u32,
    next_attempt: Instant,
}

pub(crate) struct Supervisor {
    shared: Arc<Shared>,
    listener: TcpListener,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    peers_rx: mpsc::Receiver<Vec<SocketAddr>>,
    completed_tx: mpsc::Sender<()>,
    sessions: HashMap<SocketAddr, SessionHandle>,
    known_peers: HashSet<SocketAddr>,
    dialing: HashSet<SocketAddr>,
    backoff: HashMap<SocketAddr, Backoff>,
    self_addrs: HashSet<SocketAddr>,
    announced_complete: bool,
    next_session_id: SessionId,
}

impl Supervisor {
    pub fn new(
        shared: Arc<Shared>,
        listener: TcpListener,
        events_rx: mpsc::UnboundedReceiver<SessionEvent>,
        peers_rx: mpsc::Receiver<Vec<SocketAddr>>,
        completed_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            shared,
            listener,
            events_rx,
            peers_rx,
            completed_tx,
            sessions: HashMap::new(),
            known_peers: HashSet::new(),
            dialing: HashSet::new(),
            backoff: HashMap::new(),
            self_addrs: HashSet::new(),
            announced_complete: false,
            next_session_id: 1,
        }
    }

    pub async fn run(mut self) {
        let mut shutdown = self.shared.shutdown.clone();
        let mut retry = tokio::time::interval(RETRY_TICK);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.handle_inbound(stream, addr),
                        Err(e) => tracing::warn!("accept failed: {}", e),
                    }
                }

                peers = self.peers_rx.recv() => {
                    match peers {
                        Some(peers) => {
                            self.known_peers.extend(peers);
                            self.dial_eligible();
                        }
                        None => break,
                    }
                }

                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }

                _ = retry.tick() => self.dial_eligible(),
            }
        }

        for (addr, handle) in self.sessions.drain() {
            tracing::debug!("closing session {} to {}", handle.id, addr);
            handle.abort();
            self.shared.store.release_session(handle.id);
        }
    }

    fn handle_inbound(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.sessions.len() >= self.shared.config.max_peers {
            tracing::debug!("at capacity, refusing inbound peer {}", addr);
            return;
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let event = match timeout(
                shared.config.dial_timeout,
                session::establish(stream, Role::Responder, &shared),
            )
            .await
            {
                Ok(Ok((transport, peer_id))) => SessionEvent::Established {
                    addr,
                    transport,
                    peer_id,
                    role: Role::Responder,
                },
                Ok(Err(EstablishError::SelfPeer)) => SessionEvent::SelfPeer { addr },
                Ok(Err(EstablishError::Peer(e))) => {
                    tracing::debug!("inbound handshake from {} failed: {}", addr, e);
                    SessionEvent::HandshakeFailed { addr }
                }
                Err(_) => SessionEvent::HandshakeFailed { addr },
            };
            let _ = shared.events_tx.send(event);
        });
    }

    fn dial_eligible(&mut self) {
        let now = Instant::now();
        let candidates: Vec<SocketAddr> = self
            .known_peers
            .iter()
            .copied()
            .filter(|addr| {
                !self.sessions.contains_key(addr)
                    && !self.dialing.contains(addr)
                    && !self.self_addrs.contains(addr)
                    && self
                        .backoff
                        .get(addr)
                        .map(|b| now >= b.next_attempt)
                        .unwrap_or(true)
            })
            .collect();

        for addr in candidates {
            if self.sessions.len() + self.dialing.len() >= self.shared.config.max_peers {
                break;
            }
            self.dialing.insert(addr);
            let shared = self.shared.clone();
            tokio::spawn(async move {
                let event = match timeout(shared.config.dial_timeout, dial(addr, &shared)).await {
                    Ok(Ok((transport, peer_id))) => SessionEvent::Established {
                        addr,
                        transport,
                        peer_id,
                        role: Role::Initiator,
                    },
                    Ok(Err(EstablishError::SelfPeer)) => SessionEvent::SelfPeer { addr },
                    Ok(Err(EstablishError::Peer(e))) => {
                        tracing::debug!("dial to {} failed: {}", addr, e);
                        SessionEvent::DialFailed { addr }
                    }
                    Err(_) => SessionEvent::DialFailed { addr },
                };
                let _ = shared.events_tx.send(event);
            });
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Established {
                addr,
                transport,
                peer_id,
                role,
            } => {
                self.dialing.remove(&addr);
                if self.sessions.contains_key(&addr) {
                    tracing::debug!("duplicate connection to {}, dropping", addr);
                    return;
                }
                if self.sessions.len() >= self.shared.config.max_peers {
                    return;
                }

                let id = self.next_session_id;
                self.next_session_id += 1;
                self.backoff.remove(&addr);

                tracing::info!("peer connected: {} ({:?})", addr, role);
                let handle = session::spawn(id, addr, peer_id, transport, self.shared.clone());
                self.sessions.insert(addr, handle);
            }

            SessionEvent::DialFailed { addr } => {
                self.dialing.remove(&addr);
                let config = &self.shared.config;
                let entry = self.backoff.entry(addr).or_insert(Backoff {
                    failures: 0,
                    next_attempt: Instant::now(),
                });
                entry.failures += 1;
                let delay = config
                    .backoff_base
                    .saturating_mul(1u32 << (entry.failures - 1).min(16))
                    .min(config.backoff_cap);
                entry.next_attempt = Instant::now() + delay;
                tracing::debug!(
                    "dial to {} failed ({} attempts), retry in {:?}",
                    addr,
                    entry.failures,
                    delay
                );
            }

            SessionEvent::SelfPeer { addr } => {
                self.dialing.remove(&addr);
                self.self_addrs.insert(addr);
                tracing::debug!("{} is ourselves, never redialing", addr);
            }

            SessionEvent::HandshakeFailed { addr } => {
                tracing::debug!("bad handshake from {}", addr);
            }

            SessionEvent::Closed { id, addr, reason } => {
                // A stale event for a replaced session must not tear down
                // the replacement.
                let is_current = self.sessions.get(&addr).map(|h| h.id) == Some(id);
                if is_current {
                    if let Some(handle) = self.sessions.remove(&addr) {
                        handle.abort();
                    }
                }
                self.shared.store.release_session(id);
                tracing::info!("peer disconnected: {} ({:?})", addr, reason);

                // Eligible for redial, but not instantly.
                if !matches!(reason, CloseReason::Shutdown) {
                    self.backoff.insert(
                        addr,
                        Backoff {
                            failures: 0,
                            next_attempt: Instant::now() + self.shared.config.backoff_base,
                        },
                    );
                }
            }

            SessionEvent::PieceCompleted { piece } => {
                let _ = self.shared.have_tx.send(piece);
                if !self.announced_complete && self.shared.store.is_complete() {
                    self.announced_complete = true;
                    tracing::info!("download complete");
                    let _ = self.completed_tx.try_send(());
                }
            }
        }
    }
}

async fn dial(
    addr: SocketAddr,
    shared: &Shared,
) -> Result<(crate::peer::Transport, [u8; 20]), EstablishError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| EstablishError::Peer(e.into()))?;
    session::establish(stream, Role::Initiator, shared).await
}
