//! One session per connected peer.
//!
//! A session is two tasks sharing one socket: the reader owns the read half
//! and drives the protocol state machine; the writer owns the write half,
//! the outbound queue, and the keep-alive timer. The split is what keeps the
//! receive flow from ever blocking the send flow: keep-alives go out even
//! while a large piece is streaming in.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{CloseReason, SessionEvent, Shared};
use crate::peer::{
    Bitfield, BlockRef, FrameReader, FrameWriter, Handshake, Message, PeerError, PeerId, Transport,
};
use crate::storage::{Deposit, SessionId};

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Initiator,
    Responder,
}

pub(crate) enum EstablishError {
    /// The remote end is ourselves; close silently, never redial.
    SelfPeer,
    Peer(PeerError),
}

impl From<PeerError> for EstablishError {
    fn from(e: PeerError) -> Self {
        EstablishError::Peer(e)
    }
}

/// Performs the handshake for either role.
///
/// The initiator sends first and the responder answers; both sides close on
/// a bad protocol string or an info hash we do not serve, and a handshake
/// carrying our own peer ID is a self-connection.
pub(crate) async fn establish(
    stream: TcpStream,
    role: Role,
    shared: &Shared,
) -> Result<(Transport, [u8; 20]), EstablishError> {
    let mut transport = Transport::new(stream);
    let ours = Handshake::new(*shared.info_hash.as_bytes(), *shared.our_id.as_bytes());

    let theirs = match role {
        Role::Initiator => {
            transport.send_handshake(&ours).await?;
            transport.receive_handshake().await?
        }
        Role::Responder => {
            let theirs = transport.receive_handshake().await?;
            if theirs.info_hash != *shared.info_hash.as_bytes() {
                return Err(PeerError::InfoHashMismatch.into());
            }
            transport.send_handshake(&ours).await?;
            theirs
        }
    };

    if theirs.info_hash != *shared.info_hash.as_bytes() {
        return Err(PeerError::InfoHashMismatch.into());
    }
    if theirs.peer_id == *shared.our_id.as_bytes() {
        return Err(EstablishError::SelfPeer);
    }

    Ok((transport, theirs.peer_id))
}

// Mirrored per-direction flags plus pipeline bookkeeping. One short-lived
// mutex; never held across await points.
struct SessionState {
    am_choking: bool,
    am_interested: bool,
    peer_choking: bool,
    peer_interested: bool,
    peer_bitfield: Bitfield,
    inflight: HashMap<BlockRef, Instant>,
    pending_uploads: HashSet<BlockRef>,
}

impl SessionState {
    fn new(num_pieces: usize) -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            peer_bitfield: Bitfield::new(num_pieces),
            inflight: HashMap::new(),
            pending_uploads: HashSet::new(),
        }
    }
}

enum Outbound {
    Msg(Message),
    Upload(BlockRef),
}

pub(crate) struct SessionHandle {
    pub id: SessionId,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SessionHandle {
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Spawns the reader/writer pair for an established connection.
pub(crate) fn spawn(
    id: SessionId,
    addr: SocketAddr,
    peer_id: [u8; 20],
    transport: Transport,
    shared: Arc<Shared>,
) -> SessionHandle {
    let max_frame = shared
        .config
        .max_frame(shared.store.metainfo().info.piece_length);
    let (frame_reader, frame_writer) = transport.split(max_frame);

    let state = Arc::new(Mutex::new(SessionState::new(
        shared.store.metainfo().info.num_pieces(),
    )));

    let (out_tx, out_rx) = mpsc::channel::<Outbound>(64);

    // Announce what we hold (if anything), then unchoke: the engine runs an
    // unchoke-all policy.
    let mut initial = Vec::new();
    let our_bitfield = shared.store.bitfield();
    if !our_bitfield.is_empty() {
        initial.push(Message::Bitfield(our_bitfield.to_bytes()));
    }
    initial.push(Message::Unchoke);
    state.lock().am_choking = false;

    tracing::debug!(
        "session {} established with {} ({})",
        id,
        addr,
        PeerId(peer_id)
    );

    let writer = tokio::spawn(run_writer(
        id,
        frame_writer,
        out_rx,
        initial,
        state.clone(),
        shared.clone(),
        addr,
    ));

    let reader = tokio::spawn(run_reader(id, frame_reader, out_tx, state, shared, addr));

    SessionHandle { id, reader, writer }
}

// Interest transitions and pipeline refill, computed under the state lock.
// Returns the messages to transmit; the caller dispatches them.
fn pump(shared: &Shared, id: SessionId, state: &Mutex<SessionState>) -> Vec<Message> {
    let mut msgs = Vec::new();
    let mut state = state.lock();

    // Requests the peer never answered expire with their reservations and
    // get re-issued (by us or by another session).
    let now = Instant::now();
    let request_timeout = shared.config.request_timeout;
    state
        .inflight
        .retain(|_, sent| now.duration_since(*sent) < request_timeout);

    let wants = shared.store.wants_any(&state.peer_bitfield);

    if !state.am_interested && wants {
        state.am_interested = true;
        msgs.push(Message::Interested);
    } else if state.am_interested && !wants && state.inflight.is_empty() {
        state.am_interested = false;
        msgs.push(Message::NotInterested);
    }

    if state.am_interested && !state.peer_choking {
        while state.inflight.len() < shared.config.max_pipeline {
            match shared.store.next_request(&state.peer_bitfield, id) {
                Some(block) => {
                    state.inflight.insert(block, Instant::now());
                    msgs.push(Message::Request {
                        index: block.piece_index,
                        begin: block.begin,
                        length: block.length,
                    });
                }
                None => break,
            }
        }
    }

    msgs
}

async fn run_reader(
    id: SessionId,
    mut frames: FrameReader,
    out_tx: mpsc::Sender<Outbound>,
    state: Arc<Mutex<SessionState>>,
    shared: Arc<Shared>,
    addr: SocketAddr,
) {
    let mut shutdown = shared.shutdown.clone();

    let reason = loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break CloseReason::Shutdown,
            result = timeout(shared.config.idle_timeout, frames.read_frame()) => {
                match result {
                    Err(_) => break CloseReason::Idle,
                    Ok(Err(PeerError::Disconnected)) => break CloseReason::Disconnected,
                    Ok(Err(PeerError::Io(e))) => break CloseReason::Io(e.to_string()),
                    Ok(Err(e)) => break CloseReason::Protocol(e.to_string()),
                    Ok(Ok(message)) => message,
                }
            }
        };

        if let Some(reason) = handle_message(id, message, &out_tx, &state, &shared).await {
            break reason;
        }
    };

    {
        let s = state.lock();
        tracing::debug!(
            "session {} closing: {:?} (peer_interested={}, {} requests in flight)",
            id,
            reason,
            s.peer_interested,
            s.inflight.len()
        );
    }

    let _ = shared.events_tx.send(SessionEvent::Closed { id, addr, reason });
}

// Returns Some(reason) when the session must close.
async fn handle_message(
    id: SessionId,
    message: Message,
    out_tx: &mpsc::Sender<Outbound>,
    state: &Arc<Mutex<SessionState>>,
    shared: &Arc<Shared>,
) -> Option<CloseReason> {
    match message {
        Message::KeepAlive | Message::Unknown { .. } => {}

        Message::Choke => {
            // Drop pipeline bookkeeping; the blocks become requestable
            // again (by us or anyone) and in-flight data will arrive
            // unsolicited and be ignored.
            let mut s = state.lock();
            s.peer_choking = true;
            s.inflight.clear();
            drop(s);
            shared.store.release_session(id);
        }

        Message::Unchoke => {
            state.lock().peer_choking = false;
        }

        Message::Interested => {
            state.lock().peer_interested = true;
        }

        Message::NotInterested => {
            state.lock().peer_interested = false;
        }

        Message::Have { piece } => {
            state.lock().peer_bitfield.set(piece as usize);
        }

        Message::Bitfield(bits) => {
            let num_pieces = shared.store.metainfo().info.num_pieces();
            match Bitfield::from_message(&bits, num_pieces) {
                Some(bf) => state.lock().peer_bitfield = bf,
                None => return Some(CloseReason::Protocol("malformed bitfield".into())),
            }
        }

        Message::Request {
            index,
            begin,
            length,
        } => {
            let info = &shared.store.metainfo().info;
            let valid = (index as usize) < info.num_pieces()
                && length > 0
                && length <= shared.config.max_request_length()
                && begin as u64 + length as u64 <= info.piece_len(index as usize);
            if !valid {
                return Some(CloseReason::Protocol(format!(
                    "bad request: piece {} begin {} length {}",
                    index, begin, length
                )));
            }

            let (choking, has) = {
                let s = state.lock();
                (s.am_choking, shared.store.have(index))
            };
            if !choking && has {
                let block = BlockRef::new(index, begin, length);
                state.lock().pending_uploads.insert(block);
                if out_tx.send(Outbound::Upload(block)).await.is_err() {
                    return Some(CloseReason::Disconnected);
                }
            }
        }

        Message::Piece { index, begin, data } => {
            let block = BlockRef::new(index, begin, data.len() as u32);
            let matched = state.lock().inflight.remove(&block).is_some();
            if !matched {
                tracing::trace!("session {}: unsolicited block {:?}, dropped", id, block);
                return None;
            }

            shared
                .downloaded
                .fetch_add(data.len() as u64, Ordering::Relaxed);

            match shared.store.deposit_block(index, begin, data).await {
                Ok(Deposit::Completed) => {
                    let _ = shared
                        .events_tx
                        .send(SessionEvent::PieceCompleted { piece: index });
                }
                Ok(Deposit::Corrupt) => {
                    tracing::warn!("session {}: piece {} corrupt, will re-request", id, index);
                }
                Ok(Deposit::Accepted) | Ok(Deposit::Duplicate) => {}
                Err(e) => {
                    tracing::debug!("session {}: deposit failed: {}", id, e);
                }
            }
        }

        Message::Cancel {
            index,
            begin,
            length,
        } => {
            // Drops a still-queued upload; anything already written out is
            // a no-op.
            let block = BlockRef::new(index, begin, length);
            state.lock().pending_uploads.remove(&block);
        }
    }

    for msg in pump(shared, id, state) {
        if out_tx.send(Outbound::Msg(msg)).await.is_err() {
            return Some(CloseReason::Disconnected);
        }
    }

    None
}

async fn run_writer(
    id: SessionId,
    mut frames: FrameWriter,
    mut out_rx: mpsc::Receiver<Outbound>,
    initial: Vec<Message>,
    state: Arc<Mutex<SessionState>>,
    shared: Arc<Shared>,
    addr: SocketAddr,
) {
    let mut shutdown = shared.shutdown.clone();
    let mut have_rx = shared.have_tx.subscribe();
    let mut keep_alive = tokio::time::interval(shared.config.keep_alive / 2);
    keep_alive.tick().await;
    let mut last_tx = Instant::now();

    for msg in initial {
        if frames.write_frame(&msg).await.is_err() {
            return;
        }
    }

    let reason = loop {
        tokio::select! {
            _ = shutdown.changed() => return,

            outbound = out_rx.recv() => {
                let outbound = match outbound {
                    Some(outbound) => outbound,
                    None => return, // reader gone; it reports the close
                };
                match outbound {
                    Outbound::Msg(msg) => {
                        if frames.write_frame(&msg).await.is_err() {
                            break CloseReason::Io("write failed".into());
                        }
                        last_tx = Instant::now();
                    }
                    Outbound::Upload(block) => {
                        // Skip if a Cancel got here first.
                        if !state.lock().pending_uploads.remove(&block) {
                            continue;
                        }
                        match shared
                            .store
                            .read_block(block.piece_index, block.begin, block.length)
                            .await
                        {
                            Ok(data) => {
                                let len = data.len() as u64;
                                let msg = Message::Piece {
                                    index: block.piece_index,
                                    begin: block.begin,
                                    data,
                                };
                                if frames.write_frame(&msg).await.is_err() {
                                    break CloseReason::Io("write failed".into());
                                }
                                last_tx = Instant::now();
                                shared.uploaded.fetch_add(len, Ordering::Relaxed);
                            }
                            Err(e) => {
                                tracing::debug!("session {}: upload read failed: {}", id, e);
                            }
                        }
                    }
                }
            }

            have = have_rx.recv() => {
                match have {
                    Ok(piece) => {
                        if frames.write_frame(&Message::Have { piece }).await.is_err() {
                            break CloseReason::Io("write failed".into());
                        }
                        last_tx = Instant::now();
                    }
                    Err(_) => continue,
                }
            }

            _ = keep_alive.tick() => {
                // Periodic nudge: refill the pipeline (reservations released
                // elsewhere may have freed blocks) and keep the link alive.
                for msg in pump(&shared, id, &state) {
                    if frames.write_frame(&msg).await.is_err() {
                        break;
                    }
                    last_tx = Instant::now();
                }
                if last_tx.elapsed() >= shared.config.keep_alive {
                    if frames.write_frame(&Message::KeepAlive).await.is_err() {
                        break CloseReason::Io("write failed".into());
                    }
                    last_tx = Instant::now();
                }
            }
        }
    };

    let _ = shared.events_tx.send(SessionEvent::Closed { id, addr, reason });
}
