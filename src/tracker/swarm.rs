use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::response::TrackerEvent;
use crate::metainfo::InfoHash;

/// A peer as the tracker sees it.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// The peer's self-chosen 20-byte ID.
    pub peer_id: [u8; 20],
    /// Endpoint the peer accepts connections on.
    pub addr: SocketAddr,
    /// True once the peer reported `left == 0` or a `completed` event.
    pub completed: bool,
    last_seen: Instant,
}

/// Per-torrent counters for the stats view.
#[derive(Debug, Clone)]
pub struct SwarmStats {
    pub info_hash: InfoHash,
    pub peers: usize,
    pub seeders: usize,
    pub leechers: usize,
}

/// The tracker's peer tables: one bucket of peers per info hash.
///
/// A monitor-style object; a single mutex guards the tables and every
/// operation is a short O(peers-per-torrent) critical section. Snapshots
/// are taken under the lock and rendered outside it.
#[derive(Default)]
pub struct Swarm {
    torrents: Mutex<HashMap<InfoHash, HashMap<SocketAddr, PeerEntry>>>,
}

impl Swarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one announce to the table.
    ///
    /// `started`, `completed`, and the absent event insert or refresh the
    /// peer, keyed by `(ip, port)`; `stopped` removes it. Empty buckets are
    /// dropped.
    pub fn announce(
        &self,
        info_hash: InfoHash,
        peer_id: [u8; 20],
        addr: SocketAddr,
        left: Option<u64>,
        event: TrackerEvent,
    ) {
        let mut torrents = self.torrents.lock();

        if event == TrackerEvent::Stopped {
            if let Some(peers) = torrents.get_mut(&info_hash) {
                if peers.remove(&addr).is_some() {
                    tracing::debug!("peer stopped: {} for {}", addr, info_hash);
                }
                if peers.is_empty() {
                    torrents.remove(&info_hash);
                }
            }
            return;
        }

        let peers = torrents.entry(info_hash).or_default();
        let completed = event == TrackerEvent::Completed || left == Some(0);
        let previous = peers.insert(
            addr,
            PeerEntry {
                peer_id,
                addr,
                completed,
                last_seen: Instant::now(),
            },
        );

        if previous.is_none() {
            tracing::debug!("peer joined: {} for {}", addr, info_hash);
        }
    }

    /// Snapshot of the peer set for a torrent, excluding the requester.
    pub fn peers_for(&self, info_hash: &InfoHash, exclude: SocketAddr) -> Vec<PeerEntry> {
        let torrents = self.torrents.lock();
        torrents
            .get(info_hash)
            .map(|peers| {
                peers
                    .values()
                    .filter(|p| p.addr != exclude)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Evicts peers that have not announced within `timeout`; buckets left
    /// empty are dropped.
    pub fn evict_stale(&self, timeout: Duration) {
        let now = Instant::now();
        let mut torrents = self.torrents.lock();

        torrents.retain(|info_hash, peers| {
            peers.retain(|addr, entry| {
                let live = now.duration_since(entry.last_seen) <= timeout;
                if !live {
                    tracing::debug!("evicting stale peer {} from {}", addr, info_hash);
                }
                live
            });
            !peers.is_empty()
        });
    }

    /// Per-torrent seeder/leecher counts.
    pub fn stats(&self) -> Vec<SwarmStats> {
        let torrents = self.torrents.lock();
        torrents
            .iter()
            .map(|(info_hash, peers)| {
                let seeders = peers.values().filter(|p| p.completed).count();
                SwarmStats {
                    info_hash: *info_hash,
                    peers: peers.len(),
                    seeders,
                    leechers: peers.len() - seeders,
                }
            })
            .collect()
    }
}
