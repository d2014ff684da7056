//! Tracker service and announce client.
//!
//! The tracker is the swarm's rendezvous point: peers announce themselves
//! over HTTP and receive the current peer set for an info hash in return.
//! This module contains both halves of that contract: the [`TrackerServer`]
//! with its [`Swarm`] bookkeeping, and the [`TrackerClient`] the peer engine
//! announces with.

mod client;
mod error;
mod response;
mod server;
mod swarm;

pub use client::TrackerClient;
pub use error::TrackerError;
pub use response::{parse_compact_peers, AnnounceResponse, TrackerEvent};
pub use server::TrackerServer;
pub use swarm::{PeerEntry, Swarm, SwarmStats};

#[cfg(test)]
mod tests;
