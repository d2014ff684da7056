//! lanbit - a LAN-scoped BitTorrent peer engine and tracker
//!
//! This library implements a BitTorrent-style file distribution system for a
//! single LAN segment: a central HTTP tracker for peer discovery, and a peer
//! engine that exchanges a file in fixed-size pieces over the BitTorrent v1
//! wire protocol, verifying every piece by SHA-1 digest before serving it.
//!
//! # Modules
//!
//! - [`bencode`] - Canonical bencode encoding/decoding
//! - [`metainfo`] - Torrent metainfo files and info hashes
//! - [`peer`] - Peer wire protocol: handshake, messages, framing
//! - [`storage`] - Piece store: block assembly, verification, disk layout
//! - [`tracker`] - Tracker HTTP service and announce client
//! - [`engine`] - The peer engine: sessions, supervisor, announcer
//! - [`config`] - Engine tuning parameters

pub mod bencode;
pub mod config;
pub mod engine;
pub mod metainfo;
pub mod peer;
pub mod storage;
pub mod tracker;

pub use bencode::{decode, encode, BencodeError, Value};
pub use config::EngineConfig;
pub use engine::{Engine, EngineError};
pub use metainfo::{Info, InfoHash, Metainfo, MetainfoError, TorrentBuilder};
pub use peer::{Bitfield, BlockRef, Handshake, Message, PeerError, PeerId};
pub use storage::{Deposit, PieceStore, StorageError};
pub use tracker::{
    AnnounceResponse, Swarm, TrackerClient, TrackerError, TrackerEvent, TrackerServer,
};
