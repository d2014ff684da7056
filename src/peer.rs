//! Peer wire protocol.
//!
//! This module implements the BitTorrent v1 peer protocol as used on the
//! wire: the 68-byte handshake, the nine length-prefixed messages plus
//! keep-alive, packed bitfields, and the framing layer that reads and writes
//! them over TCP.

mod bitfield;
mod block;
mod error;
mod message;
mod peer_id;
mod transport;

pub use bitfield::Bitfield;
pub use block::BlockRef;
pub use error::PeerError;
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN, PROTOCOL};
pub use peer_id::PeerId;
pub use transport::{FrameReader, FrameWriter, Transport};

#[cfg(test)]
mod tests;
