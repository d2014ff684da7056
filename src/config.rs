//! Engine tuning parameters.
//!
//! All knobs live in one immutable [`EngineConfig`] that is built once and
//! threaded through construction. Defaults match the values common among
//! small clients: 16 KiB blocks, a 5-deep request pipeline, and 120 second
//! keep-alive and announce cadences.

use std::time::Duration;

/// Configuration for the peer engine.
///
/// Construct with [`EngineConfig::default`] and override fields as needed:
///
/// ```
/// use lanbit::EngineConfig;
///
/// let config = EngineConfig {
///     listen_port: 6881,
///     ..EngineConfig::default()
/// };
/// assert_eq!(config.block_size, 16384);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Transfer unit within a piece. The last block of the last piece may be
    /// shorter.
    pub block_size: u32,
    /// Maximum outstanding `Request`s per peer.
    pub max_pipeline: usize,
    /// Send a keep-alive after this much outbound silence.
    pub keep_alive: Duration,
    /// Tear a session down after this much inbound silence.
    pub idle_timeout: Duration,
    /// A reserved block becomes re-requestable after this long.
    pub request_timeout: Duration,
    /// Re-announce cadence when the tracker does not supply one.
    pub announce_interval: Duration,
    /// Timeout for tracker HTTP calls.
    pub tracker_timeout: Duration,
    /// Timeout for outbound peer dials (TCP connect + handshake).
    pub dial_timeout: Duration,
    /// Maximum concurrent peer sessions.
    pub max_peers: usize,
    /// First back-off delay after a failed dial; doubles per failure.
    pub backoff_base: Duration,
    /// Back-off ceiling.
    pub backoff_cap: Duration,
    /// TCP listen port. 0 picks an ephemeral port.
    pub listen_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 16384,
            max_pipeline: 5,
            keep_alive: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(240),
            request_timeout: Duration::from_secs(60),
            announce_interval: Duration::from_secs(120),
            tracker_timeout: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(10),
            max_peers: 50,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(300),
            listen_port: 0,
        }
    }
}

impl EngineConfig {
    /// Largest frame a peer may send us: a full-piece `Piece` message
    /// (4-byte index + 4-byte begin + data) plus the message id byte.
    pub fn max_frame(&self, piece_length: u64) -> usize {
        piece_length as usize + 9
    }

    /// Largest block a peer may request from us.
    pub fn max_request_length(&self) -> u32 {
        self.block_size * 2
    }
}
