use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Announce lifecycle events.
///
/// `None` is the regular periodic announce; the other three mark the start,
/// clean stop, and first completion of a download. Unknown event strings are
/// treated as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    None,
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    /// Parses an announce `event` query value. Anything unrecognized,
    /// including an empty string, is the absent event.
    pub fn from_query(value: &str) -> Self {
        match value {
            "started" => TrackerEvent::Started,
            "stopped" => TrackerEvent::Stopped,
            "completed" => TrackerEvent::Completed,
            _ => TrackerEvent::None,
        }
    }
}

/// A tracker's answer to an announce.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Advisory re-announce cadence in seconds.
    pub interval: u32,
    /// Current peer set, requester excluded.
    pub peers: Vec<SocketAddr>,
}

/// Parses the compact peer format: 6 bytes per peer, IPv4 address and port
/// both big-endian. Trailing partial entries are ignored.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}
