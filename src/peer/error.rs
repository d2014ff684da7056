use thiserror::Error;

/// Errors that can occur during peer communication.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent an invalid handshake.
    #[error("bad handshake")]
    BadHandshake,

    /// The peer's info hash doesn't match a torrent we serve.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// Received a malformed protocol message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A frame exceeded the negotiated size cap.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The peer closed the connection (including a short read mid-frame).
    #[error("peer disconnected")]
    Disconnected,

    /// Operation timed out.
    #[error("timeout")]
    Timeout,

    /// Protocol violation by the peer.
    #[error("protocol violation: {0}")]
    Protocol(String),
}
