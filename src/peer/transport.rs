use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// A peer connection during the handshake phase.
///
/// Wraps the whole stream for the synchronous handshake exchange, then
/// splits into a [`FrameReader`] and [`FrameWriter`] so the receive flow can
/// never block the send flow.
pub struct Transport {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl Transport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
        }
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        let data = handshake.encode();
        timeout(HANDSHAKE_TIMEOUT, self.stream.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    pub async fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        while self.read_buf.len() < HANDSHAKE_LEN {
            let n = timeout(HANDSHAKE_TIMEOUT, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| PeerError::Timeout)??;

            if n == 0 {
                return Err(PeerError::Disconnected);
            }
        }

        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    /// Splits into independent read and write halves.
    ///
    /// `max_frame` caps the length prefix accepted from the peer; anything
    /// larger is a protocol violation.
    pub fn split(self, max_frame: usize) -> (FrameReader, FrameWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            FrameReader {
                half: read_half,
                read_buf: self.read_buf,
                max_frame,
            },
            FrameWriter { half: write_half },
        )
    }
}

/// Reads length-prefixed frames from the peer.
pub struct FrameReader {
    half: OwnedReadHalf,
    read_buf: BytesMut,
    max_frame: usize,
}

impl FrameReader {
    /// Reads one complete message frame.
    ///
    /// Any short read, whether at a frame boundary or mid-frame, yields
    /// [`PeerError::Disconnected`]; the caller closes the session cleanly.
    pub async fn read_frame(&mut self) -> Result<Message, PeerError> {
        while self.read_buf.len() < 4 {
            let n = self.half.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::Disconnected);
            }
        }

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > self.max_frame {
            return Err(PeerError::FrameTooLarge(length));
        }

        let total_len = 4 + length;
        while self.read_buf.len() < total_len {
            let n = self.half.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::Disconnected);
            }
        }

        let data = self.read_buf.split_to(total_len);
        Message::decode(data.freeze())
    }
}

/// Writes message frames to the peer.
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn write_frame(&mut self, message: &Message) -> Result<(), PeerError> {
        let data = message.encode();
        timeout(WRITE_TIMEOUT, self.half.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }
}
