//! Torrent file builder.
//!
//! Constructs a single-file [`Metainfo`] by hashing a source file into
//! fixed-size pieces.
//!
//! # Examples
//!
//! ```no_run
//! use lanbit::metainfo::TorrentBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metainfo = TorrentBuilder::new("http://192.168.1.10:8000/announce")
//!     .piece_length(262144)
//!     .build_from_path("payload.bin")?;
//!
//! std::fs::write("payload.torrent", metainfo.to_bytes()?)?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use sha1::{Digest, Sha1};

use super::error::MetainfoError;
use super::torrent::{Info, Metainfo};
use crate::bencode::{encode, Value};

/// Default piece length (256 KiB).
pub const DEFAULT_PIECE_LENGTH: u64 = 262144;

/// Builder for creating single-file torrents.
pub struct TorrentBuilder {
    announce: String,
    piece_length: u64,
}

impl TorrentBuilder {
    /// Creates a builder announcing to the given tracker URL.
    pub fn new(announce: impl Into<String>) -> Self {
        Self {
            announce: announce.into(),
            piece_length: DEFAULT_PIECE_LENGTH,
        }
    }

    /// Sets the piece length in bytes. Powers of two are recommended.
    pub fn piece_length(mut self, piece_length: u64) -> Self {
        self.piece_length = piece_length;
        self
    }

    /// Builds a metainfo from a file on disk, hashing it piece by piece.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is empty, or the piece
    /// length is zero.
    pub fn build_from_path(self, path: impl AsRef<Path>) -> Result<Metainfo, MetainfoError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(MetainfoError::InvalidField("name"))?
            .to_string();

        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        self.build_from_bytes(name, &data)
    }

    /// Builds a metainfo from in-memory file contents.
    pub fn build_from_bytes(self, name: String, data: &[u8]) -> Result<Metainfo, MetainfoError> {
        if self.piece_length == 0 {
            return Err(MetainfoError::InvalidField("piece length"));
        }
        if data.is_empty() {
            return Err(MetainfoError::InvalidField("length"));
        }

        let pieces: Vec<[u8; 20]> = data
            .chunks(self.piece_length as usize)
            .map(|piece| {
                let mut hasher = Sha1::new();
                hasher.update(piece);
                hasher.finalize().into()
            })
            .collect();

        let mut flat = Vec::with_capacity(pieces.len() * 20);
        for hash in &pieces {
            flat.extend_from_slice(hash);
        }

        let mut info_dict = BTreeMap::new();
        info_dict.insert(
            Bytes::from_static(b"length"),
            Value::Integer(data.len() as i64),
        );
        info_dict.insert(Bytes::from_static(b"name"), Value::text(&name));
        info_dict.insert(
            Bytes::from_static(b"piece length"),
            Value::Integer(self.piece_length as i64),
        );
        info_dict.insert(
            Bytes::from_static(b"pieces"),
            Value::Bytes(Bytes::from(flat)),
        );

        let raw_info = Bytes::from(encode(&Value::Dict(info_dict)));

        let info = Info {
            name,
            piece_length: self.piece_length,
            total_length: data.len() as u64,
            pieces,
        };

        Ok(Metainfo::from_parts(self.announce, info, raw_info))
    }
}
