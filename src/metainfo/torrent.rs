use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;

use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, encode, Value};

/// A parsed torrent file.
///
/// Contains the tracker URL, the single-file `info` dictionary, and the info
/// hash that identifies the torrent.
///
/// # Examples
///
/// ```no_run
/// use lanbit::metainfo::Metainfo;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let metainfo = Metainfo::from_bytes(&data)?;
///
/// println!("Torrent: {}", metainfo.info.name);
/// println!("Size: {} bytes", metainfo.info.total_length);
/// println!("Info hash: {}", metainfo.info_hash);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Tracker announce URL.
    pub announce: String,
    /// The info dictionary containing file and piece information.
    pub info: Info,
    /// The torrent's identity: SHA-1 of the bencoded info dictionary.
    pub info_hash: InfoHash,
    raw_info: Bytes,
}

/// The info dictionary from a torrent file.
///
/// The SHA-1 hash of this dictionary in bencode form is the info hash.
#[derive(Debug, Clone)]
pub struct Info {
    /// Basename of the distributed file.
    pub name: String,
    /// Number of bytes per piece. The last piece may be shorter.
    pub piece_length: u64,
    /// Total file size in bytes.
    pub total_length: u64,
    /// SHA-1 hash of each piece.
    pub pieces: Vec<[u8; 20]>,
}

impl Metainfo {
    /// Parses a torrent file from raw bytes.
    ///
    /// The input must be canonical bencode; the decoder rejects anything
    /// else, which means the re-encoded `info` dictionary is byte-identical
    /// to the slice that appeared in the input, and the info hash computed
    /// from it matches what other tools compute from the original bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid bencode, if required fields
    /// are missing, or if the piece table does not match the declared
    /// lengths.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let value = decode(data)?;
        if value.dict().is_none() {
            return Err(MetainfoError::InvalidField("root"));
        }

        let announce = value
            .get_utf8(b"announce")
            .ok_or(MetainfoError::MissingField("announce"))?
            .to_string();

        let info_value = value
            .get(b"info")
            .ok_or(MetainfoError::MissingField("info"))?;

        let raw_info = Bytes::from(encode(info_value));
        let info_hash = InfoHash::from_info_bytes(&raw_info);

        let info = parse_info(info_value)?;

        Ok(Self {
            announce,
            info,
            info_hash,
            raw_info,
        })
    }

    /// Reads and parses a torrent file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MetainfoError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Serializes the metainfo to canonical bencode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MetainfoError> {
        let mut root = BTreeMap::new();
        root.insert(Bytes::from_static(b"announce"), Value::text(&self.announce));
        root.insert(Bytes::from_static(b"info"), decode(&self.raw_info)?);
        Ok(encode(&Value::Dict(root)))
    }

    /// Returns the raw bencoded info dictionary.
    pub fn raw_info(&self) -> &Bytes {
        &self.raw_info
    }

    pub(crate) fn from_parts(announce: String, info: Info, raw_info: Bytes) -> Self {
        let info_hash = InfoHash::from_info_bytes(&raw_info);
        Self {
            announce,
            info,
            info_hash,
            raw_info,
        }
    }
}

impl Info {
    /// Number of pieces in the torrent.
    pub fn num_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// Declared length of piece `index`. Every piece is `piece_length`
    /// except the last, which covers the remainder.
    pub fn piece_len(&self, index: usize) -> u64 {
        let start = index as u64 * self.piece_length;
        (self.total_length - start).min(self.piece_length)
    }

    /// Expected digest of piece `index`.
    pub fn piece_hash(&self, index: usize) -> &[u8; 20] {
        &self.pieces[index]
    }
}

fn parse_info(value: &Value) -> Result<Info, MetainfoError> {
    if value.dict().is_none() {
        return Err(MetainfoError::InvalidField("info"));
    }

    let name = value
        .get_utf8(b"name")
        .ok_or(MetainfoError::MissingField("name"))?
        .to_string();

    let piece_length = value
        .get_integer(b"piece length")
        .ok_or(MetainfoError::MissingField("piece length"))?;

    if piece_length < 1 {
        return Err(MetainfoError::InvalidField("piece length"));
    }
    let piece_length = piece_length as u64;

    let total_length = value
        .get_integer(b"length")
        .ok_or(MetainfoError::MissingField("length"))?;

    if total_length < 1 {
        return Err(MetainfoError::InvalidField("length"));
    }
    let total_length = total_length as u64;

    let pieces_bytes = value
        .get_bytes(b"pieces")
        .ok_or(MetainfoError::MissingField("pieces"))?;

    if pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    let pieces: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(chunk);
            arr
        })
        .collect();

    let expected = total_length.div_ceil(piece_length) as usize;
    if pieces.len() != expected || pieces.is_empty() {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    Ok(Info {
        name,
        piece_length,
        total_length,
        pieces,
    })
}
