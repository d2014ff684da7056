use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::Path;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as TokioMutex;

use super::error::StorageError;
use crate::config::EngineConfig;
use crate::metainfo::Metainfo;
use crate::peer::{Bitfield, BlockRef};

/// Identifies a peer session to the store, for reservation bookkeeping.
pub type SessionId = u64;

/// Outcome of a block deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deposit {
    /// Block stored; the piece still has missing blocks.
    Accepted,
    /// The block (or the whole piece) was already present; nothing changed.
    Duplicate,
    /// The piece assembled, verified, and was flushed to disk.
    Completed,
    /// The assembled piece failed verification and was dropped.
    Corrupt,
}

// Per-piece download state. Assembly buffers exist only while a piece is in
// flight and are released on completion or corruption.
enum PieceState {
    Absent,
    InFlight(Assembly),
    Complete,
}

struct Assembly {
    blocks: HashMap<u32, Bytes>,
    reservations: HashMap<u32, (SessionId, Instant)>,
}

impl Assembly {
    fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            reservations: HashMap::new(),
        }
    }
}

struct StoreState {
    pieces: Vec<PieceState>,
}

/// Single source of truth for piece state and the backing file.
///
/// All operations are thread-safe. The piece-state vector sits behind one
/// mutex with O(1)-ish holds; piece verification hashes a snapshot outside
/// the lock, and file I/O goes through a separate async mutex so no lock is
/// ever held across disk access.
pub struct PieceStore {
    metainfo: Metainfo,
    block_size: u32,
    request_timeout: Duration,
    state: Mutex<StoreState>,
    file: TokioMutex<File>,
}

impl PieceStore {
    /// Creates or opens the backing file `data_dir/<name>` of exact size
    /// `total_length`.
    ///
    /// If a file of that name already exists with the right size, every
    /// piece is rehashed and matches are marked complete, so an interrupted
    /// download resumes where it left off.
    pub async fn open(
        metainfo: Metainfo,
        data_dir: &Path,
        config: &EngineConfig,
    ) -> Result<Self, StorageError> {
        let path = data_dir.join(&metainfo.info.name);
        let num_pieces = metainfo.info.num_pieces();

        let resumable = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len() == metainfo.info.total_length,
            Err(_) => false,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        file.set_len(metainfo.info.total_length).await?;

        let mut pieces = Vec::with_capacity(num_pieces);
        if resumable {
            let mut complete = 0usize;
            for index in 0..num_pieces {
                let len = metainfo.info.piece_len(index) as usize;
                let offset = index as u64 * metainfo.info.piece_length;

                file.seek(SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;

                let expected = *metainfo.info.piece_hash(index);
                let matches = tokio::task::spawn_blocking(move || hash_piece(&buf) == expected)
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

                if matches {
                    pieces.push(PieceState::Complete);
                    complete += 1;
                } else {
                    pieces.push(PieceState::Absent);
                }
            }
            tracing::info!(
                "resume: {}/{} pieces verified on disk for {}",
                complete,
                num_pieces,
                metainfo.info.name
            );
        } else {
            pieces.resize_with(num_pieces, || PieceState::Absent);
        }

        Ok(Self {
            block_size: config.block_size,
            request_timeout: config.request_timeout,
            state: Mutex::new(StoreState { pieces }),
            file: TokioMutex::new(file),
            metainfo,
        })
    }

    /// The metainfo this store serves.
    pub fn metainfo(&self) -> &Metainfo {
        &self.metainfo
    }

    /// Returns true iff the piece is complete.
    pub fn have(&self, index: u32) -> bool {
        let state = self.state.lock();
        matches!(
            state.pieces.get(index as usize),
            Some(PieceState::Complete)
        )
    }

    /// Snapshot of local completion.
    pub fn bitfield(&self) -> Bitfield {
        let state = self.state.lock();
        let mut bf = Bitfield::new(state.pieces.len());
        for (i, piece) in state.pieces.iter().enumerate() {
            if matches!(piece, PieceState::Complete) {
                bf.set(i);
            }
        }
        bf
    }

    /// Returns true once every piece is complete.
    pub fn is_complete(&self) -> bool {
        let state = self.state.lock();
        state
            .pieces
            .iter()
            .all(|p| matches!(p, PieceState::Complete))
    }

    /// Bytes still missing, as reported to the tracker as `left`.
    pub fn bytes_left(&self) -> u64 {
        let state = self.state.lock();
        state
            .pieces
            .iter()
            .enumerate()
            .filter(|(_, p)| !matches!(p, PieceState::Complete))
            .map(|(i, _)| self.metainfo.info.piece_len(i))
            .sum()
    }

    /// Returns true if `remote` claims any piece we do not yet have.
    pub fn wants_any(&self, remote: &Bitfield) -> bool {
        let state = self.state.lock();
        state
            .pieces
            .iter()
            .enumerate()
            .any(|(i, p)| !matches!(p, PieceState::Complete) && remote.has(i))
    }

    /// Reads a verified block for upload.
    ///
    /// # Errors
    ///
    /// [`StorageError::PieceNotAvailable`] if the piece is not complete,
    /// [`StorageError::OutOfRange`] if the region escapes the piece.
    pub async fn read_block(
        &self,
        piece: u32,
        begin: u32,
        length: u32,
    ) -> Result<Bytes, StorageError> {
        let piece_len = self.checked_piece_len(piece)?;
        if begin as u64 + length as u64 > piece_len {
            return Err(StorageError::OutOfRange {
                piece,
                begin,
                length,
            });
        }
        if !self.have(piece) {
            return Err(StorageError::PieceNotAvailable(piece));
        }

        let offset = piece as u64 * self.metainfo.info.piece_length + begin as u64;
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Records an in-flight request for a block.
    ///
    /// Idempotent per session: re-reserving a block this session already
    /// holds is fine. A live reservation by another session fails with
    /// [`StorageError::AlreadyReserved`]; reservations older than the
    /// request timeout may be taken over.
    pub fn reserve_block(&self, block: BlockRef, session: SessionId) -> Result<(), StorageError> {
        let piece_len = self.checked_piece_len(block.piece_index)?;
        if block.begin as u64 + block.length as u64 > piece_len {
            return Err(StorageError::OutOfRange {
                piece: block.piece_index,
                begin: block.begin,
                length: block.length,
            });
        }

        let mut state = self.state.lock();
        let now = Instant::now();
        let piece = &mut state.pieces[block.piece_index as usize];

        if let PieceState::Absent = piece {
            *piece = PieceState::InFlight(Assembly::new());
        }

        match piece {
            PieceState::InFlight(assembly) => {
                if let Some((holder, since)) = assembly.reservations.get(&block.begin) {
                    if *holder != session && now.duration_since(*since) < self.request_timeout {
                        return Err(StorageError::AlreadyReserved {
                            piece: block.piece_index,
                            begin: block.begin,
                        });
                    }
                }
                assembly.reservations.insert(block.begin, (session, now));
                Ok(())
            }
            PieceState::Complete => Err(StorageError::AlreadyReserved {
                piece: block.piece_index,
                begin: block.begin,
            }),
            PieceState::Absent => unreachable!("transitioned above"),
        }
    }

    /// Chooses the next block to request from a peer holding `remote`.
    ///
    /// Pieces are scanned in ascending index order; complete pieces are
    /// skipped and pieces already in flight are finished before new ones are
    /// started. Within a piece the lowest-offset block that is neither
    /// received nor freshly reserved is handed out, and the reservation is
    /// recorded for `session`.
    pub fn next_request(&self, remote: &Bitfield, session: SessionId) -> Option<BlockRef> {
        let mut state = self.state.lock();
        let now = Instant::now();

        // Finish in-flight pieces first.
        for index in 0..state.pieces.len() {
            if !remote.has(index) {
                continue;
            }
            if let PieceState::InFlight(_) = state.pieces[index] {
                if let Some(block) = self.claim_block(&mut state, index, session, now) {
                    return Some(block);
                }
            }
        }

        // Then open the lowest absent piece.
        for index in 0..state.pieces.len() {
            if !remote.has(index) {
                continue;
            }
            if let PieceState::Absent = state.pieces[index] {
                state.pieces[index] = PieceState::InFlight(Assembly::new());
                if let Some(block) = self.claim_block(&mut state, index, session, now) {
                    return Some(block);
                }
            }
        }

        None
    }

    fn claim_block(
        &self,
        state: &mut StoreState,
        index: usize,
        session: SessionId,
        now: Instant,
    ) -> Option<BlockRef> {
        let piece_len = self.metainfo.info.piece_len(index);
        let assembly = match &mut state.pieces[index] {
            PieceState::InFlight(a) => a,
            _ => return None,
        };

        let mut begin = 0u64;
        while begin < piece_len {
            let offset = begin as u32;
            let length = (piece_len - begin).min(self.block_size as u64) as u32;

            let received = assembly.blocks.contains_key(&offset);
            let reserved = assembly
                .reservations
                .get(&offset)
                .is_some_and(|(_, since)| now.duration_since(*since) < self.request_timeout);

            if !received && !reserved {
                assembly.reservations.insert(offset, (session, now));
                return Some(BlockRef::new(index as u32, offset, length));
            }

            begin += self.block_size as u64;
        }

        None
    }

    /// Deposits a downloaded block.
    ///
    /// Releases the block's reservation. When the piece's blocks are all
    /// present the piece is hashed (outside the state lock): a match flushes
    /// it to disk at `index * piece_length` and returns
    /// [`Deposit::Completed`]; a mismatch drops the buffer, marks the piece
    /// absent again, and returns [`Deposit::Corrupt`]. Re-delivery of a
    /// block that is already present returns [`Deposit::Duplicate`] and
    /// changes nothing, so a given region is persisted at most once.
    ///
    /// Blocks must sit on block-size boundaries and run to the next boundary
    /// (or the end of the piece); anything else is out of range.
    pub async fn deposit_block(
        &self,
        piece: u32,
        begin: u32,
        data: Bytes,
    ) -> Result<Deposit, StorageError> {
        let piece_len = self.checked_piece_len(piece)?;
        let expected_len = (piece_len.saturating_sub(begin as u64)).min(self.block_size as u64);
        if begin % self.block_size != 0
            || begin as u64 >= piece_len
            || data.len() as u64 != expected_len
        {
            return Err(StorageError::OutOfRange {
                piece,
                begin,
                length: data.len() as u32,
            });
        }

        let assembled = {
            let mut state = self.state.lock();
            let slot = &mut state.pieces[piece as usize];

            if let PieceState::Absent = slot {
                *slot = PieceState::InFlight(Assembly::new());
            }

            let assembly = match slot {
                PieceState::Complete => return Ok(Deposit::Duplicate),
                PieceState::InFlight(a) => a,
                PieceState::Absent => unreachable!("transitioned above"),
            };

            if assembly.blocks.contains_key(&begin) {
                return Ok(Deposit::Duplicate);
            }

            assembly.blocks.insert(begin, data);
            assembly.reservations.remove(&begin);

            if !piece_is_full(assembly, piece_len, self.block_size) {
                return Ok(Deposit::Accepted);
            }

            // Snapshot for verification; the piece stays in flight (with no
            // requestable blocks) until the verdict lands.
            let mut snapshot = Vec::with_capacity(piece_len as usize);
            let mut offset = 0u64;
            while offset < piece_len {
                snapshot.extend_from_slice(&assembly.blocks[&(offset as u32)]);
                offset += self.block_size as u64;
            }
            snapshot
        };

        let expected = *self.metainfo.info.piece_hash(piece as usize);
        let (valid, assembled) =
            tokio::task::spawn_blocking(move || (hash_piece(&assembled) == expected, assembled))
                .await
                .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        if !valid {
            let mut state = self.state.lock();
            state.pieces[piece as usize] = PieceState::Absent;
            tracing::warn!("piece {} failed verification, dropped", piece);
            return Ok(Deposit::Corrupt);
        }

        let offset = piece as u64 * self.metainfo.info.piece_length;
        {
            let mut file = self.file.lock().await;
            file.seek(SeekFrom::Start(offset)).await?;
            file.write_all(&assembled).await?;
        }

        let mut state = self.state.lock();
        state.pieces[piece as usize] = PieceState::Complete;
        tracing::debug!("piece {} complete", piece);
        Ok(Deposit::Completed)
    }

    /// Drops every reservation held by a departed session, making its
    /// in-flight blocks immediately requestable again.
    pub fn release_session(&self, session: SessionId) {
        let mut state = self.state.lock();
        for slot in state.pieces.iter_mut() {
            if let PieceState::InFlight(assembly) = slot {
                assembly
                    .reservations
                    .retain(|_, (holder, _)| *holder != session);
                if assembly.blocks.is_empty() && assembly.reservations.is_empty() {
                    *slot = PieceState::Absent;
                }
            }
        }
    }

    /// Flushes file data to disk.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let file = self.file.lock().await;
        file.sync_data().await?;
        Ok(())
    }

    fn checked_piece_len(&self, piece: u32) -> Result<u64, StorageError> {
        if (piece as usize) < self.metainfo.info.num_pieces() {
            Ok(self.metainfo.info.piece_len(piece as usize))
        } else {
            Err(StorageError::InvalidPiece(piece))
        }
    }
}

fn piece_is_full(assembly: &Assembly, piece_len: u64, block_size: u32) -> bool {
    let expected = piece_len.div_ceil(block_size as u64) as usize;
    assembly.blocks.len() == expected
}

fn hash_piece(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}
