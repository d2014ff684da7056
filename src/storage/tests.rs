use super::*;
use crate::config::EngineConfig;
use crate::metainfo::{Metainfo, TorrentBuilder};
use crate::peer::{Bitfield, BlockRef};
use bytes::Bytes;
use tempfile::TempDir;

const BLOCK: usize = 16384;

fn test_config() -> EngineConfig {
    EngineConfig::default()
}

fn test_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn test_metainfo(data: &[u8], piece_length: u64) -> Metainfo {
    TorrentBuilder::new("http://127.0.0.1:9999/announce")
        .piece_length(piece_length)
        .build_from_bytes("payload.bin".to_string(), data)
        .unwrap()
}

async fn open_store(temp: &TempDir, data: &[u8], piece_length: u64) -> PieceStore {
    let metainfo = test_metainfo(data, piece_length);
    PieceStore::open(metainfo, temp.path(), &test_config())
        .await
        .unwrap()
}

async fn deposit_piece(store: &PieceStore, data: &[u8], piece: u32) -> Deposit {
    let piece_len = store.metainfo().info.piece_len(piece as usize) as usize;
    let start = piece as usize * store.metainfo().info.piece_length as usize;
    let mut outcome = Deposit::Accepted;
    let mut begin = 0usize;
    while begin < piece_len {
        let len = BLOCK.min(piece_len - begin);
        let chunk = Bytes::copy_from_slice(&data[start + begin..start + begin + len]);
        outcome = store
            .deposit_block(piece, begin as u32, chunk)
            .await
            .unwrap();
        begin += BLOCK;
    }
    outcome
}

#[tokio::test]
async fn test_open_creates_exact_size_file() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(100_000);
    let store = open_store(&temp, &data, 65536).await;

    let meta = tokio::fs::metadata(temp.path().join("payload.bin"))
        .await
        .unwrap();
    assert_eq!(meta.len(), 100_000);
    assert!(!store.is_complete());
    assert_eq!(store.bytes_left(), 100_000);
}

#[tokio::test]
async fn test_deposit_verify_and_read_back() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(40_000);
    let store = open_store(&temp, &data, 32768).await;

    assert_eq!(deposit_piece(&store, &data, 0).await, Deposit::Completed);
    assert!(store.have(0));
    assert!(!store.is_complete());

    assert_eq!(deposit_piece(&store, &data, 1).await, Deposit::Completed);
    assert!(store.is_complete());
    assert_eq!(store.bytes_left(), 0);

    let block = store.read_block(0, 0, 16384).await.unwrap();
    assert_eq!(block.as_ref(), &data[..16384]);

    let written = tokio::fs::read(temp.path().join("payload.bin"))
        .await
        .unwrap();
    assert_eq!(written, data);
}

#[tokio::test]
async fn test_corrupt_piece_is_dropped_and_recoverable() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(20_000);
    let store = open_store(&temp, &data, 32768).await;

    let mut flipped = data.clone();
    flipped[100] ^= 0xFF;
    assert_eq!(deposit_piece(&store, &flipped, 0).await, Deposit::Corrupt);
    assert!(!store.have(0));

    // The piece is absent again; a clean re-download completes it.
    assert_eq!(deposit_piece(&store, &data, 0).await, Deposit::Completed);
    assert!(store.is_complete());
}

#[tokio::test]
async fn test_duplicate_deposits() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(40_000);
    let store = open_store(&temp, &data, 32768).await;

    let chunk = Bytes::copy_from_slice(&data[..BLOCK]);
    assert_eq!(
        store.deposit_block(0, 0, chunk.clone()).await.unwrap(),
        Deposit::Accepted
    );
    assert_eq!(
        store.deposit_block(0, 0, chunk.clone()).await.unwrap(),
        Deposit::Duplicate
    );

    deposit_piece(&store, &data, 0).await;
    assert_eq!(
        store.deposit_block(0, 0, chunk).await.unwrap(),
        Deposit::Duplicate
    );
}

#[tokio::test]
async fn test_read_block_guards() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(40_000);
    let store = open_store(&temp, &data, 32768).await;

    assert!(matches!(
        store.read_block(0, 0, 100).await,
        Err(StorageError::PieceNotAvailable(0))
    ));

    deposit_piece(&store, &data, 0).await;
    assert!(matches!(
        store.read_block(0, 32760, 100).await,
        Err(StorageError::OutOfRange { .. })
    ));
    assert!(matches!(
        store.read_block(9, 0, 100).await,
        Err(StorageError::InvalidPiece(9))
    ));
}

#[tokio::test]
async fn test_next_request_policy() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(100_000);
    let store = open_store(&temp, &data, 32768).await;

    let mut remote = Bitfield::new(store.metainfo().info.num_pieces());
    for i in 0..remote.piece_count() {
        remote.set(i);
    }

    // Lowest piece, lowest offset first; subsequent calls advance through
    // the piece before opening the next one.
    let a = store.next_request(&remote, 1).unwrap();
    assert_eq!((a.piece_index, a.begin, a.length), (0, 0, 16384));
    let b = store.next_request(&remote, 1).unwrap();
    assert_eq!((b.piece_index, b.begin, b.length), (0, 16384, 16384));
    let c = store.next_request(&remote, 1).unwrap();
    assert_eq!((c.piece_index, c.begin), (1, 0));
}

#[tokio::test]
async fn test_next_request_prefers_in_flight_and_skips_complete() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(100_000);
    let store = open_store(&temp, &data, 32768).await;

    deposit_piece(&store, &data, 0).await;

    // Piece 2 is in flight, so it is finished before the untouched piece 1
    // is opened.
    store.reserve_block(BlockRef::new(2, 0, 16384), 7).unwrap();

    let next = store.next_request(&remote_all(&store), 7).unwrap();
    assert_eq!((next.piece_index, next.begin), (2, 16384));

    // With piece 2 fully reserved, the scan falls back to piece 1.
    let next = store.next_request(&remote_all(&store), 7).unwrap();
    assert_eq!(next.piece_index, 1);
}

fn remote_all(store: &PieceStore) -> Bitfield {
    let mut bf = Bitfield::new(store.metainfo().info.num_pieces());
    for i in 0..bf.piece_count() {
        bf.set(i);
    }
    bf
}

#[tokio::test]
async fn test_next_request_respects_remote_bitfield() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(100_000);
    let store = open_store(&temp, &data, 32768).await;

    let mut remote = Bitfield::new(store.metainfo().info.num_pieces());
    remote.set(2);

    let next = store.next_request(&remote, 1).unwrap();
    assert_eq!(next.piece_index, 2);
}

#[tokio::test]
async fn test_reservations_block_other_sessions() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(100_000);
    let store = open_store(&temp, &data, 32768).await;

    let block = BlockRef::new(0, 0, 16384);
    store.reserve_block(block, 1).unwrap();

    // Same session: idempotent. Other session: refused.
    store.reserve_block(block, 1).unwrap();
    assert!(matches!(
        store.reserve_block(block, 2),
        Err(StorageError::AlreadyReserved { .. })
    ));

    // Another session is steered to the next free block.
    let other = store.next_request(&remote_all(&store), 2).unwrap();
    assert_eq!((other.piece_index, other.begin), (0, 16384));
}

#[tokio::test]
async fn test_release_session_frees_reservations() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(100_000);
    let store = open_store(&temp, &data, 32768).await;

    let block = store.next_request(&remote_all(&store), 1).unwrap();
    store.release_session(1);

    // The exact same block is requestable again.
    let again = store.next_request(&remote_all(&store), 2).unwrap();
    assert_eq!(again, block);
}

#[tokio::test]
async fn test_wants_any() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(40_000);
    let store = open_store(&temp, &data, 32768).await;

    let mut remote = Bitfield::new(2);
    assert!(!store.wants_any(&remote));

    remote.set(0);
    assert!(store.wants_any(&remote));

    deposit_piece(&store, &data, 0).await;
    assert!(!store.wants_any(&remote));
}

#[tokio::test]
async fn test_resume_rehash() {
    let temp = TempDir::new().unwrap();
    let data = test_payload(100_000);
    let metainfo = test_metainfo(&data, 32768);

    {
        let store = PieceStore::open(metainfo.clone(), temp.path(), &test_config())
            .await
            .unwrap();
        deposit_piece(&store, &data, 0).await;
        deposit_piece(&store, &data, 2).await;
        store.flush().await.unwrap();
    }

    // Reopen: pieces 0 and 2 verify on disk, the rest are absent.
    let store = PieceStore::open(metainfo, temp.path(), &test_config())
        .await
        .unwrap();
    assert!(store.have(0));
    assert!(!store.have(1));
    assert!(store.have(2));
    assert!(!store.have(3));

    let expected_left: u64 = store.metainfo().info.piece_len(1) + store.metainfo().info.piece_len(3);
    assert_eq!(store.bytes_left(), expected_left);
}
