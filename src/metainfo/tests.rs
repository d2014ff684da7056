use super::*;

fn sample_torrent_bytes() -> Vec<u8> {
    TorrentBuilder::new("http://127.0.0.1:8000/announce")
        .piece_length(16384)
        .build_from_bytes("sample.bin".to_string(), &vec![7u8; 40000])
        .unwrap()
        .to_bytes()
        .unwrap()
}

#[test]
fn test_parse_roundtrip() {
    let bytes = sample_torrent_bytes();
    let metainfo = Metainfo::from_bytes(&bytes).unwrap();

    assert_eq!(metainfo.announce, "http://127.0.0.1:8000/announce");
    assert_eq!(metainfo.info.name, "sample.bin");
    assert_eq!(metainfo.info.piece_length, 16384);
    assert_eq!(metainfo.info.total_length, 40000);
    assert_eq!(metainfo.info.num_pieces(), 3);

    assert_eq!(metainfo.to_bytes().unwrap(), bytes);
}

#[test]
fn test_piece_len() {
    let bytes = sample_torrent_bytes();
    let metainfo = Metainfo::from_bytes(&bytes).unwrap();

    assert_eq!(metainfo.info.piece_len(0), 16384);
    assert_eq!(metainfo.info.piece_len(1), 16384);
    assert_eq!(metainfo.info.piece_len(2), 40000 - 2 * 16384);
}

#[test]
fn test_info_hash_stable() {
    let bytes = sample_torrent_bytes();
    let a = Metainfo::from_bytes(&bytes).unwrap();
    let b = Metainfo::from_bytes(&bytes).unwrap();

    assert_eq!(a.info_hash, b.info_hash);
    assert_eq!(a.info_hash.to_hex().len(), 40);
}

#[test]
fn test_builder_hashes_pieces() {
    let data = vec![3u8; 20000];
    let metainfo = TorrentBuilder::new("http://t/announce")
        .piece_length(16384)
        .build_from_bytes("x".to_string(), &data)
        .unwrap();

    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(&data[..16384]);
    let expected: [u8; 20] = hasher.finalize().into();
    assert_eq!(metainfo.info.pieces[0], expected);

    let mut hasher = Sha1::new();
    hasher.update(&data[16384..]);
    let expected: [u8; 20] = hasher.finalize().into();
    assert_eq!(metainfo.info.pieces[1], expected);
}

#[test]
fn test_missing_announce() {
    // A bare info dictionary with no announce key.
    let metainfo = TorrentBuilder::new("http://t/announce")
        .build_from_bytes("x".to_string(), b"hello")
        .unwrap();
    let mut bytes = b"d4:info".to_vec();
    bytes.extend_from_slice(metainfo.raw_info());
    bytes.push(b'e');

    assert!(matches!(
        Metainfo::from_bytes(&bytes),
        Err(MetainfoError::MissingField("announce"))
    ));
}

#[test]
fn test_piece_count_mismatch() {
    // length says two pieces but only one digest is present
    let bytes =
        b"d8:announce8:http://t4:infod6:lengthi20000e4:name1:x12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaaee";
    assert!(Metainfo::from_bytes(bytes).is_err());
}

#[test]
fn test_info_hash_hex_roundtrip() {
    let hash = InfoHash::from_info_bytes(b"d4:name1:xe");
    let parsed = InfoHash::from_hex(&hash.to_hex()).unwrap();
    assert_eq!(hash, parsed);
}

#[test]
fn test_info_hash_url_encode() {
    let hash = InfoHash([0xab; 20]);
    assert_eq!(hash.url_encode(), "%ab".repeat(20));
}
