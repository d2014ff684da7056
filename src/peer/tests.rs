use super::*;
use bytes::Bytes;

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1.0, id2.0);
    assert_eq!(id1.client_id(), Some("LB0001"));
}

#[test]
fn test_bitfield() {
    let mut bf = Bitfield::new(100);
    assert!(!bf.has(0));

    bf.set(0);
    assert!(bf.has(0));

    bf.set(99);
    assert!(bf.has(99));

    bf.clear(0);
    assert!(!bf.has(0));

    assert_eq!(bf.count(), 1);
}

#[test]
fn test_bitfield_wire_shape() {
    // 10 pieces pack into 2 bytes with 6 zero pad bits
    let mut bf = Bitfield::new(10);
    for i in 0..10 {
        bf.set(i);
    }
    let bytes = bf.to_bytes();
    assert_eq!(bytes.len(), 2);
    assert_eq!(bytes[0], 0xFF);
    assert_eq!(bytes[1], 0xC0);
}

#[test]
fn test_bitfield_from_message() {
    let bytes = Bytes::from_static(&[0x80, 0x00]);
    let bf = Bitfield::from_message(&bytes, 16).unwrap();

    assert!(bf.has(0));
    assert!(!bf.has(1));
}

#[test]
fn test_bitfield_from_message_rejects_bad_shape() {
    // wrong length
    assert!(Bitfield::from_message(&Bytes::from_static(&[0x00]), 16).is_none());
    // pad bit set: 10 pieces leave the low 6 bits of byte 1 as padding
    assert!(Bitfield::from_message(&Bytes::from_static(&[0x00, 0x01]), 10).is_none());
}

#[test]
fn test_bitfield_interest() {
    let mut theirs = Bitfield::new(4);
    let mut ours = Bitfield::new(4);

    theirs.set(2);
    assert!(theirs.has_piece_missing_from(&ours));

    ours.set(2);
    assert!(!theirs.has_piece_missing_from(&ours));
}

#[test]
fn test_handshake_encode_decode() {
    let info_hash = [1u8; 20];
    let peer_id = [2u8; 20];

    let handshake = Handshake::new(info_hash, peer_id);
    let encoded = handshake.encode();
    assert_eq!(encoded.len(), HANDSHAKE_LEN);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, info_hash);
    assert_eq!(decoded.peer_id, peer_id);
    assert_eq!(decoded.reserved, [0u8; 8]);
}

#[test]
fn test_handshake_rejects_bad_pstrlen() {
    let mut encoded = Handshake::new([1u8; 20], [2u8; 20]).encode().to_vec();
    encoded[0] = 20;
    assert!(matches!(
        Handshake::decode(&encoded),
        Err(PeerError::BadHandshake)
    ));
}

#[test]
fn test_handshake_rejects_bad_pstr() {
    let mut encoded = Handshake::new([1u8; 20], [2u8; 20]).encode().to_vec();
    encoded[1] = b'X';
    assert!(matches!(
        Handshake::decode(&encoded),
        Err(PeerError::BadHandshake)
    ));
}

#[test]
fn test_message_encode_decode() {
    let messages = vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
        Message::Bitfield(Bytes::from_static(&[0xA0])),
        Message::Request {
            index: 1,
            begin: 16384,
            length: 16384,
        },
        Message::Piece {
            index: 1,
            begin: 0,
            data: Bytes::from_static(b"block data"),
        },
        Message::Cancel {
            index: 1,
            begin: 0,
            length: 16384,
        },
    ];

    for msg in messages {
        let encoded = msg.clone().encode();
        let decoded = Message::decode(encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}

#[test]
fn test_message_unknown_id_ignored() {
    // length 1, id 20 (extension protocol, which we don't speak)
    let frame = Bytes::from_static(&[0, 0, 0, 1, 20]);
    assert_eq!(Message::decode(frame).unwrap(), Message::Unknown { id: 20 });
}

#[test]
fn test_message_malformed_payload() {
    // Have with a 2-byte payload
    let frame = Bytes::from_static(&[0, 0, 0, 3, 4, 0, 0]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::Malformed(_))
    ));
}

#[test]
fn test_keep_alive_is_zero_length() {
    assert_eq!(Message::KeepAlive.encode().as_ref(), &[0, 0, 0, 0]);
}
