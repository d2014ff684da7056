use super::*;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
}

#[test]
fn test_tracker_event_strings() {
    assert_eq!(TrackerEvent::Started.as_str(), "started");
    assert_eq!(TrackerEvent::Stopped.as_str(), "stopped");
    assert_eq!(TrackerEvent::Completed.as_str(), "completed");
    assert_eq!(TrackerEvent::None.as_str(), "");

    assert_eq!(TrackerEvent::from_query("started"), TrackerEvent::Started);
    assert_eq!(TrackerEvent::from_query(""), TrackerEvent::None);
    // unknown events are treated as absent
    assert_eq!(TrackerEvent::from_query("paused"), TrackerEvent::None);
}

#[test]
fn test_parse_compact_peers() {
    let data = [
        192, 168, 1, 1, 0x1A, 0xE1, // 192.168.1.1:6881
        10, 0, 0, 1, 0x1A, 0xE2, // 10.0.0.1:6882
    ];

    let peers = parse_compact_peers(&data);
    assert_eq!(peers.len(), 2);
    assert_eq!(peers[0], "192.168.1.1:6881".parse().unwrap());
    assert_eq!(peers[1], "10.0.0.1:6882".parse().unwrap());

    // trailing partial entries are ignored
    assert_eq!(parse_compact_peers(&data[..8]).len(), 1);
}

#[test]
fn test_swarm_announce_and_exclusion() {
    let swarm = Swarm::new();
    let hash = InfoHash([1u8; 20]);

    swarm.announce(hash, [1u8; 20], addr(6881), Some(100), TrackerEvent::Started);
    swarm.announce(hash, [2u8; 20], addr(6882), Some(0), TrackerEvent::None);

    let peers = swarm.peers_for(&hash, addr(6881));
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].addr, addr(6882));

    let peers = swarm.peers_for(&hash, addr(9999));
    assert_eq!(peers.len(), 2);
}

#[test]
fn test_swarm_stopped_removes_peer() {
    let swarm = Swarm::new();
    let hash = InfoHash([1u8; 20]);

    swarm.announce(hash, [1u8; 20], addr(6881), Some(100), TrackerEvent::Started);
    swarm.announce(hash, [1u8; 20], addr(6881), Some(50), TrackerEvent::Stopped);

    assert!(swarm.peers_for(&hash, addr(9999)).is_empty());
    assert!(swarm.stats().is_empty());
}

#[test]
fn test_swarm_eviction() {
    let swarm = Swarm::new();
    let hash = InfoHash([1u8; 20]);

    swarm.announce(hash, [1u8; 20], addr(6881), Some(100), TrackerEvent::Started);

    swarm.evict_stale(Duration::from_secs(180));
    assert_eq!(swarm.peers_for(&hash, addr(9999)).len(), 1);

    swarm.evict_stale(Duration::ZERO);
    assert!(swarm.peers_for(&hash, addr(9999)).is_empty());
}

#[test]
fn test_swarm_seeder_leecher_stats() {
    let swarm = Swarm::new();
    let hash = InfoHash([1u8; 20]);

    swarm.announce(hash, [1u8; 20], addr(6881), Some(0), TrackerEvent::None);
    swarm.announce(hash, [2u8; 20], addr(6882), Some(512), TrackerEvent::None);
    swarm.announce(
        hash,
        [3u8; 20],
        addr(6883),
        Some(512),
        TrackerEvent::Completed,
    );

    let stats = swarm.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].peers, 3);
    assert_eq!(stats[0].seeders, 2);
    assert_eq!(stats[0].leechers, 1);
}

#[test]
fn test_client_rejects_non_http_url() {
    assert!(matches!(
        TrackerClient::new("udp://tracker.example.com", Duration::from_secs(30)),
        Err(TrackerError::InvalidUrl(_))
    ));
}

async fn spawn_server() -> (String, std::net::SocketAddr) {
    let server = TrackerServer::bind(0).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (format!("http://{}/announce", addr), addr)
}

#[tokio::test]
async fn test_announce_roundtrip() {
    let (url, _) = spawn_server().await;
    let client = TrackerClient::new(&url, Duration::from_secs(5)).unwrap();
    let hash = InfoHash([7u8; 20]);

    let a = PeerId::generate();
    let response = client
        .announce(&hash, &a, 6881, 0, 0, 1000, TrackerEvent::Started)
        .await
        .unwrap();
    assert_eq!(response.interval, 120);
    assert!(response.peers.is_empty());

    let b = PeerId::generate();
    let response = client
        .announce(&hash, &b, 6882, 0, 0, 1000, TrackerEvent::Started)
        .await
        .unwrap();
    assert_eq!(response.peers, vec!["127.0.0.1:6881".parse().unwrap()]);
}

#[tokio::test]
async fn test_announce_stopped_clears_peer() {
    let (url, _) = spawn_server().await;
    let client = TrackerClient::new(&url, Duration::from_secs(5)).unwrap();
    let hash = InfoHash([8u8; 20]);

    let a = PeerId::generate();
    client
        .announce(&hash, &a, 6881, 0, 0, 1000, TrackerEvent::Started)
        .await
        .unwrap();
    client
        .announce(&hash, &a, 6881, 0, 0, 1000, TrackerEvent::Stopped)
        .await
        .unwrap();

    let b = PeerId::generate();
    let response = client
        .announce(&hash, &b, 6882, 0, 0, 1000, TrackerEvent::Started)
        .await
        .unwrap();
    assert!(response.peers.is_empty());
}

#[tokio::test]
async fn test_announce_missing_info_hash_fails() {
    let (url, addr) = spawn_server().await;

    // A hand-built announce with no info_hash at all.
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let path = url.strip_prefix(&format!("http://{}", addr)).unwrap();
    stream
        .write_all(format!("GET {}?port=6881 HTTP/1.1\r\n\r\n", path).as_bytes())
        .await
        .unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400"));
    assert!(text.contains("failure reason"));
}

#[tokio::test]
async fn test_stats_page() {
    let (url, addr) = spawn_server().await;
    let client = TrackerClient::new(&url, Duration::from_secs(5)).unwrap();
    let hash = InfoHash([9u8; 20]);

    client
        .announce(&hash, &PeerId::generate(), 6881, 0, 0, 0, TrackerEvent::None)
        .await
        .unwrap();

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /stats HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(text.contains("Tracker Statistics"));
    assert!(text.contains(&hash.to_hex()));
}
