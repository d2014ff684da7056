use super::*;
use crate::config::EngineConfig;
use crate::metainfo::{Metainfo, TorrentBuilder};
use crate::peer::{Handshake, HANDSHAKE_LEN};
use crate::tracker::TrackerServer;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn test_payload(len: usize) -> Vec<u8> {
    // Deterministic but non-repeating enough to catch offset bugs.
    (0..len).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

fn quick_config() -> EngineConfig {
    EngineConfig {
        announce_interval: Duration::from_secs(2),
        backoff_base: Duration::from_millis(200),
        dial_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}

async fn start_tracker() -> (String, std::sync::Arc<crate::tracker::Swarm>) {
    let server = TrackerServer::bind(0).await.unwrap();
    let addr = server.local_addr().unwrap();
    let swarm = server.swarm();
    tokio::spawn(server.run());
    (format!("http://{}/announce", addr), swarm)
}

fn make_torrent(announce: &str, data: &[u8], piece_length: u64) -> Metainfo {
    TorrentBuilder::new(announce)
        .piece_length(piece_length)
        .build_from_bytes("payload.bin".to_string(), data)
        .unwrap()
}

async fn seed_dir(data: &[u8]) -> TempDir {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join("payload.bin"), data)
        .await
        .unwrap();
    dir
}

async fn wait_complete(engine: &Engine, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if engine.is_complete() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// Later joiners only learn about peers from their own announce response, so
// tests wait until the earlier engines are registered before starting the
// next one.
async fn wait_registered(swarm: &crate::tracker::Swarm, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if swarm.stats().first().map(|s| s.peers).unwrap_or(0) >= count {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "engines never registered with the tracker"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_node_transfer() {
    let (announce, swarm) = start_tracker().await;
    let data = test_payload(300_000);
    let metainfo = make_torrent(&announce, &data, 262144);
    assert_eq!(metainfo.info.num_pieces(), 2);

    let seeder_dir = seed_dir(&data).await;
    let seeder = Engine::start(metainfo.clone(), seeder_dir.path(), quick_config())
        .await
        .unwrap();
    assert!(seeder.is_complete());
    wait_registered(&swarm, 1).await;

    let leecher_dir = TempDir::new().unwrap();
    let leecher = Engine::start(metainfo, leecher_dir.path(), quick_config())
        .await
        .unwrap();

    assert!(
        wait_complete(&leecher, Duration::from_secs(10)).await,
        "leecher did not complete in time"
    );
    assert_eq!(leecher.bytes_left(), 0);
    assert_eq!(leecher.downloaded(), 300_000);

    let received = tokio::fs::read(leecher_dir.path().join("payload.bin"))
        .await
        .unwrap();
    assert_eq!(received, data);

    leecher.shutdown().await.unwrap();
    seeder.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_node_swarm() {
    let (announce, swarm) = start_tracker().await;
    let data = test_payload(1_048_576);
    let metainfo = make_torrent(&announce, &data, 262144);
    assert_eq!(metainfo.info.num_pieces(), 4);

    let seeder_dir = seed_dir(&data).await;
    let seeder = Engine::start(metainfo.clone(), seeder_dir.path(), quick_config())
        .await
        .unwrap();
    wait_registered(&swarm, 1).await;

    let dir_a = TempDir::new().unwrap();
    let leecher_a = Engine::start(metainfo.clone(), dir_a.path(), quick_config())
        .await
        .unwrap();
    wait_registered(&swarm, 2).await;

    let dir_b = TempDir::new().unwrap();
    let leecher_b = Engine::start(metainfo.clone(), dir_b.path(), quick_config())
        .await
        .unwrap();

    assert!(wait_complete(&leecher_a, Duration::from_secs(20)).await);
    assert!(wait_complete(&leecher_b, Duration::from_secs(20)).await);

    assert_eq!(leecher_a.downloaded(), 1_048_576);
    assert_eq!(leecher_b.downloaded(), 1_048_576);

    for dir in [&dir_a, &dir_b] {
        let received = tokio::fs::read(dir.path().join("payload.bin")).await.unwrap();
        assert_eq!(received, data);
    }

    // The seeder never requests anything, so leecher uploads can only have
    // gone to the other leecher: a nonzero sum means at least one leecher
    // was served by its peer rather than by the seeder alone.
    let leecher_uploads = leecher_a.uploaded() + leecher_b.uploaded();
    assert!(
        leecher_uploads > 0,
        "every byte came from the seeder; no inter-leecher exchange"
    );
    assert!(seeder.uploaded() < 2 * 1_048_576);

    // Both leechers fire their completed announce; the tracker ends up with
    // three seeders.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = swarm.stats();
        if stats.first().map(|s| s.seeders) == Some(3) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "tracker never saw 3 seeders: {:?}",
            stats.first().map(|s| (s.peers, s.seeders))
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    leecher_a.shutdown().await.unwrap();
    leecher_b.shutdown().await.unwrap();
    seeder.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resume_skips_verified_pieces() {
    let (announce, swarm) = start_tracker().await;
    let data = test_payload(300_000);
    let metainfo = make_torrent(&announce, &data, 262144);

    let seeder_dir = seed_dir(&data).await;
    let seeder = Engine::start(metainfo.clone(), seeder_dir.path(), quick_config())
        .await
        .unwrap();
    wait_registered(&swarm, 1).await;

    // A leecher that died holding piece 0: the file exists at full size with
    // piece 0 intact and piece 1 garbage.
    let leecher_dir = TempDir::new().unwrap();
    let mut partial = data.clone();
    for byte in &mut partial[262144..] {
        *byte = 0;
    }
    tokio::fs::write(leecher_dir.path().join("payload.bin"), &partial)
        .await
        .unwrap();

    let leecher = Engine::start(metainfo, leecher_dir.path(), quick_config())
        .await
        .unwrap();

    // Rehash found piece 0 on disk, so only piece 1 is left to fetch.
    assert!(leecher.bytes_left() <= 300_000 - 262144);

    assert!(wait_complete(&leecher, Duration::from_secs(10)).await);
    assert_eq!(leecher.downloaded(), 300_000 - 262144);

    let received = tokio::fs::read(leecher_dir.path().join("payload.bin"))
        .await
        .unwrap();
    assert_eq!(received, data);

    leecher.shutdown().await.unwrap();
    seeder.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_handshake_probe_leaves_engine_live() {
    let (announce, _) = start_tracker().await;
    let data = test_payload(40_000);
    let metainfo = make_torrent(&announce, &data, 32768);

    let seeder_dir = seed_dir(&data).await;
    let seeder = Engine::start(metainfo.clone(), seeder_dir.path(), quick_config())
        .await
        .unwrap();
    let port = seeder.listen_port();

    // Probe with pstrlen = 20: the engine closes the socket without
    // replying.
    let mut probe = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut bad = Handshake::new(*metainfo.info_hash.as_bytes(), [9u8; 20])
        .encode()
        .to_vec();
    bad[0] = 20;
    probe.write_all(&bad).await.unwrap();
    let mut buf = Vec::new();
    let n = probe.read_to_end(&mut buf).await.unwrap();
    assert_eq!(n, 0, "engine must not answer a malformed handshake");

    // The engine stays live for well-behaved peers.
    let mut good = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let ours = Handshake::new(*metainfo.info_hash.as_bytes(), [9u8; 20]);
    good.write_all(&ours.encode()).await.unwrap();
    let mut reply = [0u8; HANDSHAKE_LEN];
    good.read_exact(&mut reply).await.unwrap();
    let theirs = Handshake::decode(&reply).unwrap();
    assert_eq!(theirs.info_hash, *metainfo.info_hash.as_bytes());

    seeder.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mismatched_info_hash_closes_without_reply() {
    let (announce, _) = start_tracker().await;
    let data = test_payload(40_000);
    let metainfo = make_torrent(&announce, &data, 32768);

    let seeder_dir = seed_dir(&data).await;
    let seeder = Engine::start(metainfo, seeder_dir.path(), quick_config())
        .await
        .unwrap();

    let mut probe = TcpStream::connect(("127.0.0.1", seeder.listen_port()))
        .await
        .unwrap();
    let wrong = Handshake::new([0xEE; 20], [9u8; 20]);
    probe.write_all(&wrong.encode()).await.unwrap();

    let mut buf = Vec::new();
    let n = probe.read_to_end(&mut buf).await.unwrap();
    assert_eq!(n, 0, "no bytes may follow a mismatched handshake");

    seeder.shutdown().await.unwrap();
}
