use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use super::error::TrackerError;
use super::response::TrackerEvent;
use super::swarm::{Swarm, SwarmStats};
use crate::bencode::{encode, Value};
use crate::metainfo::InfoHash;

/// Advisory re-announce cadence handed to peers.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(120);
/// Peers silent for longer than this are evicted.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(180);

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REQUEST_BYTES: usize = 8192;

/// The tracker's HTTP endpoint.
///
/// Serves `GET /announce` and `GET /stats`. The HTTP layer is parsed by
/// hand because `info_hash` and `peer_id` arrive as percent-encoded raw
/// bytes and must not pass through UTF-8 query decoding.
///
/// # Examples
///
/// ```no_run
/// use lanbit::tracker::TrackerServer;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = TrackerServer::bind(8000).await?;
/// println!("announce URL: http://localhost:8000/announce");
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct TrackerServer {
    listener: TcpListener,
    swarm: Arc<Swarm>,
}

impl TrackerServer {
    /// Binds the listener. Port 0 picks an ephemeral port.
    pub async fn bind(port: u16) -> Result<Self, TrackerError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Self {
            listener,
            swarm: Arc::new(Swarm::new()),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the peer tables.
    pub fn swarm(&self) -> Arc<Swarm> {
        self.swarm.clone()
    }

    /// Serves requests until the task is cancelled.
    ///
    /// A background sweep evicts peers that have stopped announcing.
    pub async fn run(self) -> Result<(), TrackerError> {
        let sweeper_swarm = self.swarm.clone();
        let sweeper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await;
            loop {
                tick.tick().await;
                sweeper_swarm.evict_stale(PEER_TIMEOUT);
            }
        });

        let result = self.accept_loop().await;
        sweeper.abort();
        result
    }

    async fn accept_loop(&self) -> Result<(), TrackerError> {
        loop {
            let (stream, source) = self.listener.accept().await?;
            let swarm = self.swarm.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, source, swarm).await {
                    tracing::debug!("request from {} failed: {}", source, e);
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    source: SocketAddr,
    swarm: Arc<Swarm>,
) -> Result<(), TrackerError> {
    let request = timeout(REQUEST_TIMEOUT, read_request(&mut stream))
        .await
        .map_err(|_| TrackerError::InvalidResponse("request timed out".into()))??;

    let target = match parse_request_line(&request) {
        Some(target) => target,
        None => {
            return respond(
                &mut stream,
                "400 Bad Request",
                "text/plain",
                b"bad request",
            )
            .await
        }
    };

    let (path, query) = match target.iter().position(|&b| b == b'?') {
        Some(i) => (&target[..i], &target[i + 1..]),
        None => (&target[..], &b""[..]),
    };

    match path {
        b"/announce" => handle_announce(&mut stream, source, &swarm, query).await,
        b"/stats" => handle_stats(&mut stream, &swarm.stats()).await,
        _ => respond(&mut stream, "404 Not Found", "text/plain", b"not found").await,
    }
}

async fn handle_announce(
    stream: &mut TcpStream,
    source: SocketAddr,
    swarm: &Swarm,
    query: &[u8],
) -> Result<(), TrackerError> {
    let params = parse_query(query);

    let info_hash = match param(&params, b"info_hash") {
        Some(v) if v.len() == 20 => {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(v);
            InfoHash(hash)
        }
        _ => return announce_failure(stream, "missing or invalid info_hash").await,
    };

    let peer_id = match param(&params, b"peer_id") {
        Some(v) if v.len() == 20 => {
            let mut id = [0u8; 20];
            id.copy_from_slice(v);
            id
        }
        _ => return announce_failure(stream, "missing or invalid peer_id").await,
    };

    let port: u16 = match param(&params, b"port")
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|s| s.parse().ok())
    {
        Some(p) => p,
        None => return announce_failure(stream, "missing or invalid port").await,
    };

    let left: Option<u64> = param(&params, b"left")
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|s| s.parse().ok());

    let event = param(&params, b"event")
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(TrackerEvent::from_query)
        .unwrap_or(TrackerEvent::None);

    let compact = param(&params, b"compact").map(|v| v == b"1").unwrap_or(false);

    let peer_addr = SocketAddr::new(source.ip(), port);
    swarm.announce(info_hash, peer_id, peer_addr, left, event);

    let peers = swarm.peers_for(&info_hash, peer_addr);

    let peers_value = if compact {
        let mut packed = Vec::with_capacity(peers.len() * 6);
        for peer in &peers {
            if let std::net::IpAddr::V4(ip) = peer.addr.ip() {
                packed.extend_from_slice(&ip.octets());
                packed.extend_from_slice(&peer.addr.port().to_be_bytes());
            }
        }
        Value::Bytes(Bytes::from(packed))
    } else {
        Value::List(
            peers
                .iter()
                .map(|peer| {
                    let mut dict = BTreeMap::new();
                    dict.insert(
                        Bytes::from_static(b"ip"),
                        Value::text(&peer.addr.ip().to_string()),
                    );
                    dict.insert(
                        Bytes::from_static(b"peer id"),
                        Value::Bytes(Bytes::copy_from_slice(&peer.peer_id)),
                    );
                    dict.insert(
                        Bytes::from_static(b"port"),
                        Value::Integer(peer.addr.port() as i64),
                    );
                    Value::Dict(dict)
                })
                .collect(),
        )
    };

    let mut response = BTreeMap::new();
    response.insert(
        Bytes::from_static(b"interval"),
        Value::Integer(ANNOUNCE_INTERVAL.as_secs() as i64),
    );
    response.insert(Bytes::from_static(b"peers"), peers_value);

    let body = encode(&Value::Dict(response));
    respond(stream, "200 OK", "text/plain", &body).await
}

async fn announce_failure(stream: &mut TcpStream, reason: &str) -> Result<(), TrackerError> {
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"failure reason"), Value::text(reason));
    let body = encode(&Value::Dict(dict));
    respond(stream, "400 Bad Request", "text/plain", &body).await
}

async fn handle_stats(stream: &mut TcpStream, stats: &[SwarmStats]) -> Result<(), TrackerError> {
    let mut body = String::new();
    body.push_str("<html><head><title>Tracker Stats</title></head><body>");
    body.push_str("<h1>Tracker Statistics</h1>");
    body.push_str(&format!("<p>Active torrents: {}</p>", stats.len()));
    body.push_str(
        "<table border='1'><tr><th>Info Hash</th><th>Peers</th>\
         <th>Seeders</th><th>Leechers</th></tr>",
    );
    for stat in stats {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            stat.info_hash, stat.peers, stat.seeders, stat.leechers
        ));
    }
    body.push_str("</table></body></html>");

    respond(stream, "200 OK", "text/html", body.as_bytes()).await
}

async fn read_request(stream: &mut TcpStream) -> Result<BytesMut, TrackerError> {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 || buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(buf);
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(TrackerError::InvalidResponse("request too large".into()));
        }
    }
}

// Returns the request target of a `GET <target> HTTP/1.x` request line.
fn parse_request_line(request: &[u8]) -> Option<Vec<u8>> {
    let line_end = request.windows(2).position(|w| w == b"\r\n")?;
    let line = &request[..line_end];

    let mut parts = line.split(|&b| b == b' ');
    if parts.next() != Some(b"GET".as_ref()) {
        return None;
    }
    parts.next().map(|t| t.to_vec())
}

fn parse_query(query: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    query
        .split(|&b| b == b'&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.iter().position(|&b| b == b'=') {
            Some(i) => (percent_decode(&pair[..i]), percent_decode(&pair[i + 1..])),
            None => (percent_decode(pair), Vec::new()),
        })
        .collect()
}

fn param<'a>(params: &'a [(Vec<u8>, Vec<u8>)], key: &[u8]) -> Option<&'a [u8]> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_slice())
}

// Percent-decoding over raw bytes; '+' stays literal, matching what
// BitTorrent clients emit for the binary digests.
fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' {
            if let Some(hex) = input
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
            {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

async fn respond(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &[u8],
) -> Result<(), TrackerError> {
    let header = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}
