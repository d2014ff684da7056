use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Client;

use super::error::TrackerError;
use super::response::{parse_compact_peers, AnnounceResponse, TrackerEvent};
use crate::bencode::decode;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;

/// The announce half of the tracker contract.
///
/// Issues HTTP announces and parses the bencoded response, accepting both
/// the compact packed-bytes peer list and the dictionary form.
///
/// # Examples
///
/// ```no_run
/// use lanbit::metainfo::InfoHash;
/// use lanbit::peer::PeerId;
/// use lanbit::tracker::{TrackerClient, TrackerEvent};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = TrackerClient::new(
///     "http://192.168.1.10:8000/announce",
///     Duration::from_secs(30),
/// )?;
///
/// let response = client
///     .announce(
///         &InfoHash([0u8; 20]),
///         &PeerId::generate(),
///         6881,
///         0,       // uploaded
///         0,       // downloaded
///         1000,    // left
///         TrackerEvent::Started,
///     )
///     .await?;
///
/// println!("{} peers, interval {}s", response.peers.len(), response.interval);
/// # Ok(())
/// # }
/// ```
pub struct TrackerClient {
    client: Client,
    url: String,
}

impl TrackerClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TrackerError::Http)?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn announce(
        &self,
        info_hash: &InfoHash,
        peer_id: &PeerId,
        port: u16,
        uploaded: u64,
        downloaded: u64,
        left: u64,
        event: TrackerEvent,
    ) -> Result<AnnounceResponse, TrackerError> {
        let mut url = format!(
            "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            self.url,
            info_hash.url_encode(),
            peer_id.url_encode(),
            port,
            uploaded,
            downloaded,
            left
        );

        let event_str = event.as_str();
        if !event_str.is_empty() {
            url.push_str(&format!("&event={}", event_str));
        }

        let response = self.client.get(&url).send().await?;
        let bytes = response.bytes().await?;

        let value = decode(&bytes)?;
        if value.dict().is_none() {
            return Err(TrackerError::InvalidResponse("expected dictionary".into()));
        }

        if let Some(failure) = value.get_utf8(b"failure reason") {
            return Err(TrackerError::Failure(failure.to_string()));
        }

        let interval = value
            .get_integer(b"interval")
            .ok_or_else(|| TrackerError::InvalidResponse("missing interval".into()))?
            as u32;

        let mut peers: Vec<SocketAddr> = Vec::new();
        if let Some(peers_value) = value.get(b"peers") {
            if let Some(packed) = peers_value.bytes() {
                peers = parse_compact_peers(packed);
            } else if let Some(list) = peers_value.list() {
                for peer in list {
                    let ip = peer.get_utf8(b"ip").and_then(|s| s.parse().ok());
                    let port = peer.get_integer(b"port").map(|p| p as u16);

                    if let (Some(ip), Some(port)) = (ip, port) {
                        peers.push(SocketAddr::new(ip, port));
                    }
                }
            }
        }

        Ok(AnnounceResponse { interval, peers })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
