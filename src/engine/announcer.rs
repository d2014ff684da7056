//! The announce loop.
//!
//! Announces `started` on startup, re-announces at the tracker's advertised
//! interval, fires `completed` on the first all-ones bitfield transition,
//! and sends a best-effort `stopped` on shutdown. Fresh peer lists flow to
//! the supervisor after every successful announce. Tracker failures are
//! logged and retried at the next interval; they never stop the engine.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::Shared;
use crate::tracker::{TrackerClient, TrackerError, TrackerEvent};

pub(crate) struct Announcer {
    shared: Arc<Shared>,
    tracker: TrackerClient,
    port: u16,
    peers_tx: mpsc::Sender<Vec<SocketAddr>>,
    completed_rx: mpsc::Receiver<()>,
}

impl Announcer {
    pub fn new(
        shared: Arc<Shared>,
        tracker: TrackerClient,
        port: u16,
        peers_tx: mpsc::Sender<Vec<SocketAddr>>,
        completed_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            shared,
            tracker,
            port,
            peers_tx,
            completed_rx,
        }
    }

    pub async fn run(mut self) {
        let mut shutdown = self.shared.shutdown.clone();
        let mut interval = self.shared.config.announce_interval;

        // A peer that starts as a seeder never transitions to complete, so
        // it never sends the completed event.
        let mut completed_sent = self.shared.store.is_complete();

        if let Some(next) = self.announce(TrackerEvent::Started).await {
            interval = next;
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,

                _ = tokio::time::sleep(interval) => {
                    if let Some(next) = self.announce(TrackerEvent::None).await {
                        interval = next;
                    }
                }

                nudge = self.completed_rx.recv() => {
                    match nudge {
                        Some(()) if !completed_sent => {
                            completed_sent = true;
                            if let Some(next) = self.announce(TrackerEvent::Completed).await {
                                interval = next;
                            }
                        }
                        Some(()) => {}
                        None => break,
                    }
                }
            }
        }

        // Best effort; the tracker will evict us anyway if this is lost.
        if let Err(e) = self.send(TrackerEvent::Stopped).await {
            tracing::debug!("stopped announce failed: {}", e);
        }
    }

    // Announces and forwards the peer list; returns the next interval.
    async fn announce(&self, event: TrackerEvent) -> Option<Duration> {
        match self.send(event).await {
            Ok((interval, peers)) => {
                if !peers.is_empty() {
                    let _ = self.peers_tx.send(peers).await;
                }
                Some(interval.max(Duration::from_secs(1)))
            }
            Err(e) => {
                tracing::warn!("tracker announce failed: {}", e);
                None
            }
        }
    }

    async fn send(
        &self,
        event: TrackerEvent,
    ) -> Result<(Duration, Vec<SocketAddr>), TrackerError> {
        let response = self
            .tracker
            .announce(
                &self.shared.info_hash,
                &self.shared.our_id,
                self.port,
                self.shared.uploaded.load(Ordering::Relaxed),
                self.shared.downloaded.load(Ordering::Relaxed),
                self.shared.store.bytes_left(),
                event,
            )
            .await?;

        tracing::debug!(
            "announced {:?}: {} peers, interval {}s",
            event,
            response.peers.len(),
            response.interval
        );

        Ok((
            Duration::from_secs(response.interval as u64),
            response.peers,
        ))
    }
}
