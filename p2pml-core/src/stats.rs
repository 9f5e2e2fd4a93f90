//! Download/upload accounting from engine events.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::protocol::{CoreEvent, DownloadSource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct P2PStats {
    pub bytes_downloaded_http: u64,
    pub bytes_downloaded_p2p: u64,
    pub bytes_uploaded: u64,
    pub connected_peers: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: P2PStats,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, event: &CoreEvent) {
        match event {
            CoreEvent::ChunkDownloaded {
                bytes_length,
                download_source: DownloadSource::Http,
            } => {
                self.stats.bytes_downloaded_http =
                    self.stats.bytes_downloaded_http.saturating_add(*bytes_length);
            }
            CoreEvent::ChunkDownloaded {
                bytes_length,
                download_source: DownloadSource::P2p,
            } => {
                self.stats.bytes_downloaded_p2p =
                    self.stats.bytes_downloaded_p2p.saturating_add(*bytes_length);
            }
            CoreEvent::ChunkUploaded { bytes_length } => {
                self.stats.bytes_uploaded = self.stats.bytes_uploaded.saturating_add(*bytes_length);
            }
            CoreEvent::PeerConnect { peer_id } => {
                self.stats.connected_peers.insert(peer_id.clone());
            }
            CoreEvent::PeerClose { peer_id } => {
                self.stats.connected_peers.remove(peer_id);
            }
        }
    }

    pub fn snapshot(&self) -> P2PStats {
        self.stats.clone()
    }

    pub fn reset(&mut self) {
        self.stats = P2PStats::default();
    }
}
