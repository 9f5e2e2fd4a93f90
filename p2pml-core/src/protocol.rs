//! Engine bridge protocol: message types, shared data model and version.

use serde::{Deserialize, Serialize};

/// Current protocol version. Sent in the handshake by both sides.
pub const PROTOCOL_VERSION: u8 = 1;

/// Request correlation id (uuid v4 bytes).
pub type RequestId = [u8; 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamType {
    Main,
    Secondary,
}

/// A playlist the engine can build a swarm around. `runtime_id` is the absolute playlist URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub runtime_id: String,
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    pub index: u32,
    pub master_manifest_url: Option<String>,
}

/// Inclusive byte range, same semantics as an HTTP `Range: bytes=start-end` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn to_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub runtime_id: String,
    pub external_id: u64,
    pub url: String,
    pub byte_range: Option<ByteRange>,
    pub start_time: f64,
    pub end_time: f64,
}

/// Delta produced by one media playlist parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStreamParams {
    pub stream_runtime_id: String,
    pub add_segments: Vec<Segment>,
    pub remove_segment_ids: Vec<String>,
    pub is_live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackInfo {
    pub current_play_position: f64,
    pub current_playback_speed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadSource {
    Http,
    P2p,
}

/// Engine-side events, surfaced to loader subscribers and the stats tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoreEvent {
    ChunkDownloaded {
        bytes_length: u64,
        download_source: DownloadSource,
    },
    ChunkUploaded {
        bytes_length: u64,
    },
    PeerConnect {
        peer_id: String,
    },
    PeerClose {
        peer_id: String,
    },
}

/// All bridge message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Host -> engine: initialise the core with a JSON config (may be empty).
    InitCore { core_config_json: String },
    /// Host -> engine: runtime reconfiguration.
    ApplyDynamicConfig { dynamic_config_json: String },
    /// Host -> engine: fetch a segment, answer with SegmentData or SegmentError.
    SegmentRequest {
        request_id: RequestId,
        segment_runtime_id: String,
    },
    /// Host -> engine: full stream list.
    Streams { streams: Vec<Stream> },
    /// Host -> engine: segment delta for one stream.
    UpdateStream { params: UpdateStreamParams },
    /// Host -> engine: periodic playback position.
    PlaybackInfo { info: PlaybackInfo },
    /// Host -> engine: host is going away.
    Shutdown,
    /// Engine -> host: core initialised.
    CoreReady,
    /// Engine -> host: core failed to initialise.
    CoreError { message: String },
    /// Engine -> host: segment payload.
    SegmentData {
        request_id: RequestId,
        payload: Vec<u8>,
    },
    /// Engine -> host: segment could not be loaded.
    SegmentError { request_id: RequestId, reason: String },
    /// Engine -> host: stats/peer event.
    Event { event: CoreEvent },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_len_is_inclusive() {
        let r = ByteRange { start: 0, end: 99 };
        assert_eq!(r.length(), 100);
        assert_eq!(r.to_header_value(), "bytes=0-99");
    }

    #[test]
    fn stream_json_uses_engine_field_names() {
        let s = Stream {
            runtime_id: "https://a.com/v0.m3u8".into(),
            stream_type: StreamType::Secondary,
            index: 2,
            master_manifest_url: Some("https://a.com/master.m3u8".into()),
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["runtimeId"], "https://a.com/v0.m3u8");
        assert_eq!(v["type"], "secondary");
        assert_eq!(v["index"], 2);
        assert_eq!(v["masterManifestUrl"], "https://a.com/master.m3u8");
    }
}
