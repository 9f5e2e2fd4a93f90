//! P2P media loader core.
//! Host-driven: no I/O; the host fetches playlists, feeds them in, and moves bytes.

pub mod ffi;
pub mod playback;
pub mod playlist;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod state;
pub mod stats;
pub mod urls;
pub mod wire;

pub use playback::{ExternalPlaybackProvider, IdlePlaybackProvider, PlaybackProvider};
pub use playlist::{PlaylistError, RewriteKind, Rewritten};
pub use protocol::{
    ByteRange, CoreEvent, DownloadSource, Message, PlaybackInfo, RequestId, Segment, Stream,
    StreamType, UpdateStreamParams, PROTOCOL_VERSION,
};
pub use service::ManifestParser;
pub use state::{ConfigError, CoreConfig, DynamicCoreConfig, P2PState};
pub use stats::{P2PStats, StatsTracker};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};

/// Default local proxy port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;
/// Default local engine bridge port.
pub const DEFAULT_ENGINE_PORT: u16 = 8090;
