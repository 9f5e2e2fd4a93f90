//! P2P media loader host: localhost HLS proxy, engine bridge, loader lifecycle and a headless player.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod http;
pub mod loader;
pub mod loopback;
pub mod player;
pub mod server;
pub mod session;
pub mod transport;

pub use bridge::ManifestUrlBridge;
pub use config::Config;
pub use engine::EngineError;
pub use fetch::{FetchError, HttpTimeouts};
pub use loader::{LoaderError, LoaderState, P2PMediaLoader, P2PMediaLoaderBuilder};
pub use player::{HeadlessPlayer, PlaybackState, Player, PlayerError};
pub use session::{PlaybackSession, SessionConfig};
