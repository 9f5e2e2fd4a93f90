//! Playback session: the host application lifecycle around loader, bridge and player.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use p2pml_core::DynamicCoreConfig;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bridge::ManifestUrlBridge;
use crate::config::Config;
use crate::fetch::HttpTimeouts;
use crate::loader::{LoaderError, P2PMediaLoader};
use crate::loopback;
use crate::player::{HeadlessPlayer, PlaybackState, Player};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub manifest_url: String,
    pub server_port: u16,
    pub engine_port: u16,
    pub core_config_json: String,
    pub http_timeouts: HttpTimeouts,
    pub segment_timeout: Duration,
    pub engine_ready_timeout: Duration,
    /// Attach the built-in HTTP-only engine.
    pub loopback_engine: bool,
}

impl From<&Config> for SessionConfig {
    fn from(c: &Config) -> Self {
        Self {
            manifest_url: c.manifest_url.clone(),
            server_port: c.server_port,
            engine_port: c.engine_port,
            core_config_json: c.core_config_json.clone(),
            http_timeouts: HttpTimeouts::from_millis(c.connect_timeout_ms, c.read_timeout_ms),
            segment_timeout: Duration::from_millis(c.segment_timeout_ms),
            engine_ready_timeout: Duration::from_millis(c.engine_ready_timeout_ms),
            loopback_engine: false,
        }
    }
}

type PlayerSlot = Arc<Mutex<Option<Arc<HeadlessPlayer>>>>;

pub struct PlaybackSession {
    loader: Mutex<Option<P2PMediaLoader>>,
    bridge: Mutex<Option<ManifestUrlBridge>>,
    player: PlayerSlot,
    engine: Mutex<Option<JoinHandle<()>>>,
    loading: Arc<AtomicBool>,
    destroyed: Arc<AtomicBool>,
}

impl PlaybackSession {
    /// Start the loader, then resolve the manifest URL and start playback once it arrives.
    pub async fn create(config: SessionConfig) -> Result<Self, LoaderError> {
        let loader = P2PMediaLoader::builder()
            .server_port(config.server_port)
            .engine_port(config.engine_port)
            .core_config(config.core_config_json.clone())
            .segment_timeout(config.segment_timeout)
            .http_timeouts(config.http_timeouts)
            .on_ready(|| info!("p2p engine ready"))
            .on_error(|message| error!("p2p engine error: {}", message))
            .build()?;
        loader.start().await?;

        let engine = match (config.loopback_engine, loader.engine_addr().await) {
            (true, Some(addr)) => {
                let timeouts = config.http_timeouts;
                Some(tokio::spawn(async move {
                    if let Err(e) = loopback::run_loopback_engine(addr, timeouts).await {
                        warn!("loopback engine stopped: {}", e);
                    }
                }))
            }
            _ => None,
        };

        let session = Self {
            loader: Mutex::new(Some(loader.clone())),
            bridge: Mutex::new(None),
            player: Arc::new(Mutex::new(None)),
            engine: Mutex::new(engine),
            loading: Arc::new(AtomicBool::new(true)),
            destroyed: Arc::new(AtomicBool::new(false)),
        };

        let mut bridge = ManifestUrlBridge::new(config.engine_ready_timeout);
        let slot = session.player.clone();
        let loading = session.loading.clone();
        let destroyed = session.destroyed.clone();
        let player_loader = loader.clone();
        let timeouts = config.http_timeouts;
        bridge.manifest_url_async(&loader, config.manifest_url, move |url| async move {
            start_playback(url, timeouts, player_loader, slot, loading, destroyed).await;
        });
        *session.bridge.lock().await = Some(bridge);
        Ok(session)
    }

    /// Foreground.
    pub async fn on_start(&self) {
        self.apply_p2p_disabled(true).await;
    }

    /// Background.
    pub async fn on_stop(&self) {
        self.apply_p2p_disabled(false).await;
    }

    async fn apply_p2p_disabled(&self, disabled: bool) {
        let loader = self.loader.lock().await;
        let Some(loader) = loader.as_ref() else {
            return;
        };
        let config = DynamicCoreConfig::p2p_disabled(disabled);
        if let Err(e) = loader.apply_dynamic_config(config.as_json()).await {
            warn!("dynamic config not applied: {}", e);
        }
    }

    /// Release the player, stop the loader, destroy the bridge. Safe to call repeatedly.
    pub async fn on_destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Some(player) = self.player.lock().await.take() {
            player.release();
        }
        if let Some(loader) = self.loader.lock().await.take() {
            if let Err(e) = loader.stop().await {
                warn!("loader stop: {}", e);
            }
        }
        if let Some(mut bridge) = self.bridge.lock().await.take() {
            bridge.destroy();
        }
        if let Some(engine) = self.engine.lock().await.take() {
            engine.abort();
        }
    }

    /// True until the player first reports Ready.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub async fn player_state(&self) -> Option<PlaybackState> {
        self.player.lock().await.as_ref().map(|p| p.state())
    }

    pub async fn loader(&self) -> Option<P2PMediaLoader> {
        self.loader.lock().await.clone()
    }
}

async fn start_playback(
    url: String,
    timeouts: HttpTimeouts,
    loader: P2PMediaLoader,
    slot: PlayerSlot,
    loading: Arc<AtomicBool>,
    destroyed: Arc<AtomicBool>,
) {
    let player = Arc::new(HeadlessPlayer::new());
    if let Err(e) = player
        .set_media_source(&url, timeouts)
        .and_then(|_| player.prepare())
    {
        error!("cannot start playback: {}", e);
        return;
    }
    let mut state = player.subscribe_state();
    player.set_play_when_ready(true);
    loader.attach_player(player.clone()).await;

    tokio::spawn(async move {
        // A short VOD can be Ended before this task first looks.
        if state
            .wait_for(|s| matches!(s, PlaybackState::Ready | PlaybackState::Ended))
            .await
            .is_ok()
            && loading.swap(false, Ordering::SeqCst)
        {
            info!("playback started");
        }
    });

    let mut slot = slot.lock().await;
    if destroyed.load(Ordering::SeqCst) {
        player.release();
        return;
    }
    *slot = Some(player);
}
