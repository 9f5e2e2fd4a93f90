//! Player abstraction and a headless HLS player that pulls through the local proxy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use m3u8_rs::{MediaPlaylist, Playlist};
use p2pml_core::{urls, PlaybackInfo, PlaybackProvider};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::fetch::{self, FetchError, HttpTimeouts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Buffering,
    Ready,
    Ended,
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("no media source set")]
    NoSource,
    #[error("player released")]
    Released,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unparseable playlist {0}")]
    Playlist(String),
    #[error("multivariant playlist {0} has no playable variant")]
    NoVariant(String),
    #[error(transparent)]
    Url(#[from] urls::UrlError),
}

pub trait Player: Send + Sync {
    fn set_media_source(&self, url: &str, timeouts: HttpTimeouts) -> Result<(), PlayerError>;
    fn prepare(&self) -> Result<(), PlayerError>;
    fn set_play_when_ready(&self, play: bool);
    fn subscribe_state(&self) -> watch::Receiver<PlaybackState>;
    fn release(&self);
}

#[derive(Debug, Clone)]
struct MediaSource {
    url: String,
    timeouts: HttpTimeouts,
}

/// Downloads segments in playlist order; position is the media time downloaded so far.
pub struct HeadlessPlayer {
    inner: Arc<PlayerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct PlayerInner {
    source: watch::Sender<Option<MediaSource>>,
    state: watch::Sender<PlaybackState>,
    play_when_ready: watch::Sender<bool>,
    released: watch::Sender<bool>,
    /// f64 seconds, stored as bits.
    position: AtomicU64,
}

impl HeadlessPlayer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                source: watch::channel(None).0,
                state: watch::channel(PlaybackState::Idle).0,
                play_when_ready: watch::channel(false).0,
                released: watch::channel(false).0,
                position: AtomicU64::new(0f64.to_bits()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.inner.state.borrow()
    }

    /// Seconds of media downloaded so far.
    pub fn position(&self) -> f64 {
        self.inner.position()
    }
}

impl Default for HeadlessPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerInner {
    fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    fn advance(&self, seconds: f64) {
        let next = self.position() + seconds;
        self.position.store(next.to_bits(), Ordering::Relaxed);
    }

    fn is_released(&self) -> bool {
        *self.released.borrow()
    }
}

impl Player for HeadlessPlayer {
    fn set_media_source(&self, url: &str, timeouts: HttpTimeouts) -> Result<(), PlayerError> {
        if self.inner.is_released() {
            return Err(PlayerError::Released);
        }
        self.inner.source.send_replace(Some(MediaSource {
            url: url.to_string(),
            timeouts,
        }));
        Ok(())
    }

    /// Spawns the download loop. It starts pulling once play-when-ready is set.
    fn prepare(&self) -> Result<(), PlayerError> {
        if self.inner.is_released() {
            return Err(PlayerError::Released);
        }
        let source = self
            .inner
            .source
            .borrow()
            .clone()
            .ok_or(PlayerError::NoSource)?;
        let client = fetch::build_client(source.timeouts)?;
        self.inner.state.send_replace(PlaybackState::Buffering);
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = play(&inner, &client, &source.url).await {
                warn!("playback of {} failed: {}", source.url, e);
                inner.state.send_replace(PlaybackState::Idle);
            }
        });
        if let Ok(mut slot) = self.task.lock() {
            if let Some(old) = slot.replace(task) {
                old.abort();
            }
        }
        Ok(())
    }

    fn set_play_when_ready(&self, play: bool) {
        self.inner.play_when_ready.send_replace(play);
    }

    fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.inner.state.subscribe()
    }

    fn release(&self) {
        if self.inner.released.send_replace(true) {
            return;
        }
        if let Ok(mut slot) = self.task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        self.inner.state.send_replace(PlaybackState::Idle);
        info!("player released");
    }
}

impl PlaybackProvider for HeadlessPlayer {
    fn playback_info(&self) -> PlaybackInfo {
        let playing = *self.inner.play_when_ready.borrow() && self.state() == PlaybackState::Ready;
        PlaybackInfo {
            current_play_position: self.position(),
            current_playback_speed: if playing { 1.0 } else { 0.0 },
        }
    }

    fn reset_data(&self) {
        self.inner.position.store(0f64.to_bits(), Ordering::Relaxed);
    }
}

async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, PlayerError> {
    let resp = fetch::get(client, url, &[], None).await?.into_success(url)?;
    String::from_utf8(resp.body).map_err(|_| PlayerError::Playlist(url.to_string()))
}

async fn fetch_media(client: &reqwest::Client, url: &str) -> Result<MediaPlaylist, PlayerError> {
    let text = fetch_text(client, url).await?;
    m3u8_rs::parse_media_playlist_res(text.as_bytes())
        .map_err(|_| PlayerError::Playlist(url.to_string()))
}

async fn play(inner: &PlayerInner, client: &reqwest::Client, url: &str) -> Result<(), PlayerError> {
    let mut play_rx = inner.play_when_ready.subscribe();
    if play_rx.wait_for(|p| *p).await.is_err() {
        return Ok(());
    }

    let text = fetch_text(client, url).await?;
    let media_url = match m3u8_rs::parse_playlist_res(text.as_bytes())
        .map_err(|_| PlayerError::Playlist(url.to_string()))?
    {
        Playlist::MasterPlaylist(master) => {
            let variant = master
                .variants
                .iter()
                .find(|v| !v.is_i_frame)
                .ok_or_else(|| PlayerError::NoVariant(url.to_string()))?;
            let variant_url = urls::absolute_url(url, &variant.uri)?;
            debug!("following first variant {}", variant_url);
            variant_url
        }
        Playlist::MediaPlaylist(_) => url.to_string(),
    };

    let mut last_sequence: Option<u64> = None;
    let mut init_loaded: Option<String> = None;
    loop {
        let playlist = fetch_media(client, &media_url).await?;
        for (i, seg) in playlist.segments.iter().enumerate() {
            let sequence = u64::try_from(i)
                .ok()
                .and_then(|i| playlist.media_sequence.checked_add(i))
                .ok_or_else(|| PlayerError::Playlist(media_url.clone()))?;
            if last_sequence.is_some_and(|last| sequence <= last) {
                continue;
            }
            if let Some(map) = &seg.map {
                let map_url = urls::absolute_url(&media_url, &map.uri)?;
                if init_loaded.as_deref() != Some(map_url.as_str()) {
                    fetch::get(client, &map_url, &[], None)
                        .await?
                        .into_success(&map_url)?;
                    init_loaded = Some(map_url);
                }
            }
            let seg_url = urls::absolute_url(&media_url, &seg.uri)?;
            fetch::get(client, &seg_url, &[], None)
                .await?
                .into_success(&seg_url)?;
            inner.advance(f64::from(seg.duration));
            last_sequence = Some(sequence);
            if *inner.state.borrow() != PlaybackState::Ready {
                inner.state.send_replace(PlaybackState::Ready);
            }
        }
        if playlist.end_list {
            inner.state.send_replace(PlaybackState::Ended);
            info!("reached end of {}", media_url);
            return Ok(());
        }
        let reload = Duration::from_secs_f64((playlist.target_duration as f64).max(1.0));
        tokio::time::sleep(reload).await;
    }
}
