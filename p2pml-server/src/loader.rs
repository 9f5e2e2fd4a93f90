//! P2PMediaLoader: owns the proxy server and the engine bridge and drives their lifecycle.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use p2pml_core::{
    urls, ConfigError, CoreConfig, CoreEvent, DynamicCoreConfig, IdlePlaybackProvider,
    ManifestParser, Message, P2PState, P2PStats, PlaybackProvider, StatsTracker,
    DEFAULT_ENGINE_PORT, DEFAULT_SERVER_PORT,
};
use tokio::sync::{broadcast, watch, Mutex};

use crate::engine::{EngineBridge, EngineError};
use crate::fetch::{self, FetchError, HttpTimeouts};
use crate::server::{ProxyContext, ProxyServer};

pub const DEFAULT_SEGMENT_TIMEOUT: Duration = Duration::from_secs(20);
const EVENT_CAPACITY: usize = 256;

/// Called once per engine `CoreReady`.
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync>;
/// Called with the engine's message on `CoreError`.
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Initialized,
    Started,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("loader is already started")]
    AlreadyStarted,
    #[error("loader is not started (state {0:?})")]
    NotStarted(LoaderState),
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// State shared between the proxy handlers, the engine bridge and the loader API.
pub(crate) struct LoaderShared {
    pub(crate) parser: Mutex<ManifestParser>,
    pub(crate) playback: Mutex<Arc<dyn PlaybackProvider>>,
    pub(crate) p2p: Mutex<P2PState>,
    pub(crate) stats: Mutex<StatsTracker>,
    pub(crate) events: broadcast::Sender<CoreEvent>,
    pub(crate) ready: watch::Sender<bool>,
    pub(crate) on_ready: Option<ReadyCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl LoaderShared {
    pub(crate) fn new(
        server_port: u16,
        on_ready: Option<ReadyCallback>,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (ready, _) = watch::channel(false);
        Self {
            parser: Mutex::new(ManifestParser::new(server_port)),
            playback: Mutex::new(Arc::new(IdlePlaybackProvider)),
            p2p: Mutex::new(P2PState::new()),
            stats: Mutex::new(StatsTracker::new()),
            events,
            ready,
            on_ready,
            on_error,
        }
    }

    pub(crate) async fn playback(&self) -> Arc<dyn PlaybackProvider> {
        self.playback.lock().await.clone()
    }

    pub(crate) fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }
}

struct Settings {
    server_port: u16,
    engine_port: u16,
    core_config: CoreConfig,
    segment_timeout: Duration,
    http_timeouts: HttpTimeouts,
}

struct Running {
    server: ProxyServer,
    engine: EngineBridge,
}

struct RunState {
    state: LoaderState,
    running: Option<Running>,
}

struct LoaderInner {
    settings: Settings,
    shared: Arc<LoaderShared>,
    run: Mutex<RunState>,
}

/// Cheap to clone; clones share the same proxy and engine bridge.
#[derive(Clone)]
pub struct P2PMediaLoader {
    inner: Arc<LoaderInner>,
}

impl P2PMediaLoader {
    pub fn builder() -> P2PMediaLoaderBuilder {
        P2PMediaLoaderBuilder::default()
    }

    pub async fn state(&self) -> LoaderState {
        self.inner.run.lock().await.state
    }

    /// Bind the proxy and the engine listener and spawn their tasks.
    pub async fn start(&self) -> Result<(), LoaderError> {
        let mut run = self.inner.run.lock().await;
        if run.state == LoaderState::Started {
            return Err(LoaderError::AlreadyStarted);
        }
        let settings = &self.inner.settings;
        let shared = &self.inner.shared;
        let client = fetch::build_client(settings.http_timeouts)?;

        let engine_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, settings.engine_port));
        let engine = EngineBridge::bind(
            engine_addr,
            shared.clone(),
            settings.core_config.as_json().to_string(),
            settings.segment_timeout,
        )
        .await
        .map_err(|source| LoaderError::Bind {
            addr: engine_addr,
            source,
        })?;

        let server_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, settings.server_port));
        let ctx = ProxyContext::new(shared.clone(), engine.clone(), client);
        let server = match ProxyServer::bind(server_addr, ctx).await {
            Ok(s) => s,
            Err(source) => {
                engine.destroy().await;
                return Err(LoaderError::Bind {
                    addr: server_addr,
                    source,
                });
            }
        };

        // Port 0 resolves at bind time; rewritten URLs must carry the real one.
        *shared.parser.lock().await = ManifestParser::new(server.local_addr().port());
        info!(
            "loader started: proxy on {}, engine bridge on {}",
            server.local_addr(),
            engine.local_addr()
        );
        run.running = Some(Running { server, engine });
        run.state = LoaderState::Started;
        Ok(())
    }

    /// Tear down the engine bridge and the server, then reset parse, P2P and traffic state.
    pub async fn stop(&self) -> Result<(), LoaderError> {
        let mut run = self.inner.run.lock().await;
        if run.state != LoaderState::Started {
            return Err(LoaderError::NotStarted(run.state));
        }
        if let Some(running) = run.running.take() {
            running.engine.destroy().await;
            running.server.shutdown().await;
        }
        let shared = &self.inner.shared;
        shared.parser.lock().await.reset();
        shared.playback().await.reset_data();
        shared.p2p.lock().await.reset();
        shared.stats.lock().await.reset();
        run.state = LoaderState::Stopped;
        info!("loader stopped");
        Ok(())
    }

    /// Validate `json`, apply `isP2PDisabled` locally and forward the payload to the engine.
    pub async fn apply_dynamic_config(&self, json: &str) -> Result<(), LoaderError> {
        let run = self.inner.run.lock().await;
        let Some(running) = run.running.as_ref() else {
            return Err(LoaderError::NotStarted(run.state));
        };
        let config = DynamicCoreConfig::parse(json)?;
        let changed = config.apply_to(&mut *self.inner.shared.p2p.lock().await);
        if changed {
            info!(
                "p2p {}",
                if config.is_p2p_disabled == Some(true) {
                    "disabled"
                } else {
                    "enabled"
                }
            );
        }
        let msg = Message::ApplyDynamicConfig {
            dynamic_config_json: config.as_json().to_string(),
        };
        if let Err(e) = running.engine.send(&msg).await {
            warn!("dynamic config not forwarded to engine: {}", e);
        }
        Ok(())
    }

    /// Local proxy URL the player should open for `manifest_url`.
    pub async fn manifest_url(&self, manifest_url: &str) -> Result<String, LoaderError> {
        let run = self.inner.run.lock().await;
        let Some(running) = run.running.as_ref() else {
            return Err(LoaderError::NotStarted(run.state));
        };
        let port = running.server.local_addr().port();
        Ok(urls::local_url(port, &urls::manifest_path(manifest_url)))
    }

    /// Use `provider` for live start times and engine playback updates.
    pub async fn attach_player(&self, provider: Arc<dyn PlaybackProvider>) {
        *self.inner.shared.playback.lock().await = provider;
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.shared.events.subscribe()
    }

    pub async fn stats(&self) -> P2PStats {
        self.inner.shared.stats.lock().await.snapshot()
    }

    pub async fn is_p2p_enabled(&self) -> bool {
        self.inner.shared.p2p.lock().await.is_enabled()
    }

    pub fn is_engine_ready(&self) -> bool {
        self.inner.shared.is_ready()
    }

    /// Resolve when an engine reports ready. Returns false on timeout.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.shared.ready.subscribe();
        let ready = async move { rx.wait_for(|ready| *ready).await.is_ok() };
        tokio::time::timeout(timeout, ready).await.unwrap_or(false)
    }

    pub async fn server_addr(&self) -> Option<SocketAddr> {
        let run = self.inner.run.lock().await;
        run.running.as_ref().map(|r| r.server.local_addr())
    }

    pub async fn engine_addr(&self) -> Option<SocketAddr> {
        let run = self.inner.run.lock().await;
        run.running.as_ref().map(|r| r.engine.local_addr())
    }
}

pub struct P2PMediaLoaderBuilder {
    server_port: u16,
    engine_port: u16,
    core_config_json: String,
    on_ready: Option<ReadyCallback>,
    on_error: Option<ErrorCallback>,
    segment_timeout: Duration,
    http_timeouts: HttpTimeouts,
}

impl Default for P2PMediaLoaderBuilder {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_SERVER_PORT,
            engine_port: DEFAULT_ENGINE_PORT,
            core_config_json: String::new(),
            on_ready: None,
            on_error: None,
            segment_timeout: DEFAULT_SEGMENT_TIMEOUT,
            http_timeouts: HttpTimeouts::default(),
        }
    }
}

impl P2PMediaLoaderBuilder {
    pub fn server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn engine_port(mut self, port: u16) -> Self {
        self.engine_port = port;
        self
    }

    /// JSON core config; validated by `build`.
    pub fn core_config(mut self, json: impl Into<String>) -> Self {
        self.core_config_json = json.into();
        self
    }

    pub fn on_ready<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_ready = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn segment_timeout(mut self, timeout: Duration) -> Self {
        self.segment_timeout = timeout;
        self
    }

    pub fn http_timeouts(mut self, timeouts: HttpTimeouts) -> Self {
        self.http_timeouts = timeouts;
        self
    }

    pub fn build(self) -> Result<P2PMediaLoader, LoaderError> {
        let core_config = CoreConfig::parse(&self.core_config_json)?;
        let shared = Arc::new(LoaderShared::new(
            self.server_port,
            self.on_ready,
            self.on_error,
        ));
        Ok(P2PMediaLoader {
            inner: Arc::new(LoaderInner {
                settings: Settings {
                    server_port: self.server_port,
                    engine_port: self.engine_port,
                    core_config,
                    segment_timeout: self.segment_timeout,
                    http_timeouts: self.http_timeouts,
                },
                shared,
                run: Mutex::new(RunState {
                    state: LoaderState::Initialized,
                    running: None,
                }),
            }),
        })
    }
}
