//! Engine bridge: localhost TCP endpoint an external P2P engine attaches to.
//! One engine at a time; a new connection replaces the previous one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use p2pml_core::{encode_frame, FrameEncodeError, Message, RequestId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::loader::LoaderShared;
use crate::transport;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no engine connected")]
    NotConnected,
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("engine could not load segment: {0}")]
    Segment(String),
    #[error("engine disconnected")]
    Disconnected,
    #[error("engine bridge destroyed")]
    Destroyed,
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
}

type SegmentResult = Result<Vec<u8>, EngineError>;

struct Connection {
    id: u64,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    task: JoinHandle<()>,
}

struct EngineInner {
    shared: Arc<LoaderShared>,
    host_id: [u8; 16],
    core_config_json: String,
    segment_timeout: Duration,
    conn: Mutex<Option<Connection>>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<SegmentResult>>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct EngineBridge {
    inner: Arc<EngineInner>,
    local_addr: SocketAddr,
}

impl EngineBridge {
    /// Listen on `addr` and spawn the accept loop and the playback ticker.
    pub(crate) async fn bind(
        addr: SocketAddr,
        shared: Arc<LoaderShared>,
        core_config_json: String,
        segment_timeout: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(EngineInner {
            shared,
            host_id: *uuid::Uuid::new_v4().as_bytes(),
            core_config_json,
            segment_timeout,
            conn: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });
        let accept = tokio::spawn(accept_loop(listener, inner.clone()));
        let tick = tokio::spawn(tick_loop(inner.clone()));
        inner.tasks.lock().await.extend([accept, tick]);
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_ready(&self) -> bool {
        self.inner.shared.is_ready()
    }

    pub async fn send(&self, msg: &Message) -> Result<(), EngineError> {
        self.inner.send(msg).await
    }

    /// Ask the engine for a segment and wait for its answer.
    pub async fn request_segment(&self, segment_runtime_id: &str) -> Result<Vec<u8>, EngineError> {
        let request_id = *uuid::Uuid::new_v4().as_bytes();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(request_id, tx);
        let msg = Message::SegmentRequest {
            request_id,
            segment_runtime_id: segment_runtime_id.to_string(),
        };
        if let Err(e) = self.inner.send(&msg).await {
            self.inner.pending.lock().await.remove(&request_id);
            return Err(e);
        }
        match tokio::time::timeout(self.inner.segment_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::Disconnected),
            Err(_) => {
                self.inner.pending.lock().await.remove(&request_id);
                Err(EngineError::Timeout(self.inner.segment_timeout))
            }
        }
    }

    /// Send `Shutdown`, drop the engine, fail pending requests and stop all tasks. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        if let Err(e) = self.inner.send(&Message::Shutdown).await {
            debug!("shutdown not delivered to engine: {}", e);
        }
        if let Some(conn) = self.inner.conn.lock().await.take() {
            conn.task.abort();
        }
        self.inner.shared.ready.send_replace(false);
        self.inner.fail_pending(|| EngineError::Destroyed).await;
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        info!("engine bridge on {} destroyed", self.local_addr);
    }
}

impl EngineInner {
    async fn send(&self, msg: &Message) -> Result<(), EngineError> {
        let frame = encode_frame(msg)?;
        let conn = self.conn.lock().await;
        let tx = conn
            .as_ref()
            .and_then(|c| c.tx.as_ref())
            .ok_or(EngineError::NotConnected)?;
        tx.send(frame).map_err(|_| EngineError::NotConnected)
    }

    async fn fail_pending(&self, err: impl Fn() -> EngineError) {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        for (_, waiter) in drained {
            let _ = waiter.send(Err(err()));
        }
    }

    async fn complete(&self, request_id: RequestId, result: SegmentResult) {
        match self.pending.lock().await.remove(&request_id) {
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => debug!("answer for unknown or expired request dropped"),
        }
    }

    /// Spawn the connection task while holding the slot so it cannot attach before registration.
    async fn install_connection(self: &Arc<Self>, stream: TcpStream, id: u64) {
        let previous = {
            let mut conn = self.conn.lock().await;
            let task = tokio::spawn(self.clone().serve(stream, id));
            conn.replace(Connection { id, tx: None, task })
        };
        if let Some(old) = previous {
            info!("engine connection {} replaced by {}", old.id, id);
            old.task.abort();
            self.shared.ready.send_replace(false);
            self.fail_pending(|| EngineError::Disconnected).await;
        }
    }

    /// Returns false when connection `id` is no longer the current one.
    async fn attach_sender(&self, id: u64, tx: mpsc::UnboundedSender<Vec<u8>>) -> bool {
        let mut conn = self.conn.lock().await;
        match conn.as_mut() {
            Some(c) if c.id == id => {
                c.tx = Some(tx);
                true
            }
            _ => false,
        }
    }

    async fn connection_closed(&self, id: u64) {
        {
            let mut conn = self.conn.lock().await;
            if !matches!(conn.as_ref(), Some(c) if c.id == id) {
                return;
            }
            conn.take();
        }
        info!("engine connection {} closed", id);
        self.shared.ready.send_replace(false);
        self.fail_pending(|| EngineError::Disconnected).await;
    }

    async fn serve(self: Arc<Self>, mut stream: TcpStream, id: u64) {
        let engine_id = match transport::handshake_accept(&mut stream, &self.host_id).await {
            Ok(engine_id) => engine_id,
            Err(e) => {
                warn!("engine handshake failed: {}", e);
                self.connection_closed(id).await;
                return;
            }
        };
        info!(
            "engine {} attached as connection {}",
            uuid::Uuid::from_bytes(engine_id),
            id
        );
        let (mut reader, writer) = stream.into_split();
        let (tx, _writer_task) = transport::spawn_writer(writer);
        if !self.attach_sender(id, tx).await {
            return;
        }
        let init = Message::InitCore {
            core_config_json: self.core_config_json.clone(),
        };
        if let Err(e) = self.send(&init).await {
            error!("cannot send core config to engine: {}", e);
        }
        loop {
            match transport::read_message(&mut reader).await {
                Ok(msg) => self.on_message(msg).await,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    warn!("engine connection {} read failed: {}", id, e);
                    break;
                }
            }
        }
        self.connection_closed(id).await;
    }

    async fn on_message(&self, msg: Message) {
        match msg {
            Message::CoreReady => {
                info!("engine ready");
                self.shared.ready.send_replace(true);
                if let Some(cb) = &self.shared.on_ready {
                    cb();
                }
                self.push_snapshot().await;
            }
            Message::CoreError { message } => {
                error!("engine failed to initialise: {}", message);
                if let Some(cb) = &self.shared.on_error {
                    cb(&message);
                }
            }
            Message::SegmentData {
                request_id,
                payload,
            } => self.complete(request_id, Ok(payload)).await,
            Message::SegmentError { request_id, reason } => {
                self.complete(request_id, Err(EngineError::Segment(reason)))
                    .await
            }
            Message::Event { event } => {
                self.shared.stats.lock().await.on_event(&event);
                let _ = self.shared.events.send(event);
            }
            other => warn!("unexpected message from engine: {:?}", other),
        }
    }

    /// Everything parsed so far, so a late engine catches up.
    async fn push_snapshot(&self) {
        let (streams, updates) = {
            let parser = self.shared.parser.lock().await;
            (parser.streams(), parser.all_update_params())
        };
        if streams.is_empty() {
            return;
        }
        let mut msgs = vec![Message::Streams { streams }];
        msgs.extend(
            updates
                .into_iter()
                .map(|params| Message::UpdateStream { params }),
        );
        for msg in &msgs {
            if let Err(e) = self.send(msg).await {
                warn!("snapshot not delivered to engine: {}", e);
                return;
            }
        }
    }
}

/// Resolves once shutdown is signalled or its sender is gone.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn accept_loop(listener: TcpListener, inner: Arc<EngineInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut next_id = 0u64;
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    next_id += 1;
                    debug!("engine connection {} from {}", next_id, peer);
                    inner.install_connection(stream, next_id).await;
                }
                Err(e) => {
                    error!("engine accept failed: {}", e);
                    break;
                }
            }
        }
    }
}

async fn tick_loop(inner: Arc<EngineInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = interval.tick() => {
                if !inner.shared.is_ready() {
                    continue;
                }
                let info = inner.shared.playback().await.playback_info();
                let _ = inner.send(&Message::PlaybackInfo { info }).await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use p2pml_core::{CoreEvent, DownloadSource, IdlePlaybackProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MEDIA: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\ns0.ts\n#EXT-X-ENDLIST\n";

    /// Connect a scripted engine: handshake done, InitCore consumed.
    pub(crate) async fn connect_engine(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        transport::handshake_connect(&mut stream, &[9u8; 16])
            .await
            .unwrap();
        match transport::read_message(&mut stream).await.unwrap() {
            Message::InitCore { .. } => {}
            other => panic!("expected InitCore, got {:?}", other),
        }
        stream
    }

    async fn bridge(shared: Arc<LoaderShared>, timeout: Duration) -> EngineBridge {
        EngineBridge::bind(
            "127.0.0.1:0".parse().unwrap(),
            shared,
            "{\"swarmId\":\"t\"}".into(),
            timeout,
        )
        .await
        .unwrap()
    }

    async fn wait_until_ready(shared: &LoaderShared) {
        let mut rx = shared.ready.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|r| *r))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn stopped_resolves_on_signal_or_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        let looping = tokio::spawn(async move {
            let mut ticks = 0u32;
            loop {
                tokio::select! {
                    _ = stopped(&mut rx) => break,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => ticks += 1,
                }
            }
            ticks
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send_replace(true);
        let ticks = tokio::time::timeout(Duration::from_secs(2), looping)
            .await
            .unwrap()
            .unwrap();
        assert!(ticks > 0);

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), stopped(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn init_core_carries_config_and_ready_pushes_snapshot() {
        let readies = Arc::new(AtomicUsize::new(0));
        let counter = readies.clone();
        let shared = Arc::new(LoaderShared::new(
            8080,
            Some(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        ));
        shared
            .parser
            .lock()
            .await
            .parse("https://a.com/v.m3u8", MEDIA, &IdlePlaybackProvider)
            .unwrap();
        let b = bridge(shared.clone(), Duration::from_secs(1)).await;

        let mut stream = TcpStream::connect(b.local_addr()).await.unwrap();
        transport::handshake_connect(&mut stream, &[9u8; 16])
            .await
            .unwrap();
        assert_eq!(
            transport::read_message(&mut stream).await.unwrap(),
            Message::InitCore {
                core_config_json: "{\"swarmId\":\"t\"}".into()
            }
        );
        transport::write_message(&mut stream, &Message::CoreReady)
            .await
            .unwrap();
        match transport::read_message(&mut stream).await.unwrap() {
            Message::Streams { streams } => assert_eq!(streams.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        match transport::read_message(&mut stream).await.unwrap() {
            Message::UpdateStream { params } => {
                assert_eq!(params.stream_runtime_id, "https://a.com/v.m3u8")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(b.is_ready());
        assert_eq!(readies.load(Ordering::SeqCst), 1);
        b.destroy().await;
    }

    #[tokio::test]
    async fn segment_request_round_trip_and_events() {
        let shared = Arc::new(LoaderShared::new(8080, None, None));
        let mut events = shared.events.subscribe();
        let b = bridge(shared.clone(), Duration::from_secs(2)).await;
        let mut engine = connect_engine(b.local_addr()).await;
        transport::write_message(&mut engine, &Message::CoreReady)
            .await
            .unwrap();
        wait_until_ready(&shared).await;

        let engine_task = tokio::spawn(async move {
            loop {
                match transport::read_message(&mut engine).await.unwrap() {
                    Message::SegmentRequest {
                        request_id,
                        segment_runtime_id,
                    } => {
                        assert_eq!(segment_runtime_id, "https://a.com/s0.ts");
                        let event = Message::Event {
                            event: CoreEvent::ChunkDownloaded {
                                bytes_length: 3,
                                download_source: DownloadSource::P2p,
                            },
                        };
                        transport::write_message(&mut engine, &event).await.unwrap();
                        let data = Message::SegmentData {
                            request_id,
                            payload: vec![1, 2, 3],
                        };
                        transport::write_message(&mut engine, &data).await.unwrap();
                        return engine;
                    }
                    _ => continue,
                }
            }
        });

        let payload = b.request_segment("https://a.com/s0.ts").await.unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
        let _engine = engine_task.await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::ChunkDownloaded {
                bytes_length: 3,
                download_source: DownloadSource::P2p
            }
        );
        assert_eq!(shared.stats.lock().await.snapshot().bytes_downloaded_p2p, 3);
        b.destroy().await;
    }

    #[tokio::test]
    async fn segment_error_and_timeout() {
        let shared = Arc::new(LoaderShared::new(8080, None, None));
        let b = bridge(shared.clone(), Duration::from_millis(200)).await;
        let mut engine = connect_engine(b.local_addr()).await;
        transport::write_message(&mut engine, &Message::CoreReady)
            .await
            .unwrap();
        wait_until_ready(&shared).await;

        let engine_task = tokio::spawn(async move {
            let mut answered = false;
            loop {
                match transport::read_message(&mut engine).await {
                    Ok(Message::SegmentRequest { request_id, .. }) if !answered => {
                        answered = true;
                        let msg = Message::SegmentError {
                            request_id,
                            reason: "no peers".into(),
                        };
                        transport::write_message(&mut engine, &msg).await.unwrap();
                    }
                    Ok(_) => continue,
                    Err(_) => return,
                }
            }
        });

        assert!(matches!(
            b.request_segment("https://a.com/s0.ts").await,
            Err(EngineError::Segment(reason)) if reason == "no peers"
        ));
        // Second request is never answered.
        assert!(matches!(
            b.request_segment("https://a.com/s1.ts").await,
            Err(EngineError::Timeout(_))
        ));
        b.destroy().await;
        engine_task.abort();
    }

    #[tokio::test]
    async fn requests_without_engine_fail_fast() {
        let shared = Arc::new(LoaderShared::new(8080, None, None));
        let b = bridge(shared, Duration::from_secs(5)).await;
        assert!(matches!(
            b.request_segment("https://a.com/s0.ts").await,
            Err(EngineError::NotConnected)
        ));
        assert!(b.inner.pending.lock().await.is_empty());
        b.destroy().await;
    }

    #[tokio::test]
    async fn destroy_sends_shutdown_and_fails_pending() {
        let shared = Arc::new(LoaderShared::new(8080, None, None));
        let b = bridge(shared.clone(), Duration::from_secs(5)).await;
        let mut engine = connect_engine(b.local_addr()).await;
        transport::write_message(&mut engine, &Message::CoreReady)
            .await
            .unwrap();
        wait_until_ready(&shared).await;

        let requester = b.clone();
        let pending = tokio::spawn(async move { requester.request_segment("x").await });
        loop {
            if let Message::SegmentRequest { .. } = transport::read_message(&mut engine).await.unwrap()
            {
                break;
            }
        }
        b.destroy().await;
        b.destroy().await;
        assert!(matches!(
            pending.await.unwrap(),
            Err(EngineError::Destroyed)
        ));
        assert!(!b.is_ready());
        loop {
            match transport::read_message(&mut engine).await {
                Ok(Message::Shutdown) => break,
                Ok(_) => continue,
                Err(e) => panic!("connection closed before Shutdown: {}", e),
            }
        }
    }

    #[tokio::test]
    async fn disconnect_clears_ready() {
        let shared = Arc::new(LoaderShared::new(8080, None, None));
        let b = bridge(shared.clone(), Duration::from_secs(5)).await;
        let mut engine = connect_engine(b.local_addr()).await;
        transport::write_message(&mut engine, &Message::CoreReady)
            .await
            .unwrap();
        wait_until_ready(&shared).await;
        drop(engine);
        let mut rx = shared.ready.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|r| !*r))
            .await
            .unwrap()
            .unwrap();
        b.destroy().await;
    }
}
