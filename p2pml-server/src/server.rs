//! Local HLS proxy: listen on localhost, rewrite playlists, serve segments from the engine or the origin.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use p2pml_core::{urls, Message, RewriteKind};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::{stopped, EngineBridge};
use crate::fetch;
use crate::http::{self, Request, RequestError};
use crate::loader::LoaderShared;

const STATUS_PATH: &str = "/status";

/// What a route handler produced; written out by the connection task.
#[derive(Debug)]
struct Reply {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl Reply {
    fn ok(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.to_string()),
            body,
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("text/plain; charset=utf-8".into()),
            body: message.into().into_bytes(),
        }
    }

    fn origin(resp: fetch::OriginResponse, fallback_type: &str) -> Self {
        Self {
            status: resp.status,
            content_type: resp.content_type.or_else(|| Some(fallback_type.to_string())),
            body: resp.body,
        }
    }
}

pub(crate) struct ProxyContext {
    shared: Arc<LoaderShared>,
    engine: EngineBridge,
    client: reqwest::Client,
}

impl ProxyContext {
    pub(crate) fn new(shared: Arc<LoaderShared>, engine: EngineBridge, client: reqwest::Client) -> Self {
        Self {
            shared,
            engine,
            client,
        }
    }
}

pub struct ProxyServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProxyServer {
    /// Bind and spawn the accept loop.
    pub(crate) async fn bind(addr: SocketAddr, ctx: ProxyContext) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(run_proxy(listener, Arc::new(ctx), rx));
        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Connections already in flight finish on their own.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            error!("proxy task ended abnormally: {}", e);
        }
        info!("proxy on {} stopped", self.local_addr);
    }
}

async fn run_proxy(listener: TcpListener, ctx: Arc<ProxyContext>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            res = listener.accept() => match res {
                Ok((stream, _)) => {
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, ctx).await {
                            debug!("proxy connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("proxy accept failed: {}", e);
                    break;
                }
            }
        }
    }
}

async fn handle_client(mut client: TcpStream, ctx: Arc<ProxyContext>) -> std::io::Result<()> {
    let req = match http::read_request(&mut client).await {
        Ok(req) => req,
        Err(RequestError::Closed) => return Ok(()),
        Err(RequestError::Io(e)) => return Err(e),
        Err(e) => return http::write_error(&mut client, 400, &e.to_string()).await,
    };
    debug!("{} {}", req.method, req.target);
    let reply = route(&ctx, &req).await;
    http::write_response(
        &mut client,
        reply.status,
        reply.content_type.as_deref(),
        &reply.body,
    )
    .await
}

async fn route(ctx: &ProxyContext, req: &Request) -> Reply {
    if !req.method.eq_ignore_ascii_case("GET") {
        return Reply::error(405, "method not allowed");
    }
    let path = urls::target_path(&req.target);
    if path == STATUS_PATH {
        return status(ctx).await;
    }
    if path != "/" {
        return Reply::error(404, "not found");
    }
    for (key, value) in urls::parse_query(&req.target) {
        if key == urls::MANIFEST_PARAM {
            return manifest(ctx, &req.headers, value).await;
        }
        if key == urls::SEGMENT_PARAM {
            return segment(ctx, &req.headers, value).await;
        }
    }
    Reply::error(404, "not found")
}

async fn manifest(ctx: &ProxyContext, headers: &[(String, String)], encoded: &str) -> Reply {
    let url = match urls::decode_manifest_param(encoded) {
        Ok(url) => url,
        Err(e) => return Reply::error(400, e.to_string()),
    };
    let origin = match fetch::get(&ctx.client, &url, headers, None).await {
        Ok(o) => o,
        Err(e) => {
            warn!("manifest fetch failed: {}", e);
            return Reply::error(502, e.to_string());
        }
    };
    if !origin.is_success() {
        debug!("origin answered {} for {}", origin.status, url);
        return Reply::origin(origin, http::MPEGURL);
    }
    let raw = match String::from_utf8(origin.body) {
        Ok(s) => s,
        Err(_) => return Reply::error(502, "playlist is not valid utf-8"),
    };

    let provider = ctx.shared.playback().await;
    let (rewritten, streams) = {
        let mut parser = ctx.shared.parser.lock().await;
        if !parser.does_manifest_exist(&url) {
            info!("new manifest {}, resetting stream state", url);
            parser.reset();
            provider.reset_data();
        }
        match parser.parse(&url, &raw, provider.as_ref()) {
            Ok(r) => (r, parser.streams()),
            Err(e) => {
                warn!("cannot rewrite {}: {}", url, e);
                return Reply::error(502, e.to_string());
            }
        }
    };

    let mut msgs = Vec::new();
    match &rewritten.kind {
        RewriteKind::Multivariant { .. } => msgs.push(Message::Streams { streams }),
        RewriteKind::Media {
            update,
            stream_added,
        } => {
            if *stream_added {
                msgs.push(Message::Streams { streams });
            }
            msgs.push(Message::UpdateStream {
                params: update.clone(),
            });
        }
    }
    for msg in &msgs {
        if let Err(e) = ctx.engine.send(msg).await {
            debug!("stream update not sent: {}", e);
            break;
        }
    }
    Reply::ok(http::MPEGURL, rewritten.body.into_bytes())
}

async fn segment(ctx: &ProxyContext, headers: &[(String, String)], encoded: &str) -> Reply {
    let runtime_id = match urls::decode_segment_param(encoded) {
        Ok(id) => id,
        Err(e) => return Reply::error(400, e.to_string()),
    };
    let (url, range) = match urls::parse_segment_runtime_id(&runtime_id) {
        Ok(parts) => parts,
        Err(e) => return Reply::error(400, e.to_string()),
    };

    if use_engine(ctx, &runtime_id).await {
        match ctx.engine.request_segment(&runtime_id).await {
            Ok(payload) => return Reply::ok(http::OCTET_STREAM, payload),
            Err(e) => warn!("engine failed {}, falling back to http: {}", runtime_id, e),
        }
    }

    match fetch::get(&ctx.client, &url, headers, range).await {
        Ok(origin) => Reply::origin(origin, http::OCTET_STREAM),
        Err(e) => {
            warn!("segment fetch failed: {}", e);
            Reply::error(502, e.to_string())
        }
    }
}

async fn use_engine(ctx: &ProxyContext, runtime_id: &str) -> bool {
    if !ctx.shared.p2p.lock().await.is_enabled() || !ctx.engine.is_ready() {
        return false;
    }
    ctx.shared.parser.lock().await.is_current_segment(runtime_id)
}

async fn status(ctx: &ProxyContext) -> Reply {
    let body = serde_json::json!({
        "p2pEnabled": ctx.shared.p2p.lock().await.is_enabled(),
        "engineReady": ctx.engine.is_ready(),
        "stats": ctx.shared.stats.lock().await.snapshot(),
    });
    Reply::ok(http::JSON, body.to_string().into_bytes())
}
