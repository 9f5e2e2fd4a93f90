//! Loopback engine: speaks the bridge protocol but loads every segment over HTTP.
//! Lets the full pipeline run without a real P2P engine.

use std::net::SocketAddr;

use log::{debug, info, warn};
use p2pml_core::{encode_frame, urls, CoreConfig, CoreEvent, DownloadSource, Message, RequestId};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::fetch::{self, HttpTimeouts};
use crate::transport;

/// Connect to the engine bridge at `addr` and serve requests until `Shutdown` or disconnect.
pub async fn run_loopback_engine(addr: SocketAddr, timeouts: HttpTimeouts) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    let engine_id = *uuid::Uuid::new_v4().as_bytes();
    transport::handshake_connect(&mut stream, &engine_id).await?;
    let client = fetch::build_client(timeouts)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let (mut reader, writer) = stream.into_split();
    let (tx, _writer_task) = transport::spawn_writer(writer);

    loop {
        let msg = match transport::read_message(&mut reader).await {
            Ok(msg) => msg,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        match msg {
            Message::InitCore { core_config_json } => {
                let reply = match CoreConfig::parse(&core_config_json) {
                    Ok(config) => {
                        info!(
                            "loopback engine ready (swarm {})",
                            config.swarm_id.as_deref().unwrap_or("default")
                        );
                        Message::CoreReady
                    }
                    Err(e) => Message::CoreError {
                        message: e.to_string(),
                    },
                };
                queue(&tx, &reply);
            }
            Message::SegmentRequest {
                request_id,
                segment_runtime_id,
            } => {
                let tx = tx.clone();
                let client = client.clone();
                tokio::spawn(async move {
                    for reply in load_segment(&client, request_id, &segment_runtime_id).await {
                        queue(&tx, &reply);
                    }
                });
            }
            Message::Shutdown => {
                info!("loopback engine shutting down");
                break;
            }
            other => debug!("loopback engine ignores {:?}", kind(&other)),
        }
    }
    Ok(())
}

async fn load_segment(
    client: &reqwest::Client,
    request_id: RequestId,
    runtime_id: &str,
) -> Vec<Message> {
    let result = match urls::parse_segment_runtime_id(runtime_id) {
        Ok((url, range)) => fetch::get(client, &url, &[], range)
            .await
            .and_then(|r| r.into_success(&url))
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match result {
        Ok(resp) => vec![
            Message::Event {
                event: CoreEvent::ChunkDownloaded {
                    bytes_length: resp.body.len() as u64,
                    download_source: DownloadSource::Http,
                },
            },
            Message::SegmentData {
                request_id,
                payload: resp.body,
            },
        ],
        Err(reason) => {
            warn!("loopback engine failed {}: {}", runtime_id, reason);
            vec![Message::SegmentError { request_id, reason }]
        }
    }
}

fn queue(tx: &mpsc::UnboundedSender<Vec<u8>>, msg: &Message) {
    if let Some(frame) = encode_reply(msg) {
        let _ = tx.send(frame);
    }
}

/// A segment that cannot be framed is answered with `SegmentError` so the request does not hang.
fn encode_reply(msg: &Message) -> Option<Vec<u8>> {
    let err = match encode_frame(msg) {
        Ok(frame) => return Some(frame),
        Err(e) => e,
    };
    warn!("loopback engine cannot encode reply: {}", err);
    let Message::SegmentData { request_id, .. } = msg else {
        return None;
    };
    encode_frame(&Message::SegmentError {
        request_id: *request_id,
        reason: err.to_string(),
    })
    .ok()
}

fn kind(msg: &Message) -> &'static str {
    match msg {
        Message::Streams { .. } => "Streams",
        Message::UpdateStream { .. } => "UpdateStream",
        Message::PlaybackInfo { .. } => "PlaybackInfo",
        Message::ApplyDynamicConfig { .. } => "ApplyDynamicConfig",
        _ => "unexpected message",
    }
}
