//! Engine connection plumbing: handshake and length-prefixed frames over a byte stream.

use std::io;

use p2pml_core::wire::{decode_payload, frame_len, LEN_SIZE};
use p2pml_core::{encode_frame, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const HANDSHAKE_SIZE: usize = 1 + 16; // version + endpoint id

fn handshake_bytes(id: &[u8; 16]) -> [u8; HANDSHAKE_SIZE] {
    let mut out = [0u8; HANDSHAKE_SIZE];
    out[0] = PROTOCOL_VERSION;
    out[1..].copy_from_slice(id);
    out
}

fn peer_id(buf: &[u8; HANDSHAKE_SIZE]) -> io::Result<[u8; 16]> {
    if buf[0] != PROTOCOL_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported protocol version",
        ));
    }
    let mut id = [0u8; 16];
    id.copy_from_slice(&buf[1..]);
    Ok(id)
}

/// Host side: the engine speaks first. Returns the engine id.
pub async fn handshake_accept<S>(stream: &mut S, local_id: &[u8; 16]) -> io::Result<[u8; 16]>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut buf).await?;
    let id = peer_id(&buf)?;
    stream.write_all(&handshake_bytes(local_id)).await?;
    stream.flush().await?;
    Ok(id)
}

/// Engine side. Returns the host id.
pub async fn handshake_connect<S>(stream: &mut S, local_id: &[u8; 16]) -> io::Result<[u8; 16]>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&handshake_bytes(local_id)).await?;
    stream.flush().await?;
    let mut buf = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut buf).await?;
    peer_id(&buf)
}

/// Read one frame and decode it.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Message> {
    let mut len_buf = [0u8; LEN_SIZE];
    reader.read_exact(&mut len_buf).await?;
    let len = frame_len(&len_buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode_payload(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Encode and write one frame directly.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> io::Result<()> {
    let frame = encode_frame(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Drain encoded frames into `writer` until every sender is dropped or a write fails.
pub fn spawn_writer<W>(mut writer: W) -> (mpsc::UnboundedSender<Vec<u8>>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() || writer.flush().await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });
    (tx, task)
}
