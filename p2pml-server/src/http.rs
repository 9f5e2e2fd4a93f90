//! Minimal HTTP/1.1 request head parsing and response writing for the local proxy.

use reqwest::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_HEAD_LEN: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;

pub const MPEGURL: &str = "application/vnd.apple.mpegurl";
pub const OCTET_STREAM: &str = "application/octet-stream";
pub const JSON: &str = "application/json";

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("connection closed before request head")]
    Closed,
    #[error("request head too large")]
    TooLarge,
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parse a complete request head. `Ok(None)` means more bytes are needed.
pub fn parse_request(buf: &[u8]) -> Result<Option<Request>, RequestError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let status = req
        .parse(buf)
        .map_err(|e| RequestError::Malformed(e.to_string()))?;
    if status.is_partial() {
        return Ok(None);
    }
    let method = req
        .method
        .ok_or_else(|| RequestError::Malformed("missing method".into()))?
        .to_string();
    let target = req
        .path
        .ok_or_else(|| RequestError::Malformed("missing target".into()))?
        .to_string();
    let headers = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect();
    Ok(Some(Request {
        method,
        target,
        headers,
    }))
}

/// Read until a full request head is buffered. Bodies are ignored.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Request, RequestError> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(RequestError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(req) = parse_request(&buf)? {
            return Ok(req);
        }
        if buf.len() > MAX_HEAD_LEN {
            return Err(RequestError::TooLarge);
        }
    }
}

/// Write a full response. Every response closes the connection and allows any origin.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    content_type: Option<&str>,
    body: &[u8],
) -> std::io::Result<()> {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let mut head = format!("HTTP/1.1 {} {}\r\n", status, reason);
    if let Some(ct) = content_type {
        head.push_str(&format!("Content-Type: {}\r\n", ct));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        body.len()
    ));
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Plain-text error response.
pub async fn write_error<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    message: &str,
) -> std::io::Result<()> {
    write_response(writer, status, Some("text/plain; charset=utf-8"), message.as_bytes()).await
}
