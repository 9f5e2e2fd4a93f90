//! URL helpers: proxy URLs served to the player, absolute URL resolution, segment runtime ids.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use url::Url;

use crate::protocol::ByteRange;

/// Loopback host the proxy binds to and advertises.
pub const LOCALHOST: &str = "127.0.0.1";
/// Query key carrying a percent-encoded playlist URL.
pub const MANIFEST_PARAM: &str = "manifest";
/// Query key carrying a base64-encoded segment runtime id.
pub const SEGMENT_PARAM: &str = "segment";

const HTTP_PREFIX: &str = "http://";
const HTTPS_PREFIX: &str = "https://";

#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    #[error("invalid base url {0}: {1}")]
    InvalidBase(String, url::ParseError),
    #[error("cannot resolve {uri} against {base}: {source}")]
    Join {
        base: String,
        uri: String,
        source: url::ParseError,
    },
    #[error("malformed query parameter")]
    MalformedParam,
    #[error("malformed byte range in segment id: {0}")]
    MalformedRange(String),
}

/// `http://127.0.0.1:<port>/<path>`
pub fn local_url(port: u16, path: &str) -> String {
    format!("{}{}:{}/{}", HTTP_PREFIX, LOCALHOST, port, path)
}

/// Path+query that routes a playlist through the proxy.
pub fn manifest_path(manifest_url: &str) -> String {
    format!(
        "?{}={}",
        MANIFEST_PARAM,
        utf8_percent_encode(manifest_url, NON_ALPHANUMERIC)
    )
}

/// Path+query that routes a segment through the proxy.
pub fn segment_path(runtime_id: &str) -> String {
    format!(
        "?{}={}",
        SEGMENT_PARAM,
        URL_SAFE_NO_PAD.encode(runtime_id.as_bytes())
    )
}

pub fn decode_manifest_param(value: &str) -> Result<String, UrlError> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| UrlError::MalformedParam)
}

pub fn decode_segment_param(value: &str) -> Result<String, UrlError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.as_bytes())
        .map_err(|_| UrlError::MalformedParam)?;
    String::from_utf8(bytes).map_err(|_| UrlError::MalformedParam)
}

/// Resolve a playlist entry against the playlist URL. Absolute http(s) URIs are returned as-is.
pub fn absolute_url(base: &str, uri: &str) -> Result<String, UrlError> {
    let lower = uri.to_ascii_lowercase();
    if lower.starts_with(HTTP_PREFIX) || lower.starts_with(HTTPS_PREFIX) {
        return Ok(uri.to_string());
    }
    let base_url = Url::parse(base).map_err(|e| UrlError::InvalidBase(base.to_string(), e))?;
    base_url
        .join(uri)
        .map(|u| u.to_string())
        .map_err(|source| UrlError::Join {
            base: base.to_string(),
            uri: uri.to_string(),
            source,
        })
}

/// Runtime id of a segment: the absolute URL, with `|start-end` appended for byte-range segments.
pub fn segment_runtime_id(url: &str, byte_range: Option<ByteRange>) -> String {
    match byte_range {
        Some(r) => format!("{}|{}-{}", url, r.start, r.end),
        None => url.to_string(),
    }
}

/// Split a runtime id back into URL and optional byte range.
pub fn parse_segment_runtime_id(id: &str) -> Result<(String, Option<ByteRange>), UrlError> {
    let Some((url, range)) = id.rsplit_once('|') else {
        return Ok((id.to_string(), None));
    };
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| UrlError::MalformedRange(id.to_string()))?;
    let start: u64 = start
        .parse()
        .map_err(|_| UrlError::MalformedRange(id.to_string()))?;
    let end: u64 = end
        .parse()
        .map_err(|_| UrlError::MalformedRange(id.to_string()))?;
    if end < start {
        return Err(UrlError::MalformedRange(id.to_string()));
    }
    Ok((url.to_string(), Some(ByteRange { start, end })))
}

/// Query pairs of a request target (`/path?a=b&c=d`). Values are left encoded.
pub fn parse_query(target: &str) -> Vec<(&str, &str)> {
    let Some((_, query)) = target.split_once('?') else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .map(|kv| kv.split_once('=').unwrap_or((kv, "")))
        .collect()
}

/// Path part of a request target, without the query.
pub fn target_path(target: &str) -> &str {
    target.split_once('?').map(|(p, _)| p).unwrap_or(target)
}
