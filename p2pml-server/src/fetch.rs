//! Origin HTTP fetches shared by the proxy, the player and the loopback engine.

use std::time::Duration;

use p2pml_core::ByteRange;
use reqwest::header::{HeaderName, HeaderValue, RANGE};

/// Request headers never forwarded from the player to the origin.
pub const EXCLUDED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "expect",
    "upgrade",
    "proxy-connection",
    "keep-alive",
    "accept-encoding",
    "content-length",
];

/// Connect/read timeouts for origin requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl HttpTimeouts {
    pub fn from_millis(connect_ms: u64, read_ms: u64) -> Self {
        Self {
            connect: Duration::from_millis(connect_ms),
            read: Duration::from_millis(read_ms),
        }
    }
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self::from_millis(15_000, 15_000)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status { url: String, status: u16 },
}

/// Origin response, fully buffered.
#[derive(Debug)]
pub struct OriginResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl OriginResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error out on non-2xx.
    pub fn into_success(self, url: &str) -> Result<Self, FetchError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Status {
                url: url.to_string(),
                status: self.status,
            })
        }
    }
}

pub fn build_client(timeouts: HttpTimeouts) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .connect_timeout(timeouts.connect)
        .read_timeout(timeouts.read)
        .build()
        .map_err(FetchError::Client)
}

/// True when a player request header may be copied to the origin request.
pub fn is_forwardable(name: &str) -> bool {
    !EXCLUDED_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// GET `url`. `headers` are copied unless excluded; `range` overrides any forwarded Range.
pub async fn get(
    client: &reqwest::Client,
    url: &str,
    headers: &[(String, String)],
    range: Option<ByteRange>,
) -> Result<OriginResponse, FetchError> {
    let mut req = client.get(url);
    for (name, value) in headers {
        if !is_forwardable(name) || (range.is_some() && name.eq_ignore_ascii_case("range")) {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        req = req.header(name, value);
    }
    if let Some(r) = range {
        req = req.header(RANGE, r.to_header_value());
    }
    let map_err = |source| FetchError::Request {
        url: url.to_string(),
        source,
    };
    let resp = req.send().await.map_err(map_err)?;
    let status = resp.status().as_u16();
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = resp.bytes().await.map_err(map_err)?.to_vec();
    Ok(OriginResponse {
        status,
        content_type,
        body,
    })
}
