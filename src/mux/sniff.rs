//! First-request inspection for mux connections.
//!
//! Reads raw bytes until the end of the HTTP/1.x header block and extracts
//! the Host and Path. The bytes are kept verbatim so they can be replayed to
//! the backend; nothing is rewritten.

use percent_encoding::percent_decode_str;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest header block a client may send before being dropped.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Header lines parsed per request; more is treated as malformed.
const MAX_HEADERS: usize = 100;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum SniffError {
    #[error("request head exceeds {MAX_HEADER_BYTES} bytes")]
    HeaderTooLarge,

    #[error("malformed request head: {0}")]
    Malformed(&'static str),

    #[error("invalid request head: {0}")]
    Parse(#[from] httparse::Error),

    #[error("connection closed before request head completed")]
    Closed,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// What the sniffer learned from the first request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Every byte read from the client so far, header block first.
    pub raw: Vec<u8>,
    /// Host as sent (absolute-form target or Host header), not normalized.
    pub host: String,
    /// Path without query string; "/" when empty.
    pub path: String,
}

/// Read until the header block is complete and parse it.
pub async fn read_request_head<R>(reader: &mut R) -> Result<RequestHead, SniffError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(SniffError::Closed);
        }

        let scan_from = buf.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find(&buf[scan_from..], HEADER_TERMINATOR) {
            let head_end = scan_from + pos + HEADER_TERMINATOR.len();
            if head_end > MAX_HEADER_BYTES {
                return Err(SniffError::HeaderTooLarge);
            }
            let (host, path) = parse_request_head(&buf[..head_end])?;
            return Ok(RequestHead { raw: buf, host, path });
        }

        if buf.len() > MAX_HEADER_BYTES {
            return Err(SniffError::HeaderTooLarge);
        }
    }
}

/// Extract (host, path) from a complete request head.
///
/// The host is the absolute-form authority when present, else the first
/// Host header. The path is percent-decoded and stripped of its query.
pub fn parse_request_head(head: &[u8]) -> Result<(String, String), SniffError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    if request.parse(head)?.is_partial() {
        return Err(SniffError::Malformed("incomplete request head"));
    }

    let method = request.method.ok_or(SniffError::Malformed("method"))?;
    let target = request.path.ok_or(SniffError::Malformed("request target"))?;
    let host_header = request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("host"))
        .map(|h| String::from_utf8_lossy(h.value).trim().to_string());

    let (target_host, path) = parse_target(method, target)?;
    let host = match target_host {
        Some(h) if !h.is_empty() => h,
        _ => host_header.unwrap_or_default(),
    };
    let path = if path.is_empty() { "/".to_string() } else { path };
    Ok((host, path))
}

/// Host carried by the target (absolute or authority form) and the path.
fn parse_target(method: &str, target: &str) -> Result<(Option<String>, String), SniffError> {
    if target.starts_with('/') {
        let end = target.find(['?', '#']).unwrap_or(target.len());
        return Ok((None, decode_path(&target[..end])?));
    }
    if target == "*" {
        return Ok((None, target.to_string()));
    }
    if method.eq_ignore_ascii_case("CONNECT") {
        return Ok((Some(target.to_string()), String::new()));
    }

    let url = url::Url::parse(target).map_err(|_| SniffError::Malformed("request target"))?;
    let host = url.host_str().map(|h| match url.port() {
        Some(port) => crate::net::listener::join_host_port(h, port),
        None => h.to_string(),
    });
    Ok((host, decode_path(url.path())?))
}

fn decode_path(raw: &str) -> Result<String, SniffError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|p| p.into_owned())
        .map_err(|_| SniffError::Malformed("path is not valid UTF-8"))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
