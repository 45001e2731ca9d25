//! Channel endpoint derivation.
//!
//! Resolution order:
//! 1. `ws_url` set: its scheme and authority, plus its path prefix (if any)
//!    joined with the request path.
//! 2. Otherwise `ws`/`wss` mirroring the api host scheme, the api host name and
//!    port 51821, each overridable through `ws_scheme`, `ws_host`, `ws_port`.
//!
//! The identity query parameters are always attached.

use url::Url;

use super::error::{PanelError, PanelResult};
use crate::config::ApiConfig;
use crate::net::listener::join_host_port;

/// Port used when neither `ws_url` nor `ws_port` names one.
pub const DEFAULT_CHANNEL_PORT: u16 = 51821;

/// How the channel endpoint was configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    Default,
    WsUrl,
    WsParts,
}

impl EndpointMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::WsUrl => "ws_url",
            Self::WsParts => "ws_parts",
        }
    }
}

impl std::fmt::Display for EndpointMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity sent as query parameters on every panel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelIdentity {
    pub node_type: String,
    pub node_id: u64,
    pub token: String,
}

impl PanelIdentity {
    /// Query pairs in key order.
    pub fn query_pairs(&self) -> [(&'static str, String); 3] {
        [
            ("node_id", self.node_id.to_string()),
            ("node_type", self.node_type.clone()),
            ("token", self.token.clone()),
        ]
    }

    pub fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in self.query_pairs() {
            pairs.append_pair(key, &value);
        }
    }
}

fn invalid(url: &str, reason: impl Into<String>) -> PanelError {
    PanelError::InvalidUrl {
        url: url.to_string(),
        reason: reason.into(),
    }
}

fn parse(raw: &str) -> PanelResult<Url> {
    Url::parse(raw).map_err(|e| invalid(raw, e.to_string()))
}

fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn bare_host(url: &Url) -> Option<&str> {
    url.host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .filter(|h| !h.is_empty())
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Scheme, authority and path prefix of the channel endpoint, without query.
fn channel_base(api: &ApiConfig) -> PanelResult<(String, String, String)> {
    if !api.ws_url.is_empty() {
        let base = parse(&api.ws_url)?;
        let authority = authority(&base).ok_or_else(|| invalid(&api.ws_url, "missing host"))?;
        let prefix = match base.path() {
            "" | "/" => String::new(),
            p => p.trim_end_matches('/').to_string(),
        };
        return Ok((base.scheme().to_string(), authority, prefix));
    }

    let api_base = parse(&api.api_host)?;
    let hostname = bare_host(&api_base).ok_or_else(|| invalid(&api.api_host, "empty hostname"))?;

    let mut scheme = if api_base.scheme().eq_ignore_ascii_case("https") {
        "wss".to_string()
    } else {
        "ws".to_string()
    };
    if !api.ws_scheme.is_empty() {
        scheme = api.ws_scheme.clone();
    }
    let host = if api.ws_host.is_empty() {
        hostname
    } else {
        api.ws_host.as_str()
    };
    let port = if api.ws_port > 0 {
        api.ws_port
    } else {
        DEFAULT_CHANNEL_PORT
    };
    Ok((scheme, join_host_port(host, port), String::new()))
}

/// Full channel URL for a request path, identity attached.
pub fn channel_url(api: &ApiConfig, identity: &PanelIdentity, path: &str) -> PanelResult<Url> {
    let (scheme, authority, prefix) = channel_base(api)?;
    let raw = format!("{scheme}://{authority}{prefix}{}", ensure_leading_slash(path));
    let mut url = parse(&raw)?;
    identity.apply(&mut url);
    Ok(url)
}

/// Endpoint mode and base endpoint for startup logging.
pub fn describe_endpoint(api: &ApiConfig) -> (EndpointMode, String) {
    let mode = if !api.ws_url.is_empty() {
        EndpointMode::WsUrl
    } else if !api.ws_scheme.is_empty() || !api.ws_host.is_empty() || api.ws_port > 0 {
        EndpointMode::WsParts
    } else {
        EndpointMode::Default
    };

    let endpoint = match channel_base(api) {
        Ok((scheme, authority, prefix)) => format!("{scheme}://{authority}{prefix}"),
        Err(_) if mode == EndpointMode::WsUrl => api.ws_url.clone(),
        Err(_) => String::new(),
    };
    (mode, endpoint)
}
