//! Failover panel transport.
//!
//! # Request Path
//! ```text
//! request()
//!     → breaker allows channel? → lock channel slot
//!         → connect lazily → send envelope → read one reply
//!         → on error: drop connection, retry once
//!         → on second error: breaker Unavailable, fall through
//!     → fallback HTTP (GET/POST, 3 attempts, jittered backoff)
//! ```
//!
//! # Design Decisions
//! - One channel connection per client, guarded by an async mutex (single-flight)
//! - The whole channel exchange, connect included, is bounded by the client timeout
//! - A malformed reply counts as a channel failure, same as an I/O error

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Method;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::endpoint::{channel_url, describe_endpoint, EndpointMode, PanelIdentity};
use super::envelope::{HeaderMultimap, RequestEnvelope, ResponseEnvelope};
use super::error::{PanelError, PanelResult};
use crate::config::ApiConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::retries::{
    is_idempotent, is_retryable, FALLBACK_ATTEMPTS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS,
};
use crate::resilience::timeouts::panel_timeout;
use crate::resilience::{ChannelBreaker, ChannelState};

type ChannelStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Node types the panel serves. `v2ray` is accepted as an alias of `vmess`.
pub const SUPPORTED_NODE_TYPES: &[&str] = &[
    "vmess",
    "trojan",
    "shadowsocks",
    "hysteria",
    "hysteria2",
    "tuic",
    "anytls",
    "vless",
];

/// Lowercase and validate a node type.
pub fn normalize_node_type(node_type: &str) -> PanelResult<String> {
    let lowered = node_type.to_ascii_lowercase();
    if lowered == "v2ray" {
        return Ok("vmess".to_string());
    }
    if SUPPORTED_NODE_TYPES.contains(&lowered.as_str()) {
        Ok(lowered)
    } else {
        Err(PanelError::UnsupportedNodeType(lowered))
    }
}

/// Which transport served a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Channel,
    Fallback,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Channel => "channel",
            Transport::Fallback => "fallback",
        }
    }
}

/// One panel API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl PanelRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            body,
            ..Self::new("POST", path)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn envelope(&self) -> RequestEnvelope {
        RequestEnvelope {
            method: self.method.clone(),
            path: self.path.clone(),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), vec![v.clone()]))
                .collect(),
            body: self.body.clone(),
        }
    }
}

/// Panel reply, whichever transport carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelResponse {
    pub status: u16,
    pub headers: HeaderMultimap,
    pub body: Vec<u8>,
    pub transport: Transport,
}

impl PanelResponse {
    /// First value of a header, name matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// Panel client with a persistent channel and an HTTP fallback.
pub struct TransportClient {
    api: ApiConfig,
    /// "{api_host}-{node_type}-{node_id}", the node's metric label.
    label: String,
    base_url: String,
    identity: PanelIdentity,
    timeout: Duration,
    breaker: ChannelBreaker,
    channel: Mutex<Option<ChannelStream>>,
    http: reqwest::Client,
}

impl TransportClient {
    pub fn new(api: &ApiConfig) -> PanelResult<Self> {
        Self::with_breaker(api, ChannelBreaker::new())
    }

    /// Same as `new` with a custom channel cooldown.
    pub fn with_channel_cooldown(api: &ApiConfig, cooldown: Duration) -> PanelResult<Self> {
        Self::with_breaker(api, ChannelBreaker::with_cooldown(cooldown))
    }

    fn with_breaker(api: &ApiConfig, breaker: ChannelBreaker) -> PanelResult<Self> {
        let node_type = normalize_node_type(&api.node_type)?;

        let parsed = Url::parse(&api.api_host).map_err(|e| PanelError::InvalidUrl {
            url: api.api_host.clone(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(PanelError::InvalidUrl {
                url: api.api_host.clone(),
                reason: "not an absolute base url".to_string(),
            });
        }
        if !api.ws_url.is_empty() {
            Url::parse(&api.ws_url).map_err(|e| PanelError::InvalidUrl {
                url: api.ws_url.clone(),
                reason: e.to_string(),
            })?;
        }

        let timeout = panel_timeout(api.timeout);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| PanelError::Http {
                url: api.api_host.clone(),
                source,
            })?;

        Ok(Self {
            label: format!("{}-{}-{}", api.api_host, api.node_type, api.node_id),
            base_url: api.api_host.trim_end_matches('/').to_string(),
            identity: PanelIdentity {
                node_type,
                node_id: api.node_id,
                token: api.api_key.clone(),
            },
            api: api.clone(),
            timeout,
            breaker,
            channel: Mutex::new(None),
            http,
        })
    }

    /// Normalized node type.
    pub fn node_type(&self) -> &str {
        &self.identity.node_type
    }

    pub fn node_id(&self) -> u64 {
        self.identity.node_id
    }

    pub fn api_host(&self) -> &str {
        &self.api.api_host
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn channel_state(&self) -> ChannelState {
        self.breaker.state()
    }

    pub fn endpoint(&self) -> (EndpointMode, String) {
        describe_endpoint(&self.api)
    }

    /// Fallback target for a path, without the identity query.
    pub fn assemble_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a status >= 400 into an error carrying the panel's message.
    pub fn check_response(&self, path: &str, response: &PanelResponse) -> PanelResult<()> {
        if response.status >= 400 {
            return Err(PanelError::Status {
                url: self.assemble_url(path),
                status: response.status,
                body: response.text(),
            });
        }
        Ok(())
    }

    /// Issue one panel call over the channel if possible, else over HTTP.
    pub async fn request(&self, req: PanelRequest) -> PanelResult<PanelResponse> {
        if self.breaker.allows_attempt() {
            let payload = req.envelope().encode().map_err(PanelError::Encode)?;
            match self.channel_exchange(&req, &payload).await {
                Ok(reply) => {
                    self.breaker.mark_available();
                    metrics::record_channel_state(&self.label, ChannelState::Available);
                    metrics::record_panel_request(Transport::Channel.as_str(), "ok");
                    return Ok(PanelResponse {
                        status: reply.status,
                        headers: reply.headers,
                        body: reply.body,
                        transport: Transport::Channel,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        api_host = %self.api.api_host,
                        path = %req.path,
                        error = %e,
                        "Channel exchange failed twice"
                    );
                    self.breaker.mark_unavailable();
                    metrics::record_channel_state(&self.label, ChannelState::Unavailable);
                    metrics::record_panel_request(Transport::Channel.as_str(), "error");
                }
            }
        }

        let result = self.fallback(&req).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::record_panel_request(Transport::Fallback.as_str(), outcome);
        result
    }

    /// Drop the channel connection, if any.
    pub async fn close_channel(&self) {
        if let Some(mut ws) = self.channel.lock().await.take() {
            let _ = tokio::time::timeout(self.timeout, ws.close(None)).await;
        }
    }

    async fn channel_exchange(
        &self,
        req: &PanelRequest,
        payload: &str,
    ) -> PanelResult<ResponseEnvelope> {
        let mut slot = self.channel.lock().await;
        match self.channel_attempt(&mut slot, req, payload).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::debug!(path = %req.path, error = %e, "Channel exchange failed, reconnecting");
                self.channel_attempt(&mut slot, req, payload).await
            }
        }
    }

    async fn channel_attempt(
        &self,
        slot: &mut Option<ChannelStream>,
        req: &PanelRequest,
        payload: &str,
    ) -> PanelResult<ResponseEnvelope> {
        let result = match tokio::time::timeout(self.timeout, self.exchange_once(slot, req, payload)).await {
            Ok(result) => result,
            Err(_) => Err(PanelError::Timeout(self.timeout)),
        };
        if result.is_err() {
            *slot = None;
        }
        result
    }

    async fn exchange_once(
        &self,
        slot: &mut Option<ChannelStream>,
        req: &PanelRequest,
        payload: &str,
    ) -> PanelResult<ResponseEnvelope> {
        if slot.is_none() {
            *slot = Some(self.connect(req).await?);
        }
        let ws = slot.as_mut().ok_or(PanelError::ChannelClosed)?;

        ws.send(Message::text(payload.to_owned())).await?;

        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return ResponseEnvelope::decode(text.as_bytes()).map_err(PanelError::Protocol)
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return ResponseEnvelope::decode(&bytes).map_err(PanelError::Protocol)
                }
                Some(Ok(Message::Close(_))) | None => return Err(PanelError::ChannelClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn connect(&self, req: &PanelRequest) -> PanelResult<ChannelStream> {
        let url = channel_url(&self.api, &self.identity, &req.path)?;
        let mut handshake = url.as_str().into_client_request()?;
        for (name, value) in &req.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    handshake.headers_mut().insert(name, value);
                }
                _ => tracing::debug!(header = %name, "Skipping invalid handshake header"),
            }
        }

        let (ws, _response) = tokio_tungstenite::connect_async(handshake).await?;
        tracing::debug!(
            api_host = %self.api.api_host,
            endpoint = %url.host_str().unwrap_or_default(),
            "Panel channel connected"
        );
        Ok(ws)
    }

    async fn fallback(&self, req: &PanelRequest) -> PanelResult<PanelResponse> {
        let method = match req.method.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            _ => return Err(PanelError::UnsupportedMethod(req.method.clone())),
        };
        let url = self.assemble_url(&req.path);
        let query = self.identity.query_pairs();

        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut builder = self.http.request(method.clone(), &url).query(&query);
            for (name, value) in &req.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if !req.body.is_empty() {
                builder = builder.body(req.body.clone());
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if attempt >= FALLBACK_ATTEMPTS || !is_retryable(&method, Some(status), false) {
                        return Self::read_fallback_response(&url, response).await;
                    }
                    tracing::debug!(url = %url, status = status.as_u16(), attempt, "Retrying panel request");
                }
                Err(source) => {
                    // a timed-out POST may already have been applied by the panel
                    let connection_error = source.is_connect()
                        || (is_idempotent(&method) && (source.is_timeout() || source.is_request()));
                    if attempt >= FALLBACK_ATTEMPTS || !is_retryable(&method, None, connection_error) {
                        return Err(PanelError::Http { url, source });
                    }
                    tracing::debug!(url = %url, error = %source, attempt, "Retrying panel request");
                }
            }

            tokio::time::sleep(calculate_backoff(attempt, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS)).await;
        }
    }

    async fn read_fallback_response(
        url: &str,
        response: reqwest::Response,
    ) -> PanelResult<PanelResponse> {
        let status = response.status().as_u16();
        let mut headers = HeaderMultimap::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        let body = response.bytes().await.map_err(|source| PanelError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok(PanelResponse {
            status,
            headers,
            body: body.to_vec(),
            transport: Transport::Fallback,
        })
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("api_host", &self.api.api_host)
            .field("node_type", &self.identity.node_type)
            .field("node_id", &self.identity.node_id)
            .field("channel_state", &self.breaker.state())
            .finish()
    }
}
