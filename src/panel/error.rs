//! Panel transport errors.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while talking to the panel.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Node type outside the supported protocol list.
    #[error("unsupported node type: {0}")]
    UnsupportedNodeType(String),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The fallback transport only speaks GET and POST.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("channel error: {0}")]
    Channel(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("channel closed by peer")]
    ChannelClosed,

    #[error("channel exchange timed out after {0:?}")]
    Timeout(Duration),

    /// Reply frame was not a valid envelope.
    #[error("malformed channel envelope: {0}")]
    Protocol(#[source] serde_json::Error),

    #[error("request {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Panel answered with status >= 400.
    #[error("request {url} failed: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("decode {what} error: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("encode request body: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Result type for panel operations.
pub type PanelResult<T> = Result<T, PanelError>;
