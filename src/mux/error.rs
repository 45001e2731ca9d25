//! Mux error types.

use thiserror::Error;

use crate::net::listener::ListenerError;

/// Errors surfaced by mux registry operations.
///
/// Per-connection failures never surface here; they only drop the connection.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("mux listener {key} failed: {source}")]
    Bind {
        key: String,
        #[source]
        source: ListenerError,
    },

    #[error("mux server not found for {0}")]
    ServerNotFound(String),

    #[error("mux route conflict host={host} path={path} already used by tag={existing_tag}")]
    RouteConflict {
        host: String,
        path: String,
        existing_tag: String,
    },

    #[error("mux tag {0} is already registered")]
    TagInUse(String),
}
