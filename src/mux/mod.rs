//! Shared-port connection multiplexer.
//!
//! # Data Flow
//! ```text
//! Client TCP connection on a shared port
//!     → server.rs (accept, per-connection task)
//!     → sniff.rs (buffer and parse the first request head, 10s / 64KiB)
//!     → route.rs (normalized (host, path) lookup, wildcard fallbacks)
//!     → server.rs (dial backend, replay head bytes, splice)
//!
//! Registration:
//!     manager.rs ensure_listener → register_route(tag, ...) → unregister_route(tag)
//! ```
//!
//! # Design Decisions
//! - Only the first request of a connection is inspected; the rest of the
//!   connection belongs to that backend (built for upgraded, long-lived
//!   streams). Pipelined requests to different routes are not supported.
//! - No TLS termination: encrypted first bytes are dropped as unparsable
//! - Unmatched or malformed connections are dropped without a response

pub mod error;
pub mod manager;
pub mod route;
pub mod server;
pub mod sniff;

pub use error::MuxError;
pub use manager::MuxManager;
pub use route::{MuxKey, Route, RouteKey, RouteTable};
pub use server::{MuxServer, MuxTimeouts};
