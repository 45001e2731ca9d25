//! Panel subsystem.
//!
//! # Data Flow
//! ```text
//! node controller
//!     → user.rs (NodeApi: users, alive list, traffic, online IPs)
//!     → client.rs (TransportClient::request)
//!         → endpoint.rs + envelope.rs (persistent channel)
//!         → reqwest fallback
//!     → error.rs (PanelError)
//! ```

pub mod client;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod user;

pub use client::{PanelRequest, PanelResponse, Transport, TransportClient};
pub use endpoint::EndpointMode;
pub use error::{PanelError, PanelResult};
pub use user::{Fetched, NodeApi, UserInfo, UserTraffic};
