//! nodegate: node-side agent for a remote control panel.
//!
//! # Architecture Overview
//!
//! ```text
//!                ┌──────────────────────────────────────────────┐
//!                │                   nodegate                    │
//!                │                                               │
//!   Panel  ◀─────┼── panel::TransportClient ◀── node::Controller │
//!  (ws/http)     │     channel ⇄ breaker ⇄ fallback     │        │
//!                │                                      ▼        │
//!   Client ──────┼─▶ mux::MuxServer ──sniff Host/Path──▶ Backend │
//!  (shared port) │     RouteTable lookup, byte splice            │
//!                │                                               │
//!                │  config · lifecycle · observability · resilience
//!                └──────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod mux;
pub mod net;
pub mod node;
pub mod panel;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::AgentConfig;
pub use lifecycle::Shutdown;
pub use mux::MuxManager;
pub use node::Node;
pub use panel::TransportClient;
