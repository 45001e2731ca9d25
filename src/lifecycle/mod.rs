//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Logging/metrics → Mux manager → Nodes → Wait
//!
//! Shutdown (shutdown.rs):
//!     trigger() → watch channel → every subscribed task returns
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: nodes first (flush traffic, drop routes), then listeners
//! - A late subscriber still observes an earlier trigger

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
