//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Panel request:
//!     → circuit_breaker.rs (is the persistent channel worth trying?)
//!     → timeouts.rs (every exchange, dial and header read has a deadline)
//!     → On fallback failure: retries.rs (retryable? wait backoff.rs delay)
//!
//! Node controller start failure:
//!     → backoff.rs RestartBackoff (10s, doubling, capped at 60s)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - The channel breaker has a fixed cooldown, not a failure-rate window
//! - Fallback retries are bounded (3 attempts) and jittered

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{ChannelBreaker, ChannelState};
