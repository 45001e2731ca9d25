//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limit)
//!     → connection.rs (id, state machine, live count)
//!     → Hand off to the mux connection handler
//! ```

pub mod connection;
pub mod listener;
