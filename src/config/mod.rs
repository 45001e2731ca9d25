//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! nodegate.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AgentConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new AgentConfig sent to the startup loop, which restarts nodes
//! ```

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AgentConfig, ApiConfig, LogConfig, LogFormat, MetricsConfig, MuxRouteConfig, NodeConfig,
    NodeOptions,
};
