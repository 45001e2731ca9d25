//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (node ids, ports, addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Node type support is checked when the transport client is built, so an
//!   unsupported node is skipped at runtime instead of rejecting the file

use std::fmt;
use std::net::IpAddr;

use crate::config::schema::AgentConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted location, e.g. "nodes[0].api.api_host".
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed config.
pub fn validate_config(config: &AgentConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.log.level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "log.level",
            format!("unknown level '{}'", config.log.level),
        ));
    }

    if config.metrics.enabled && config.metrics.address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "metrics.address",
            format!("'{}' is not a socket address", config.metrics.address),
        ));
    }

    for (i, node) in config.nodes.iter().enumerate() {
        let api = &node.api;
        if api.api_host.is_empty() {
            errors.push(ValidationError::new(
                format!("nodes[{i}].api.api_host"),
                "must not be empty",
            ));
        } else if url::Url::parse(&api.api_host).is_err() {
            errors.push(ValidationError::new(
                format!("nodes[{i}].api.api_host"),
                format!("'{}' is not a URL", api.api_host),
            ));
        }
        if api.node_type.is_empty() {
            errors.push(ValidationError::new(
                format!("nodes[{i}].api.node_type"),
                "must not be empty",
            ));
        }
        if api.node_id == 0 {
            errors.push(ValidationError::new(
                format!("nodes[{i}].api.node_id"),
                "must be greater than 0",
            ));
        }

        if let Some(mux) = &node.mux {
            if mux.port == 0 {
                errors.push(ValidationError::new(
                    format!("nodes[{i}].mux.port"),
                    "must not be 0",
                ));
            }
            if mux.backend.is_empty() {
                errors.push(ValidationError::new(
                    format!("nodes[{i}].mux.backend"),
                    "must not be empty",
                ));
            }
            if mux.listen_ip.parse::<IpAddr>().is_err() {
                errors.push(ValidationError::new(
                    format!("nodes[{i}].mux.listen_ip"),
                    format!("'{}' is not an IP address", mux.listen_ip),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
