//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML config file.

use serde::{Deserialize, Serialize};

/// Root configuration for the node agent.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Logging settings.
    pub log: LogConfig,

    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,

    /// Panel nodes served by this agent.
    pub nodes: Vec<NodeConfig>,

    /// Connection limit applied to every shared mux listener.
    pub mux_max_connections: usize,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus scrape endpoint.
    pub enabled: bool,

    /// Scrape endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// One panel node: how to reach the panel and what to expose locally.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct NodeConfig {
    pub api: ApiConfig,

    #[serde(default)]
    pub options: NodeOptions,

    /// Optional route on a shared mux listener.
    #[serde(default)]
    pub mux: Option<MuxRouteConfig>,
}

/// Panel API identity and channel endpoint overrides.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct ApiConfig {
    /// Panel base URL, e.g. "https://panel.example.com".
    pub api_host: String,

    /// Node API token.
    pub api_key: String,

    /// Proxy protocol kind (vmess, trojan, vless, ...).
    pub node_type: String,

    pub node_id: u64,

    /// Request timeout in seconds (0 = 5s default).
    pub timeout: u64,

    /// Full channel URL override, e.g. "wss://panel.example.com:51821/ws".
    pub ws_url: String,

    /// Channel scheme override (ws or wss).
    pub ws_scheme: String,

    /// Channel host override.
    pub ws_host: String,

    /// Channel port override (0 = 51821).
    pub ws_port: u16,
}

/// Periodic sync intervals for a node controller.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NodeOptions {
    /// Seconds between user/alive pulls.
    pub pull_interval_secs: u64,

    /// Seconds between traffic pushes.
    pub push_interval_secs: u64,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            pull_interval_secs: 60,
            push_interval_secs: 60,
        }
    }
}

/// Route registered on a shared mux listener for a node.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MuxRouteConfig {
    /// Listen address of the shared port.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    pub port: u16,

    /// Host to match ("*" for any).
    #[serde(default = "default_wildcard")]
    pub host: String,

    /// Path to match ("*" for any).
    #[serde(default = "default_root_path")]
    pub path: String,

    /// Backend address connections are spliced to, e.g. "127.0.0.1:10001".
    pub backend: String,
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_wildcard() -> String {
    "*".to_string()
}

fn default_root_path() -> String {
    "/".to_string()
}

pub(crate) const DEFAULT_MUX_MAX_CONNECTIONS: usize = 10_000;

impl AgentConfig {
    /// Connection limit for mux listeners, with 0 meaning the default.
    pub fn effective_mux_max_connections(&self) -> usize {
        if self.mux_max_connections == 0 {
            DEFAULT_MUX_MAX_CONNECTIONS
        } else {
            self.mux_max_connections
        }
    }
}
