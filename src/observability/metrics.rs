//! Metrics collection and exposition.
//!
//! # Metrics
//! - `nodegate_panel_requests_total` (counter): panel calls by transport, outcome
//! - `nodegate_channel_state` (gauge, per node): 0=unknown, 1=available, 2=unavailable
//! - `nodegate_mux_connections_total` (counter): mux connections by outcome
//! - `nodegate_mux_active_connections` (gauge, per listener): live mux connections
//! - `nodegate_mux_servers` (gauge): shared listeners running
//!
//! Recording is a no-op until `init_metrics` installs the exporter.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::resilience::ChannelState;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_panel_request(transport: &'static str, outcome: &'static str) {
    counter!("nodegate_panel_requests_total", "transport" => transport, "outcome" => outcome)
        .increment(1);
}

pub fn record_channel_state(node: &str, state: ChannelState) {
    gauge!("nodegate_channel_state", "node" => node.to_string()).set(state as u8 as f64);
}

pub fn record_mux_connection(outcome: &'static str) {
    counter!("nodegate_mux_connections_total", "outcome" => outcome).increment(1);
}

pub fn set_mux_active_connections(listener: &str, count: u64) {
    gauge!("nodegate_mux_active_connections", "listener" => listener.to_string()).set(count as f64);
}

pub fn set_mux_servers(count: usize) {
    gauge!("nodegate_mux_servers").set(count as f64);
}
