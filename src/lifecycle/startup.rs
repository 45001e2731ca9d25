//! Startup orchestration.
//!
//! # Order
//! 1. Load and validate configuration (fatal on error)
//! 2. Logging, then metrics
//! 3. Shared mux manager, then node controllers
//! 4. Optional config watcher
//! 5. Wait for SIGINT/SIGTERM; restart nodes on each valid reload
//! 6. Close nodes, then every mux listener

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::watcher::ConfigWatcher;
use crate::config::{load_config, AgentConfig, ConfigError};
use crate::lifecycle::signals::wait_for_shutdown_signal;
use crate::mux::MuxManager;
use crate::node::Node;
use crate::observability::{logging, metrics};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),
}

/// Run the agent until a shutdown signal arrives.
pub async fn run(config_path: &Path, watch: bool) -> Result<(), StartupError> {
    let config = load_config(config_path)?;
    logging::init_logging(&config.log)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        nodes = config.nodes.len(),
        "nodegate starting"
    );

    start_metrics(&config);

    let mux = Arc::new(MuxManager::with_max_connections(
        config.effective_mux_max_connections(),
    ));
    let mut node = Node::new();
    node.start(&config.nodes, &mux).await;

    let (_watcher, mut reloads) = if watch {
        let (watcher, rx) = ConfigWatcher::new(config_path);
        (Some(watcher.run()?), Some(rx))
    } else {
        (None, None)
    };

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
            Some(new_config) = next_reload(&mut reloads) => {
                tracing::info!(nodes = new_config.nodes.len(), "Applying reloaded configuration");
                node.start(&new_config.nodes, &mux).await;
            }
        }
    }

    node.close().await;
    mux.close_all().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn next_reload(
    reloads: &mut Option<tokio::sync::mpsc::UnboundedReceiver<AgentConfig>>,
) -> Option<AgentConfig> {
    match reloads {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn start_metrics(config: &AgentConfig) {
    if !config.metrics.enabled {
        return;
    }
    match config.metrics.address.parse::<SocketAddr>() {
        Ok(addr) => metrics::init_metrics(addr),
        Err(e) => tracing::error!(
            metrics_address = %config.metrics.address,
            error = %e,
            "Failed to parse metrics address"
        ),
    }
}
