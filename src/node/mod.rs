//! Node orchestration.
//!
//! # Data Flow
//! ```text
//! [[nodes]] config
//!     → TransportClient::new (bad node ⇒ logged, skipped)
//!     → Controller per node
//!     → supervisor task: Controller::start until it succeeds
//!         (10s, doubling, capped at 60s; stops on shutdown)
//! ```
//!
//! A failing node never takes the process down.

pub mod controller;
pub mod traffic;

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::config::NodeConfig;
use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};
use crate::mux::MuxManager;
use crate::panel::{NodeApi, TransportClient};
use crate::resilience::backoff::RestartBackoff;

pub use controller::{Controller, ControllerError};
pub use traffic::{OnlineUsers, TrafficCounter};

/// Identifier of a node in logs and in the mux registry.
pub fn node_tag(config: &NodeConfig) -> String {
    format!(
        "{}-{}-{}",
        config.api.api_host, config.api.node_type, config.api.node_id
    )
}

/// All controllers of one configuration generation.
pub struct Node {
    controllers: Vec<Arc<Controller>>,
    shutdown: Option<Shutdown>,
    supervisors: JoinSet<()>,
    restart: RestartBackoff,
}

impl Node {
    pub fn new() -> Self {
        Self::with_restart_backoff(RestartBackoff::default())
    }

    pub fn with_restart_backoff(restart: RestartBackoff) -> Self {
        Self {
            controllers: Vec::new(),
            shutdown: None,
            supervisors: JoinSet::new(),
            restart,
        }
    }

    pub fn controllers(&self) -> &[Arc<Controller>] {
        &self.controllers
    }

    /// Replace any running generation with controllers for `configs`.
    pub async fn start(&mut self, configs: &[NodeConfig], mux: &Arc<MuxManager>) {
        self.close().await;

        let shutdown = Shutdown::new();
        for config in configs {
            let api = &config.api;
            let client = match TransportClient::new(api) {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(
                        api_host = %api.api_host,
                        node_type = %api.node_type,
                        node_id = api.node_id,
                        error = %e,
                        "Panel client init failed, skipping node"
                    );
                    continue;
                }
            };

            let (mode, endpoint) = client.endpoint();
            tracing::info!(
                api_host = %api.api_host,
                ws_mode = %mode,
                ws = %endpoint,
                node_type = %api.node_type,
                node_id = api.node_id,
                "Panel endpoint"
            );

            let controller = Arc::new(Controller::new(
                node_tag(config),
                NodeApi::new(client),
                config.options.clone(),
                config.mux.clone(),
                Arc::clone(mux),
            ));
            self.controllers.push(Arc::clone(&controller));
            self.supervisors.spawn(supervise(
                controller,
                self.restart.clone(),
                shutdown.subscribe(),
            ));
        }
        self.shutdown = Some(shutdown);

        tracing::info!(nodes = self.controllers.len(), "Nodes started");
    }

    /// Stop supervisors and close every controller.
    pub async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.trigger();
            while let Some(joined) = self.supervisors.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "Node supervisor ended abnormally");
                }
            }
        }

        for controller in self.controllers.drain(..) {
            if let Err(e) = controller.close().await {
                tracing::error!(tag = %controller.tag(), error = %e, "Failed to close node controller");
            }
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

async fn supervise(controller: Arc<Controller>, mut backoff: RestartBackoff, mut shutdown: ShutdownSignal) {
    loop {
        let started = tokio::select! {
            result = controller.start() => result,
            _ = shutdown.recv() => return,
        };
        match started {
            Ok(()) => return,
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::error!(
                    node = %controller.tag(),
                    error = %e,
                    retry_in_secs = delay.as_secs(),
                    "Node controller failed to start, will retry"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => return,
                }
            }
        }
    }
}
