//! Per-node controller.
//!
//! # Responsibilities
//! - Pull the user list (conditional on etag) and alive counts from the panel
//! - Register the node's route on a shared mux listener
//! - Periodically push accumulated traffic and online IPs
//!
//! # Lifecycle
//! ```text
//! start(): pull users → register mux route → spawn sync task
//! close(): stop sync task → flush traffic → unregister mux route
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::traffic::{OnlineUsers, TrafficCounter};
use crate::config::{MuxRouteConfig, NodeOptions};
use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};
use crate::mux::{MuxError, MuxManager};
use crate::panel::{Fetched, NodeApi, PanelError, PanelResult, UserInfo};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("panel: {0}")]
    Panel(#[from] PanelError),

    #[error("mux: {0}")]
    Mux(#[from] MuxError),
}

struct SyncTask {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

/// State shared with the periodic sync task.
struct Shared {
    tag: String,
    api: NodeApi,
    users: ArcSwap<Vec<UserInfo>>,
    alive: ArcSwap<HashMap<u64, u64>>,
    traffic: TrafficCounter,
    online: OnlineUsers,
}

impl Shared {
    async fn sync_users(&self) -> PanelResult<bool> {
        let updated = match self.api.get_user_list().await? {
            Fetched::Updated(users) => {
                tracing::debug!(node = %self.tag, users = users.len(), "User list updated");
                self.users.store(Arc::new(users));
                true
            }
            Fetched::Unchanged => false,
        };
        self.alive.store(Arc::new(self.api.get_user_alive().await));
        Ok(updated)
    }

    async fn push_traffic(&self) -> PanelResult<usize> {
        let online = self.online.drain();
        if !online.is_empty() {
            self.api.report_online_users(&online).await;
        }

        let traffic = self.traffic.drain();
        if traffic.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.api.report_user_traffic(&traffic).await {
            self.traffic.credit(&traffic);
            return Err(e);
        }
        Ok(traffic.len())
    }
}

/// Drives one panel node.
pub struct Controller {
    shared: Arc<Shared>,
    options: NodeOptions,
    mux: Arc<MuxManager>,
    mux_route: Option<MuxRouteConfig>,
    mux_registered: AtomicBool,
    sync: Mutex<Option<SyncTask>>,
}

impl Controller {
    pub fn new(
        tag: impl Into<String>,
        api: NodeApi,
        options: NodeOptions,
        mux_route: Option<MuxRouteConfig>,
        mux: Arc<MuxManager>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                tag: tag.into(),
                api,
                users: ArcSwap::from_pointee(Vec::new()),
                alive: ArcSwap::from_pointee(HashMap::new()),
                traffic: TrafficCounter::new(),
                online: OnlineUsers::new(),
            }),
            options,
            mux,
            mux_route,
            mux_registered: AtomicBool::new(false),
            sync: Mutex::new(None),
        }
    }

    pub fn tag(&self) -> &str {
        &self.shared.tag
    }

    pub fn api(&self) -> &NodeApi {
        &self.shared.api
    }

    /// Current user snapshot.
    pub fn users(&self) -> Arc<Vec<UserInfo>> {
        self.shared.users.load_full()
    }

    pub fn alive(&self) -> Arc<HashMap<u64, u64>> {
        self.shared.alive.load_full()
    }

    pub fn traffic(&self) -> &TrafficCounter {
        &self.shared.traffic
    }

    pub fn online(&self) -> &OnlineUsers {
        &self.shared.online
    }

    pub async fn is_running(&self) -> bool {
        self.sync.lock().await.is_some()
    }

    /// Pull users and alive counts now. Returns whether the list changed.
    pub async fn sync_users(&self) -> PanelResult<bool> {
        self.shared.sync_users().await
    }

    /// Report pending traffic now. Returns the number of users reported.
    pub async fn push_traffic(&self) -> PanelResult<usize> {
        self.shared.push_traffic().await
    }

    pub async fn start(&self) -> Result<(), ControllerError> {
        self.shared.sync_users().await?;
        self.register_mux_route().await?;

        let mut sync = self.sync.lock().await;
        if sync.is_none() {
            let shutdown = Shutdown::new();
            let handle = tokio::spawn(run_sync(
                Arc::clone(&self.shared),
                self.options.clone(),
                shutdown.subscribe(),
            ));
            *sync = Some(SyncTask { shutdown, handle });
        }

        tracing::info!(
            node = %self.shared.tag,
            users = self.shared.users.load().len(),
            "Node controller started"
        );
        Ok(())
    }

    async fn register_mux_route(&self) -> Result<(), MuxError> {
        let Some(route) = &self.mux_route else {
            return Ok(());
        };
        if self.mux_registered.load(Ordering::Acquire) {
            return Ok(());
        }

        self.mux.ensure_listener(&route.listen_ip, route.port).await?;
        let registered = self
            .mux
            .register_route(
                &self.shared.tag,
                &route.listen_ip,
                route.port,
                &route.host,
                &route.path,
                &route.backend,
            )
            .await;
        if let Err(e) = registered {
            self.mux.release_if_unused(&route.listen_ip, route.port).await;
            return Err(e);
        }
        self.mux_registered.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop syncing, flush pending traffic and drop the mux route.
    pub async fn close(&self) -> Result<(), ControllerError> {
        let task = self.sync.lock().await.take();
        if let Some(task) = task {
            task.shutdown.trigger();
            if let Err(e) = task.handle.await {
                tracing::warn!(node = %self.shared.tag, error = %e, "Sync task ended abnormally");
            }
        }

        let flushed = if self.shared.traffic.is_empty() {
            Ok(0)
        } else {
            self.shared.push_traffic().await
        };

        if let Some(route) = &self.mux_route {
            self.mux.unregister_route(&self.shared.tag).await;
            self.mux.release_if_unused(&route.listen_ip, route.port).await;
            self.mux_registered.store(false, Ordering::Release);
        }
        self.shared.api.client().close_channel().await;

        tracing::info!(node = %self.shared.tag, "Node controller closed");
        flushed.map(|_| ()).map_err(ControllerError::from)
    }
}

fn period(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

async fn run_sync(shared: Arc<Shared>, options: NodeOptions, mut shutdown: ShutdownSignal) {
    let pull_every = period(options.pull_interval_secs);
    let push_every = period(options.push_interval_secs);
    let mut pull = time::interval_at(Instant::now() + pull_every, pull_every);
    let mut push = time::interval_at(Instant::now() + push_every, push_every);
    pull.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    push.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = pull.tick() => {
                if let Err(e) = shared.sync_users().await {
                    tracing::warn!(node = %shared.tag, error = %e, "Failed to pull users");
                }
            }
            _ = push.tick() => {
                match shared.push_traffic().await {
                    Ok(0) => {}
                    Ok(users) => tracing::debug!(node = %shared.tag, users, "Traffic reported"),
                    Err(e) => tracing::warn!(node = %shared.tag, error = %e, "Failed to report traffic"),
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!(node = %shared.tag, "Sync task received shutdown signal");
                break;
            }
        }
    }
}
