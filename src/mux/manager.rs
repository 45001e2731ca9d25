//! Registry of shared mux listeners.
//!
//! # Responsibilities
//! - One `MuxServer` per (listen address, port)
//! - Tag → (server, route) bindings so callers unregister by tag alone
//! - Close a server as soon as its last route is removed
//!
//! # Locking
//! ```text
//! manager lock (tokio Mutex): servers + tags maps, server lifecycle
//!     └─ server lock (std RwLock): that server's RouteTable only
//! ```
//! Always taken in that order. Servers are closed after the manager lock is
//! released, so a slow drain never blocks other registrations.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::mux::error::MuxError;
use crate::mux::route::{MuxKey, Route, RouteKey};
use crate::mux::server::{MuxServer, MuxTimeouts};
use crate::observability::metrics;

const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

#[derive(Debug, Clone)]
struct TagBinding {
    key: MuxKey,
    route: RouteKey,
}

#[derive(Debug, Default)]
struct Registry {
    servers: HashMap<MuxKey, Arc<MuxServer>>,
    tags: HashMap<String, TagBinding>,
}

/// Owns every shared listener of the process.
#[derive(Debug)]
pub struct MuxManager {
    registry: Mutex<Registry>,
    max_connections: usize,
    timeouts: MuxTimeouts,
}

impl MuxManager {
    pub fn new() -> Self {
        Self::with_max_connections(DEFAULT_MAX_CONNECTIONS)
    }

    /// Manager whose listeners each accept at most `max_connections` at once.
    pub fn with_max_connections(max_connections: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            max_connections,
            timeouts: MuxTimeouts::default(),
        }
    }

    /// Use `timeouts` for listeners started from now on.
    pub fn with_timeouts(mut self, timeouts: MuxTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Return the server for `listen_ip:port`, starting it if needed.
    pub async fn ensure_listener(&self, listen_ip: &str, port: u16) -> Result<Arc<MuxServer>, MuxError> {
        let mut registry = self.registry.lock().await;

        let key = MuxKey::new(listen_ip, port);
        if let Some(server) = registry.servers.get(&key) {
            return Ok(Arc::clone(server));
        }

        let server = MuxServer::start(key.clone(), self.max_connections, self.timeouts).await?;
        registry.servers.insert(key, Arc::clone(&server));
        metrics::set_mux_servers(registry.servers.len());

        tracing::info!(
            listen_ip = %listen_ip,
            port,
            local_addr = %server.local_addr(),
            "Mux listener started"
        );
        Ok(server)
    }

    /// Bind `tag` to (host, path) → backend on an existing listener.
    pub async fn register_route(
        &self,
        tag: &str,
        listen_ip: &str,
        port: u16,
        host: &str,
        path: &str,
        backend: &str,
    ) -> Result<(), MuxError> {
        let mut registry = self.registry.lock().await;

        let key = MuxKey::new(listen_ip, port);
        let server = registry
            .servers
            .get(&key)
            .cloned()
            .ok_or_else(|| MuxError::ServerNotFound(key.to_string()))?;

        if registry.tags.contains_key(tag) {
            return Err(MuxError::TagInUse(tag.to_string()));
        }

        let route_key = RouteKey::new(host, path);
        server.insert_route(
            route_key.clone(),
            Route {
                backend: backend.to_string(),
                tag: tag.to_string(),
            },
        )?;

        tracing::info!(
            listen_ip = %listen_ip,
            port,
            host = %route_key.host,
            path = %route_key.path,
            backend = %backend,
            tag = %tag,
            "Mux route registered"
        );
        registry.tags.insert(
            tag.to_string(),
            TagBinding {
                key,
                route: route_key,
            },
        );
        Ok(())
    }

    /// Remove the route bound to `tag`; closes its server if it was the last.
    ///
    /// Unknown tags are ignored.
    pub async fn unregister_route(&self, tag: &str) {
        let retired = {
            let mut registry = self.registry.lock().await;
            let Some(binding) = registry.tags.remove(tag) else {
                return;
            };
            let Some(server) = registry.servers.get(&binding.key).cloned() else {
                return;
            };

            let remaining = server.remove_route(&binding.route);
            tracing::info!(
                listen_ip = %binding.key.listen_ip,
                port = binding.key.port,
                host = %binding.route.host,
                path = %binding.route.path,
                tag = %tag,
                "Mux route unregistered"
            );

            if remaining == 0 {
                registry.servers.remove(&binding.key);
                metrics::set_mux_servers(registry.servers.len());
                Some(server)
            } else {
                None
            }
        };

        if let Some(server) = retired {
            server.close().await;
            tracing::info!(
                listen_ip = %server.key().listen_ip,
                port = server.key().port,
                "Mux listener stopped"
            );
        }
    }

    /// Close a listener that never received a route.
    pub async fn release_if_unused(&self, listen_ip: &str, port: u16) {
        let retired = {
            let mut registry = self.registry.lock().await;
            let key = MuxKey::new(listen_ip, port);
            match registry.servers.get(&key) {
                Some(server) if server.route_count() == 0 => {
                    let server = registry.servers.remove(&key);
                    metrics::set_mux_servers(registry.servers.len());
                    server
                }
                _ => None,
            }
        };
        if let Some(server) = retired {
            server.close().await;
        }
    }

    /// Stop every listener and forget all routes.
    pub async fn close_all(&self) {
        let servers: Vec<Arc<MuxServer>> = {
            let mut registry = self.registry.lock().await;
            registry.tags.clear();
            registry.servers.drain().map(|(_, server)| server).collect()
        };
        metrics::set_mux_servers(0);

        for server in servers {
            server.close().await;
        }
        tracing::info!("All mux listeners stopped");
    }

    pub async fn server(&self, listen_ip: &str, port: u16) -> Option<Arc<MuxServer>> {
        let registry = self.registry.lock().await;
        registry.servers.get(&MuxKey::new(listen_ip, port)).cloned()
    }

    pub async fn server_count(&self) -> usize {
        self.registry.lock().await.servers.len()
    }

    pub async fn contains_tag(&self, tag: &str) -> bool {
        self.registry.lock().await.tags.contains_key(tag)
    }
}

impl Default for MuxManager {
    fn default() -> Self {
        Self::new()
    }
}
