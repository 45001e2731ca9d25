//! One shared listener and its connection handlers.
//!
//! # Responsibilities
//! - Accept connections on the shared port until closed
//! - Sniff the first request head, pick a route, dial the backend
//! - Replay the consumed bytes, then splice until either side stops
//! - Drain every handler before `close` returns
//!
//! # Design Decisions
//! - The route lock is held only for the lookup, never across I/O
//! - Handlers live in a `JoinSet` owned by the accept loop
//! - Failures only ever drop the affected connection

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};
use crate::mux::error::MuxError;
use crate::mux::route::{normalize_host, normalize_path, MuxKey, Route, RouteKey, RouteTable};
use crate::mux::sniff::read_request_head;
use crate::net::connection::{ConnectionGuard, ConnectionState, ConnectionTracker};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::metrics;
use crate::resilience::timeouts::{BACKEND_DIAL_TIMEOUT, HEADER_READ_TIMEOUT};

/// Per-connection deadlines of a listener.
#[derive(Debug, Clone, Copy)]
pub struct MuxTimeouts {
    /// Time allowed for the client to send a complete request head.
    pub header_read: Duration,
    /// Time allowed to connect to the routed backend.
    pub backend_dial: Duration,
}

impl Default for MuxTimeouts {
    fn default() -> Self {
        Self {
            header_read: HEADER_READ_TIMEOUT,
            backend_dial: BACKEND_DIAL_TIMEOUT,
        }
    }
}

/// A running shared listener.
pub struct MuxServer {
    key: MuxKey,
    local_addr: SocketAddr,
    routes: Arc<RwLock<RouteTable>>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl MuxServer {
    /// Bind the listener and start accepting.
    pub async fn start(
        key: MuxKey,
        max_connections: usize,
        timeouts: MuxTimeouts,
    ) -> Result<Arc<Self>, MuxError> {
        let listener = Listener::bind(&key.listen_ip, key.port, max_connections)
            .await
            .map_err(|source| MuxError::Bind {
                key: key.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|e| MuxError::Bind {
            key: key.to_string(),
            source: ListenerError::Accept(e),
        })?;

        let routes = Arc::new(RwLock::new(RouteTable::new()));
        let tracker = ConnectionTracker::new();
        let shutdown = Shutdown::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::from(key.to_string()),
            Arc::clone(&routes),
            tracker.clone(),
            timeouts,
            shutdown.subscribe(),
        ));

        Ok(Arc::new(Self {
            key,
            local_addr,
            routes,
            tracker,
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
        }))
    }

    pub fn key(&self) -> &MuxKey {
        &self.key
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn route_count(&self) -> usize {
        self.read_routes().len()
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Route a normalized-on-the-fly host/path would take.
    pub fn lookup(&self, host: &str, path: &str) -> Option<Route> {
        self.read_routes()
            .lookup(&normalize_host(host), &normalize_path(path))
            .cloned()
    }

    pub(crate) fn insert_route(&self, key: RouteKey, route: Route) -> Result<(), MuxError> {
        self.write_routes().insert(key, route)
    }

    /// Remove a route, returning how many remain.
    pub(crate) fn remove_route(&self, key: &RouteKey) -> usize {
        let mut routes = self.write_routes();
        routes.remove(key);
        routes.len()
    }

    /// Stop accepting, terminate every connection and wait for all handlers.
    pub async fn close(&self) {
        self.shutdown.trigger();
        let task = self.accept_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(listen = %self.key, error = %e, "Mux accept loop panicked");
            }
        }
    }

    fn read_routes(&self) -> std::sync::RwLockReadGuard<'_, RouteTable> {
        self.routes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_routes(&self) -> std::sync::RwLockWriteGuard<'_, RouteTable> {
        self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for MuxServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxServer")
            .field("key", &self.key)
            .field("local_addr", &self.local_addr)
            .field("routes", &self.route_count())
            .finish()
    }
}

async fn accept_loop(
    listener: Listener,
    label: Arc<str>,
    routes: Arc<RwLock<RouteTable>>,
    tracker: ConnectionTracker,
    timeouts: MuxTimeouts,
    mut shutdown: ShutdownSignal,
) {
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    let guard = tracker.track();
                    metrics::set_mux_active_connections(&label, tracker.active_count());
                    handlers.spawn(run_connection(
                        stream,
                        peer,
                        permit,
                        guard,
                        Arc::clone(&label),
                        Arc::clone(&routes),
                        tracker.clone(),
                        timeouts,
                        shutdown.clone(),
                    ));
                }
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "Mux accept failed");
                }
            },
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Mux connection handler panicked");
                }
            }
        }
    }

    drop(listener);
    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Mux connection handler panicked");
        }
    }
}

async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    mut guard: ConnectionGuard,
    label: Arc<str>,
    routes: Arc<RwLock<RouteTable>>,
    tracker: ConnectionTracker,
    timeouts: MuxTimeouts,
    mut shutdown: ShutdownSignal,
) {
    tokio::select! {
        _ = handle_connection(stream, peer, &mut guard, &routes, timeouts) => {}
        _ = shutdown.recv() => {
            tracing::debug!(connection_id = %guard.id(), "Connection terminated by shutdown");
        }
    }
    guard.transition(ConnectionState::Closed);
    drop(guard);
    metrics::set_mux_active_connections(&label, tracker.active_count());
}

async fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    guard: &mut ConnectionGuard,
    routes: &RwLock<RouteTable>,
    timeouts: MuxTimeouts,
) {
    let head = match timeout(timeouts.header_read, read_request_head(&mut client)).await {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            tracing::debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Dropping connection");
            metrics::record_mux_connection("bad_header");
            return;
        }
        Err(_) => {
            tracing::debug!(connection_id = %guard.id(), peer = %peer, "Request head timed out");
            metrics::record_mux_connection("header_timeout");
            return;
        }
    };

    let host = normalize_host(&head.host);
    let path = normalize_path(&head.path);

    let route = {
        let table = routes.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        table.lookup(&host, &path).cloned()
    };
    let Some(route) = route else {
        guard.transition(ConnectionState::Unroutable);
        tracing::debug!(connection_id = %guard.id(), peer = %peer, host = %host, path = %path, "No mux route matched");
        metrics::record_mux_connection("unroutable");
        return;
    };
    guard.transition(ConnectionState::Routed);

    let mut backend = match timeout(timeouts.backend_dial, TcpStream::connect(route.backend.as_str())).await {
        Ok(Ok(backend)) => backend,
        Ok(Err(e)) => {
            tracing::debug!(connection_id = %guard.id(), backend = %route.backend, error = %e, "Backend dial failed");
            metrics::record_mux_connection("dial_failed");
            return;
        }
        Err(_) => {
            tracing::debug!(connection_id = %guard.id(), backend = %route.backend, "Backend dial timed out");
            metrics::record_mux_connection("dial_failed");
            return;
        }
    };

    if let Err(e) = backend.write_all(&head.raw).await {
        tracing::debug!(connection_id = %guard.id(), backend = %route.backend, error = %e, "Replaying request head failed");
        metrics::record_mux_connection("dial_failed");
        return;
    }

    guard.transition(ConnectionState::Proxying);
    metrics::record_mux_connection("proxied");
    tracing::debug!(
        connection_id = %guard.id(),
        peer = %peer,
        host = %host,
        path = %path,
        backend = %route.backend,
        tag = %route.tag,
        "Splicing connection"
    );

    splice(&mut client, &mut backend).await;
}

/// Relay both directions until the first one finishes or fails.
async fn splice(client: &mut TcpStream, backend: &mut TcpStream) {
    let (mut client_read, mut client_write) = client.split();
    let (mut backend_read, mut backend_write) = backend.split();

    tokio::select! {
        res = tokio::io::copy(&mut client_read, &mut backend_write) => {
            tracing::trace!(result = ?res, "Client side finished");
        }
        res = tokio::io::copy(&mut backend_read, &mut client_write) => {
            tracing::trace!(result = ?res, "Backend side finished");
        }
    }
}
