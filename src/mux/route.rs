//! Route keys, normalization and the per-listener route table.
//!
//! # Lookup Order
//! ```text
//! (host, path) → (*, path) → (host, *) → (*, *)
//! ```
//! First match wins. Keys are normalized on insert and on lookup.

use std::collections::HashMap;
use std::fmt;

use crate::mux::error::MuxError;

/// Matches any value in its slot.
pub const WILDCARD: &str = "*";

/// Identity of one shared listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MuxKey {
    pub listen_ip: String,
    pub port: u16,
}

impl MuxKey {
    pub fn new(listen_ip: impl Into<String>, port: u16) -> Self {
        Self {
            listen_ip: listen_ip.into(),
            port,
        }
    }
}

impl fmt::Display for MuxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::net::listener::join_host_port(&self.listen_ip, self.port))
    }
}

/// Normalized (host, path) matching key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub host: String,
    pub path: String,
}

impl RouteKey {
    /// Build a key, normalizing both slots.
    pub fn new(host: &str, path: &str) -> Self {
        Self {
            host: normalize_host(host),
            path: normalize_path(path),
        }
    }

    fn raw(host: &str, path: &str) -> Self {
        Self {
            host: host.to_string(),
            path: path.to_string(),
        }
    }
}

/// Backend selected by a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub backend: String,
    pub tag: String,
}

/// Strip any port and lowercase.
pub fn normalize_host(host: &str) -> String {
    if host.is_empty() {
        return String::new();
    }
    if host.contains(':') {
        if let Some(name) = split_host(host) {
            return name.to_ascii_lowercase();
        }
    }
    host.to_ascii_lowercase()
}

/// Guarantee a leading `/`; empty becomes `/`, the wildcard is kept.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    if path != WILDCARD && !path.starts_with('/') {
        return format!("/{path}");
    }
    path.to_string()
}

/// Host part of `host:port` / `[v6]:port`, or None when it is not one.
fn split_host(hostport: &str) -> Option<&str> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let end = rest.find(']')?;
        let after = &rest[end + 1..];
        let port = after.strip_prefix(':')?;
        if port.contains(':') {
            return None;
        }
        return Some(&rest[..end]);
    }

    let colon = hostport.rfind(':')?;
    let host = &hostport[..colon];
    if host.contains(':') || host.contains('[') || host.contains(']') {
        return None;
    }
    Some(host)
}

/// Routes of one mux server.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<RouteKey, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route; an existing exact key is left untouched.
    pub fn insert(&mut self, key: RouteKey, route: Route) -> Result<(), MuxError> {
        if let Some(existing) = self.routes.get(&key) {
            return Err(MuxError::RouteConflict {
                host: key.host,
                path: key.path,
                existing_tag: existing.tag.clone(),
            });
        }
        self.routes.insert(key, route);
        Ok(())
    }

    pub fn remove(&mut self, key: &RouteKey) -> Option<Route> {
        self.routes.remove(key)
    }

    /// Most specific route for an already-normalized host and path.
    pub fn lookup(&self, host: &str, path: &str) -> Option<&Route> {
        [
            RouteKey::raw(host, path),
            RouteKey::raw(WILDCARD, path),
            RouteKey::raw(host, WILDCARD),
            RouteKey::raw(WILDCARD, WILDCARD),
        ]
        .iter()
        .find_map(|key| self.routes.get(key))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
