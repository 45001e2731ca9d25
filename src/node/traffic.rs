//! Per-user accounting shared between the proxy core and the sync task.

use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;

use crate::panel::UserTraffic;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    upload: u64,
    download: u64,
}

/// Concurrent upload/download accumulator keyed by user id.
#[derive(Debug, Default)]
pub struct TrafficCounter {
    users: DashMap<u64, Counters>,
}

impl TrafficCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, uid: u64, upload: u64, download: u64) {
        if upload == 0 && download == 0 {
            return;
        }
        let mut entry = self.users.entry(uid).or_default();
        entry.upload = entry.upload.saturating_add(upload);
        entry.download = entry.download.saturating_add(download);
    }

    /// Take everything accumulated so far, leaving the counter empty.
    pub fn drain(&self) -> Vec<UserTraffic> {
        let uids: Vec<u64> = self.users.iter().map(|entry| *entry.key()).collect();
        let mut drained: Vec<UserTraffic> = uids
            .into_iter()
            .filter_map(|uid| self.users.remove(&uid))
            .map(|(uid, c)| UserTraffic {
                uid,
                upload: c.upload,
                download: c.download,
            })
            .collect();
        drained.sort_by_key(|t| t.uid);
        drained
    }

    /// Put drained values back after a failed report.
    pub fn credit(&self, traffic: &[UserTraffic]) {
        for t in traffic {
            self.record(t.uid, t.upload, t.download);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }
}

/// Online source IPs per user, reported and cleared on each push.
#[derive(Debug, Default)]
pub struct OnlineUsers {
    users: DashMap<u64, BTreeSet<String>>,
}

impl OnlineUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, uid: u64, ip: impl Into<String>) {
        self.users.entry(uid).or_default().insert(ip.into());
    }

    pub fn drain(&self) -> BTreeMap<u64, Vec<String>> {
        let uids: Vec<u64> = self.users.iter().map(|entry| *entry.key()).collect();
        uids.into_iter()
            .filter_map(|uid| self.users.remove(&uid))
            .map(|(uid, ips)| (uid, ips.into_iter().collect()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
