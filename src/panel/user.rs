//! Panel API helpers for users, traffic and online IPs.

use std::collections::{BTreeMap, HashMap};

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::client::{PanelRequest, TransportClient};
use super::error::{PanelError, PanelResult};

pub const USER_PATH: &str = "/api/v1/server/UniProxy/user";
pub const ALIVE_LIST_PATH: &str = "/api/v1/server/UniProxy/alivelist";
pub const PUSH_PATH: &str = "/api/v1/server/UniProxy/push";
pub const ALIVE_PATH: &str = "/api/v1/server/UniProxy/alive";

/// Result of a conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched<T> {
    Updated(T),
    /// Panel answered 304; keep what you have.
    Unchanged,
}

impl<T> Fetched<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Fetched::Unchanged)
    }

    pub fn updated(self) -> Option<T> {
        match self {
            Fetched::Updated(value) => Some(value),
            Fetched::Unchanged => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: u64,
    pub uuid: String,
    #[serde(default)]
    pub speed_limit: u64,
    #[serde(default)]
    pub device_limit: u64,
}

#[derive(Debug, Deserialize)]
struct UserListBody {
    #[serde(default)]
    users: Vec<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct AliveBody {
    #[serde(default)]
    alive: HashMap<u64, u64>,
}

/// Traffic accumulated for one user since the last report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserTraffic {
    pub uid: u64,
    pub upload: u64,
    pub download: u64,
}

/// Panel API bound to one node, with the user list etag cached.
#[derive(Debug)]
pub struct NodeApi {
    client: TransportClient,
    user_etag: ArcSwapOption<String>,
}

impl NodeApi {
    pub fn new(client: TransportClient) -> Self {
        Self {
            client,
            user_etag: ArcSwapOption::empty(),
        }
    }

    pub fn client(&self) -> &TransportClient {
        &self.client
    }

    pub fn user_etag(&self) -> Option<String> {
        self.user_etag.load_full().map(|etag| etag.as_ref().clone())
    }

    /// Fetch the user list, sending the cached etag.
    pub async fn get_user_list(&self) -> PanelResult<Fetched<Vec<UserInfo>>> {
        let mut request = PanelRequest::get(USER_PATH).header("Accept", "application/json");
        if let Some(etag) = self.user_etag.load_full() {
            request = request.header("If-None-Match", etag.as_str());
        }

        let response = self.client.request(request).await?;
        if response.is_not_modified() {
            return Ok(Fetched::Unchanged);
        }
        self.client.check_response(USER_PATH, &response)?;

        let list: UserListBody =
            serde_json::from_slice(&response.body).map_err(|source| PanelError::Decode {
                what: "user list",
                source,
            })?;
        if let Some(etag) = response.header("ETag") {
            self.user_etag.store(Some(Arc::new(etag.to_string())));
        }
        Ok(Fetched::Updated(list.users))
    }

    /// Online device count per user. Any failure yields an empty map.
    pub async fn get_user_alive(&self) -> HashMap<u64, u64> {
        let request = PanelRequest::get(ALIVE_LIST_PATH).header("Accept", "application/json");
        let response = match self.client.request(request).await {
            Ok(response) if response.status < 400 => response,
            Ok(response) => {
                tracing::debug!(status = response.status, "Alive list request rejected");
                return HashMap::new();
            }
            Err(e) => {
                tracing::debug!(error = %e, "Alive list request failed");
                return HashMap::new();
            }
        };
        serde_json::from_slice::<AliveBody>(&response.body)
            .map(|body| body.alive)
            .unwrap_or_default()
    }

    /// Report per-user upload/download as `{uid: [up, down]}`.
    pub async fn report_user_traffic(&self, traffic: &[UserTraffic]) -> PanelResult<()> {
        let data: BTreeMap<u64, [u64; 2]> = traffic
            .iter()
            .map(|t| (t.uid, [t.upload, t.download]))
            .collect();
        let body = serde_json::to_vec(&data).map_err(PanelError::Encode)?;
        let request = PanelRequest::post(PUSH_PATH, body)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");

        let response = self.client.request(request).await?;
        self.client.check_response(PUSH_PATH, &response)
    }

    /// Report online IPs per user. Failures are logged only.
    pub async fn report_online_users(&self, online: &BTreeMap<u64, Vec<String>>) {
        let body = match serde_json::to_vec(online) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode online users");
                return;
            }
        };
        let request = PanelRequest::post(ALIVE_PATH, body)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");

        let result = match self.client.request(request).await {
            Ok(response) => self.client.check_response(ALIVE_PATH, &response),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to report online users");
        }
    }
}
