//! Agones fleet client over the Kubernetes REST API.
//!
//! Allocation creates a `GameServerAllocation` selecting the fleet by its
//! `agones.dev/fleet` label and patching owner labels onto the allocated
//! GameServer. Status lookups match the GameServer's `metadata.uid`, which
//! is the external id stored on the record.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use super::{FleetClient, FleetError, FleetResult};
use crate::model::{Allocation, AllocationRequest, ClusterServerInfo, GameServerState};

const FLEET_LABEL: &str = "agones.dev/fleet";
const ALLOCATED_STATE: &str = "Allocated";

/// Connection settings for the cluster API.
#[derive(Debug, Clone)]
pub struct FleetApiConfig {
    /// Kubernetes API server base URL.
    pub base_url: String,

    /// Namespace holding the fleets.
    pub namespace: String,

    /// Bearer token for the API server.
    pub bearer_token: Option<String>,

    /// PEM-encoded CA certificate for the API server.
    pub ca_cert_pem: Option<Vec<u8>>,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// Prefix for labels and annotations written on allocation.
    pub label_prefix: String,

    /// Value recorded in the allocated-by annotation.
    pub allocated_by: String,
}

impl Default for FleetApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://kubernetes.default.svc".to_string(),
            namespace: "agones-dev".to_string(),
            bearer_token: None,
            ca_cert_pem: None,
            request_timeout: Duration::from_secs(30),
            label_prefix: "gsfleet.io".to_string(),
            allocated_by: "fleetd".to_string(),
        }
    }
}

impl FleetApiConfig {
    /// Load the bearer token and CA certificate from files, as mounted for
    /// an in-cluster service account. Missing files are skipped.
    pub fn with_credentials_from(mut self, token_file: &Path, ca_file: &Path) -> Self {
        if let Ok(token) = std::fs::read_to_string(token_file) {
            self.bearer_token = Some(token.trim().to_string());
        }
        if let Ok(pem) = std::fs::read(ca_file) {
            self.ca_cert_pem = Some(pem);
        }
        self
    }
}

/// Fleet client for an Agones installation.
pub struct AgonesFleetClient {
    client: reqwest::Client,
    config: FleetApiConfig,
}

impl AgonesFleetClient {
    /// Create a new client.
    pub fn new(config: FleetApiConfig) -> FleetResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);

        if let Some(pem) = &config.ca_cert_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    fn game_servers_url(&self) -> String {
        format!(
            "{}/apis/agones.dev/v1/namespaces/{}/gameservers",
            self.config.base_url.trim_end_matches('/'),
            self.config.namespace
        )
    }

    fn allocations_url(&self) -> String {
        format!(
            "{}/apis/allocation.agones.dev/v1/namespaces/{}/gameserverallocations",
            self.config.base_url.trim_end_matches('/'),
            self.config.namespace
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn label(&self, name: &str) -> String {
        format!("{}/{}", self.config.label_prefix, name)
    }

    async fn get_game_server(&self, name: &str) -> FleetResult<GameServerObject> {
        let url = format!("{}/{}", self.game_servers_url(), name);
        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = check(response, name).await?;
        Ok(response.json().await?)
    }

    async fn list_game_servers(&self, limit: Option<u32>) -> FleetResult<GameServerList> {
        let mut request = self.client.get(self.game_servers_url());
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let response = self.authorize(request).send().await?;
        let response = check(response, "gameservers").await?;
        Ok(response.json().await?)
    }

    fn allocation_body(&self, fleet: &str, request: &AllocationRequest) -> serde_json::Value {
        let mut labels = request.labels.clone();
        labels.insert(self.label("owner-id"), request.owner_id.clone());
        labels.insert(self.label("server-name"), request.display_name.clone());
        labels.insert(self.label("game-type"), request.game_type.clone());
        labels.insert(self.label("allocated"), "true".to_string());

        let annotations = BTreeMap::from([
            (self.label("allocated-at"), Utc::now().to_rfc3339()),
            (self.label("allocated-by"), self.config.allocated_by.clone()),
        ]);

        json!({
            "apiVersion": "allocation.agones.dev/v1",
            "kind": "GameServerAllocation",
            "metadata": {
                "generateName": format!("{}-", request.display_name),
                "namespace": self.config.namespace,
            },
            "spec": {
                "selectors": [{ "matchLabels": { FLEET_LABEL: fleet } }],
                "metadata": {
                    "labels": labels,
                    "annotations": annotations,
                },
            },
        })
    }
}

#[async_trait]
impl FleetClient for AgonesFleetClient {
    #[instrument(skip(self, request), fields(display_name = %request.display_name))]
    async fn allocate(&self, fleet: &str, request: &AllocationRequest) -> FleetResult<Allocation> {
        let body = self.allocation_body(fleet, request);
        debug!(fleet, "Requesting game server allocation");

        let response = self
            .authorize(self.client.post(self.allocations_url()))
            .json(&body)
            .send()
            .await?;
        let response = check(response, fleet).await?;
        let allocation: AllocationObject = response.json().await?;
        let status = allocation.status;

        if status.state != ALLOCATED_STATE {
            return Err(FleetError::NoCapacity {
                fleet: fleet.to_string(),
                state: status.state,
            });
        }

        if status.game_server_name.is_empty() {
            return Err(FleetError::Decode(
                "allocation result has no game server name".to_string(),
            ));
        }

        let game_server = self.get_game_server(&status.game_server_name).await?;
        info!(
            fleet,
            game_server = %status.game_server_name,
            uid = %game_server.metadata.uid,
            "Game server allocated"
        );

        Ok(Allocation {
            external_id: game_server.metadata.uid,
            name: status.game_server_name,
            state: GameServerState::parse(&game_server.status.state),
            address: non_empty(status.address),
            port: first_port(&status.ports),
        })
    }

    async fn get_status(&self, external_id: &str) -> FleetResult<ClusterServerInfo> {
        let list = self.list_game_servers(None).await?;
        list.items
            .into_iter()
            .find(|gs| gs.metadata.uid == external_id)
            .map(GameServerObject::into_info)
            .ok_or_else(|| FleetError::NotFound(external_id.to_string()))
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> FleetResult<()> {
        let url = format!("{}/{}", self.game_servers_url(), name);
        let response = self.authorize(self.client.delete(&url)).send().await?;
        check(response, name).await?;
        info!(game_server = name, "Game server deleted");
        Ok(())
    }

    async fn health_check(&self) -> FleetResult<()> {
        self.list_game_servers(Some(1)).await?;
        debug!(namespace = %self.config.namespace, "Cluster API health check passed");
        Ok(())
    }
}

/// Map non-success responses onto [`FleetError`].
async fn check(response: Response, subject: &str) -> FleetResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(FleetError::NotFound(subject.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %body, subject, "Cluster API request failed");
    Err(FleetError::Api { status, body })
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn first_port(ports: &[PortStatus]) -> Option<u16> {
    ports.first().and_then(|p| u16::try_from(p.port).ok())
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct AllocationObject {
    #[serde(default)]
    status: AllocationStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllocationStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    game_server_name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    ports: Vec<PortStatus>,
}

#[derive(Debug, Deserialize)]
struct PortStatus {
    port: i32,
}

#[derive(Debug, Deserialize)]
struct GameServerList {
    #[serde(default)]
    items: Vec<GameServerObject>,
}

#[derive(Debug, Deserialize)]
struct GameServerObject {
    metadata: ObjectMeta,
    #[serde(default)]
    status: GameServerStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    uid: String,
    #[serde(default)]
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct GameServerStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    ports: Vec<PortStatus>,
}

impl GameServerObject {
    fn into_info(self) -> ClusterServerInfo {
        let port = first_port(&self.status.ports);
        ClusterServerInfo {
            external_id: self.metadata.uid,
            name: self.metadata.name,
            state: GameServerState::parse(&self.status.state),
            address: non_empty(self.status.address),
            port,
            created_at: self.metadata.creation_timestamp,
        }
    }
}
