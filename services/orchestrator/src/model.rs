//! Domain types for game server records and their cluster counterparts.
//!
//! A [`ServerRecord`] is the orchestrator's persisted view of one game
//! server. The cluster's own object is only ever seen as a per-poll
//! [`ClusterServerInfo`] snapshot, projected onto the record through
//! [`GameServerState::user_status`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use gsfleet_id::ServerId;
use gsfleet_reconcile::ConvergenceStatus;
use serde::{Deserialize, Serialize};

// =============================================================================
// User-facing status
// =============================================================================

/// Lifecycle status of a server record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ServerStatus {
    /// Persisted, provisioning not started yet.
    Pending,
    /// Allocation failed for lack of capacity; waiting to retry.
    Requested,
    Creating,
    Starting,
    /// Reachable at the persisted address.
    Ready,
    Shutdown,
    Error,
    /// Stopped by its owner; eligible for cleanup after the grace period.
    Stopped,
    Deleted,
    /// A cluster state with no mapping, passed through unchanged.
    Other(String),
}

impl ServerStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Requested => "requested",
            Self::Creating => "creating",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Shutdown => "shutdown",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
            Self::Other(raw) => raw,
        }
    }

    /// Parse a stored status string. Unknown strings become [`Self::Other`].
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "requested" => Self::Requested,
            "creating" => Self::Creating,
            "starting" => Self::Starting,
            "ready" => Self::Ready,
            "shutdown" => Self::Shutdown,
            "error" => Self::Error,
            "stopped" => Self::Stopped,
            "deleted" => Self::Deleted,
            other => Self::Other(other.to_string()),
        }
    }

    /// Terminal statuses see no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Error | Self::Shutdown | Self::Deleted
        )
    }

    /// The status as announced to the owner.
    ///
    /// Waiting for capacity is part of creating from the owner's point of
    /// view, so `Requested` is announced as `Creating`.
    pub fn notification_phase(&self) -> ServerStatus {
        match self {
            Self::Requested => Self::Creating,
            other => other.clone(),
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ServerStatus> for String {
    fn from(status: ServerStatus) -> Self {
        status.as_str().to_string()
    }
}

impl From<String> for ServerStatus {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

// =============================================================================
// Raw cluster state
// =============================================================================

/// Raw game server state as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum GameServerState {
    PortAllocation,
    Creating,
    Starting,
    Scheduled,
    RequestReady,
    Ready,
    Shutdown,
    Error,
    Unhealthy,
    Reserved,
    Allocated,
    Unknown(String),
}

impl GameServerState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PortAllocation => "PortAllocation",
            Self::Creating => "Creating",
            Self::Starting => "Starting",
            Self::Scheduled => "Scheduled",
            Self::RequestReady => "RequestReady",
            Self::Ready => "Ready",
            Self::Shutdown => "Shutdown",
            Self::Error => "Error",
            Self::Unhealthy => "Unhealthy",
            Self::Reserved => "Reserved",
            Self::Allocated => "Allocated",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PortAllocation" => Self::PortAllocation,
            "Creating" => Self::Creating,
            "Starting" => Self::Starting,
            "Scheduled" => Self::Scheduled,
            "RequestReady" => Self::RequestReady,
            "Ready" => Self::Ready,
            "Shutdown" => Self::Shutdown,
            "Error" => Self::Error,
            "Unhealthy" => Self::Unhealthy,
            "Reserved" => Self::Reserved,
            "Allocated" => Self::Allocated,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Project a raw cluster state onto the user-facing status.
    pub fn user_status(&self) -> ServerStatus {
        match self {
            Self::PortAllocation | Self::Creating => ServerStatus::Creating,
            Self::Starting | Self::Scheduled | Self::RequestReady => ServerStatus::Starting,
            Self::Ready | Self::Allocated | Self::Reserved => ServerStatus::Ready,
            Self::Shutdown => ServerStatus::Shutdown,
            Self::Error | Self::Unhealthy => ServerStatus::Error,
            Self::Unknown(raw) => ServerStatus::Other(raw.clone()),
        }
    }

    /// Whether a readiness loop observing this state should stop.
    pub fn convergence(&self) -> ConvergenceStatus {
        match self {
            Self::Ready | Self::Allocated | Self::Reserved => ConvergenceStatus::Converged,
            Self::Shutdown | Self::Error | Self::Unhealthy => ConvergenceStatus::Diverged,
            Self::Unknown(_) => ConvergenceStatus::Unknown,
            _ => ConvergenceStatus::Converging,
        }
    }
}

impl fmt::Display for GameServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<GameServerState> for String {
    fn from(state: GameServerState) -> Self {
        state.as_str().to_string()
    }
}

impl From<String> for GameServerState {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

// =============================================================================
// Records and requests
// =============================================================================

/// Persisted state of one game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub owner_id: String,
    pub game_type: String,
    pub display_name: String,
    pub status: ServerStatus,
    /// Cluster-assigned UID, set once allocation succeeds.
    pub external_id: Option<String>,
    /// Last raw cluster state observed.
    pub cluster_state: Option<GameServerState>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub error_message: Option<String>,
    pub hourly_cost: i32,
    pub created_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub cleanup_at: Option<DateTime<Utc>>,
    pub last_status_sync: Option<DateTime<Utc>>,
}

impl ServerRecord {
    /// A fresh record in `Pending`.
    pub fn pending(request: &CreateServerRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: ServerId::new(),
            owner_id: request.owner_id.clone(),
            game_type: request.game_type.clone(),
            display_name: request.display_name.clone(),
            status: ServerStatus::Pending,
            external_id: None,
            cluster_state: None,
            address: None,
            port: None,
            error_message: None,
            hourly_cost: request.hourly_cost,
            created_at: now,
            stopped_at: None,
            cleanup_at: None,
            last_status_sync: None,
        }
    }

    /// `address:port` once both are known.
    pub fn connection(&self) -> Option<String> {
        match (&self.address, self.port) {
            (Some(address), Some(port)) => Some(format!("{address}:{port}")),
            _ => None,
        }
    }

    /// Overlay a live cluster snapshot on this record (not persisted).
    pub fn merge_snapshot(&mut self, info: &ClusterServerInfo, synced_at: DateTime<Utc>) {
        self.cluster_state = Some(info.state.clone());
        self.status = info.state.user_status();
        if let (Some(address), Some(port)) = (&info.address, info.port) {
            self.address = Some(address.clone());
            self.port = Some(port);
        }
        self.last_status_sync = Some(synced_at);
    }
}

/// Caller input for creating a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateServerRequest {
    pub owner_id: String,
    pub game_type: String,
    pub display_name: String,
    pub hourly_cost: i32,
    /// Channel to notify instead of the owner directly.
    pub channel_id: Option<String>,
}

impl CreateServerRequest {
    pub fn new(
        owner_id: impl Into<String>,
        game_type: impl Into<String>,
        display_name: impl Into<String>,
        hourly_cost: i32,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            game_type: game_type.into(),
            display_name: display_name.into(),
            hourly_cost,
            channel_id: None,
        }
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }
}

/// A request to reserve one instance from a fleet. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub game_type: String,
    pub display_name: String,
    pub owner_id: String,
    /// Labels applied to the allocated instance.
    pub labels: BTreeMap<String, String>,
}

/// A successful allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub external_id: String,
    /// Cluster object name, which differs from the display name.
    pub name: String,
    pub state: GameServerState,
    pub address: Option<String>,
    pub port: Option<u16>,
}

/// One poll's view of a cluster game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterServerInfo {
    pub external_id: String,
    pub name: String,
    pub state: GameServerState,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A status transition delivered to the owner. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    pub server_id: ServerId,
    pub owner_id: String,
    pub display_name: String,
    pub game_type: String,
    pub previous: Option<ServerStatus>,
    pub status: ServerStatus,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub error_message: Option<String>,
    pub channel_id: Option<String>,
}

impl LifecycleEvent {
    /// An event for `record` moving from `previous` to `status`.
    pub fn transition(
        record: &ServerRecord,
        previous: Option<ServerStatus>,
        status: ServerStatus,
        channel_id: Option<String>,
    ) -> Self {
        Self {
            server_id: record.id,
            owner_id: record.owner_id.clone(),
            display_name: record.display_name.clone(),
            game_type: record.game_type.clone(),
            previous,
            status,
            address: None,
            port: None,
            error_message: None,
            channel_id,
        }
    }

    pub fn with_connection(mut self, address: impl Into<String>, port: u16) -> Self {
        self.address = Some(address.into());
        self.port = Some(port);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}
