//! Cluster fleet access.
//!
//! [`FleetClient`] is the seam between the orchestrator and the cluster's
//! game server API: allocate an instance from a fleet, read its status,
//! delete it. [`AgonesFleetClient`] talks to an Agones installation over
//! the Kubernetes REST API; tests substitute scripted implementations.

mod agones;
mod catalog;

pub use agones::{AgonesFleetClient, FleetApiConfig};
pub use catalog::{FleetCatalog, DEFAULT_FLEET};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::model::{Allocation, AllocationRequest, ClusterServerInfo};

/// Result type for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors returned by a [`FleetClient`].
#[derive(Debug, Error)]
pub enum FleetError {
    /// The allocation came back in a state other than allocated.
    #[error("no capacity in fleet {fleet} (allocation state: {state})")]
    NoCapacity { fleet: String, state: String },

    #[error("game server not found: {0}")]
    NotFound(String),

    /// The cluster API answered with a non-success status.
    #[error("cluster API returned {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("cluster request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected cluster response: {0}")]
    Decode(String),
}

impl FleetError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_no_capacity(&self) -> bool {
        matches!(self, Self::NoCapacity { .. })
    }

    /// Errors from `allocate` that retrying will not fix, such as a
    /// rejected request, missing permissions or a missing resource.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api { status, .. } => matches!(
                *status,
                StatusCode::BAD_REQUEST
                    | StatusCode::UNAUTHORIZED
                    | StatusCode::FORBIDDEN
                    | StatusCode::NOT_FOUND
                    | StatusCode::UNPROCESSABLE_ENTITY
            ),
            _ => false,
        }
    }
}

/// Cluster game server operations.
#[async_trait]
pub trait FleetClient: Send + Sync {
    /// Reserve one instance from `fleet` for the request's owner.
    ///
    /// An allocation the cluster does not report as allocated is
    /// [`FleetError::NoCapacity`].
    async fn allocate(&self, fleet: &str, request: &AllocationRequest) -> FleetResult<Allocation>;

    /// Current state of the game server with the given external id.
    async fn get_status(&self, external_id: &str) -> FleetResult<ClusterServerInfo>;

    /// Delete a game server by cluster name.
    async fn delete(&self, name: &str) -> FleetResult<()>;

    /// Verify the cluster API is reachable.
    async fn health_check(&self) -> FleetResult<()>;
}
