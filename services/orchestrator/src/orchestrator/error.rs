use gsfleet_id::ServerId;
use thiserror::Error;

use crate::store::StoreError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors returned to callers of the orchestrator.
///
/// Provisioning failures never appear here: they happen after
/// `create_server` has returned and are recorded on the server record.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no server named {display_name:?} for owner {owner_id}")]
    NotFound {
        owner_id: String,
        display_name: String,
    },

    #[error("no server with id {0}")]
    UnknownId(ServerId),

    #[error("owner {owner_id} already has a server named {display_name:?}")]
    AlreadyExists {
        owner_id: String,
        display_name: String,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateName {
                owner_id,
                display_name,
            } => Self::AlreadyExists {
                owner_id,
                display_name,
            },
            other => Self::Store(other),
        }
    }
}

impl OrchestratorError {
    pub(crate) fn not_found(owner_id: &str, display_name: &str) -> Self {
        Self::NotFound {
            owner_id: owner_id.to_string(),
            display_name: display_name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UnknownId(_))
    }
}
