//! Persistence for server records.
//!
//! The orchestrator only ever mutates one record per call, keyed by its
//! [`ServerId`], so implementations need no multi-row transactions.

mod error;
mod memory;
mod postgres;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryServerStore;
pub use postgres::{DbConfig, PgServerStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gsfleet_id::ServerId;

use crate::model::{GameServerState, ServerRecord, ServerStatus};

/// Storage for [`ServerRecord`]s.
#[async_trait]
pub trait ServerStore: Send + Sync {
    async fn get_by_id(&self, id: ServerId) -> StoreResult<Option<ServerRecord>>;

    /// Look up a record by owner and display name.
    async fn find_by_name(
        &self,
        owner_id: &str,
        display_name: &str,
    ) -> StoreResult<Option<ServerRecord>>;

    /// All records for an owner, oldest first.
    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<ServerRecord>>;

    /// Insert or replace a full record.
    ///
    /// Fails with [`StoreError::DuplicateName`] when a different record
    /// already has the same owner and display name.
    async fn save(&self, record: &ServerRecord) -> StoreResult<()>;

    /// Set the status and error message. Entering `Stopped` stamps
    /// `stopped_at`.
    async fn update_status(
        &self,
        id: ServerId,
        status: &ServerStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()>;

    /// Move the record to Ready with its connection address in one write,
    /// clearing any error message.
    async fn update_ready(&self, id: ServerId, address: &str, port: u16) -> StoreResult<()>;

    /// Record the cluster object backing this record.
    async fn update_external_id(
        &self,
        id: ServerId,
        external_id: &str,
        raw_state: &GameServerState,
    ) -> StoreResult<()>;

    /// Record the raw cluster state seen by a poll.
    async fn record_cluster_state(
        &self,
        id: ServerId,
        raw_state: &GameServerState,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn schedule_cleanup(&self, id: ServerId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Stopped records with `stopped_at` set whose `cleanup_at` is unset or
    /// not after `now`, oldest stop first.
    async fn list_stopped_eligible_for_cleanup(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ServerRecord>>;

    /// Remove a record. Returns false if it did not exist.
    async fn delete(&self, id: ServerId) -> StoreResult<bool>;
}
