//! In-memory store for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gsfleet_id::ServerId;
use tokio::sync::RwLock;

use super::{ServerStore, StoreError, StoreResult};
use crate::model::{GameServerState, ServerRecord, ServerStatus};

/// A [`ServerStore`] backed by a map.
#[derive(Default)]
pub struct InMemoryServerStore {
    records: RwLock<HashMap<ServerId, ServerRecord>>,
}

impl InMemoryServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn mutate<F>(&self, id: ServerId, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut ServerRecord) + Send,
    {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl ServerStore for InMemoryServerStore {
    async fn get_by_id(&self, id: ServerId) -> StoreResult<Option<ServerRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_name(
        &self,
        owner_id: &str,
        display_name: &str,
    ) -> StoreResult<Option<ServerRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.owner_id == owner_id && r.display_name == display_name)
            .min_by_key(|r| r.id)
            .cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<ServerRecord>> {
        let records = self.records.read().await;
        let mut owned: Vec<_> = records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by_key(|r| r.id);
        Ok(owned)
    }

    async fn save(&self, record: &ServerRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let taken = records.values().any(|r| {
            r.id != record.id
                && r.owner_id == record.owner_id
                && r.display_name == record.display_name
        });
        if taken {
            return Err(StoreError::DuplicateName {
                owner_id: record.owner_id.clone(),
                display_name: record.display_name.clone(),
            });
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: ServerId,
        status: &ServerStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        let status = status.clone();
        let error_message = error_message.map(str::to_string);
        self.mutate(id, move |record| {
            if status == ServerStatus::Stopped {
                record.stopped_at = Some(Utc::now());
            }
            record.status = status;
            record.error_message = error_message;
        })
        .await
    }

    async fn update_ready(&self, id: ServerId, address: &str, port: u16) -> StoreResult<()> {
        let address = address.to_string();
        self.mutate(id, move |record| {
            record.status = ServerStatus::Ready;
            record.address = Some(address);
            record.port = Some(port);
            record.error_message = None;
        })
        .await
    }

    async fn update_external_id(
        &self,
        id: ServerId,
        external_id: &str,
        raw_state: &GameServerState,
    ) -> StoreResult<()> {
        let external_id = external_id.to_string();
        let raw_state = raw_state.clone();
        self.mutate(id, move |record| {
            record.external_id = Some(external_id);
            record.cluster_state = Some(raw_state);
        })
        .await
    }

    async fn record_cluster_state(
        &self,
        id: ServerId,
        raw_state: &GameServerState,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let raw_state = raw_state.clone();
        self.mutate(id, move |record| {
            record.cluster_state = Some(raw_state);
            record.last_status_sync = Some(synced_at);
        })
        .await
    }

    async fn schedule_cleanup(&self, id: ServerId, at: DateTime<Utc>) -> StoreResult<()> {
        self.mutate(id, move |record| record.cleanup_at = Some(at))
            .await
    }

    async fn list_stopped_eligible_for_cleanup(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ServerRecord>> {
        let records = self.records.read().await;
        let mut eligible: Vec<_> = records
            .values()
            .filter(|r| r.status == ServerStatus::Stopped && r.stopped_at.is_some())
            .filter(|r| r.cleanup_at.is_none_or(|at| at <= now))
            .cloned()
            .collect();
        eligible.sort_by_key(|r| r.stopped_at);
        Ok(eligible)
    }

    async fn delete(&self, id: ServerId) -> StoreResult<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }
}
