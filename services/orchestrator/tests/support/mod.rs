//! Shared fixtures: a scripted fleet client, a recording notifier, an
//! in-memory store with injectable write failures, and an orchestrator wired
//! to all three.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gsfleet_id::ServerId;
use gsfleet_orchestrator::fleet::{FleetCatalog, FleetClient, FleetError, FleetResult};
use gsfleet_orchestrator::model::{
    Allocation, AllocationRequest, ClusterServerInfo, GameServerState, LifecycleEvent,
    ServerRecord, ServerStatus,
};
use gsfleet_orchestrator::notify::Notifier;
use gsfleet_orchestrator::orchestrator::{Orchestrator, OrchestratorConfig};
use gsfleet_orchestrator::store::{InMemoryServerStore, ServerStore, StoreError, StoreResult};
use reqwest::StatusCode;
use tokio::sync::watch;
use tokio::time::Instant;

pub const EXTERNAL_ID: &str = "gs-1";
pub const CLUSTER_NAME: &str = "alice-box-x7k2p";

/// One scripted reply to `allocate`.
#[derive(Debug, Clone)]
pub enum AllocateReply {
    NoCapacity,
    Unavailable,
    Rejected(StatusCode),
    Allocated(Allocation),
    Panic,
}

/// One scripted reply to `get_status`.
#[derive(Debug, Clone)]
pub enum StatusReply {
    State(ClusterServerInfo),
    NotFound,
    Unavailable,
}

/// Replays scripted replies in order; the last reply repeats forever.
struct Script<T> {
    replies: Mutex<VecDeque<T>>,
}

impl<T: Clone> Script<T> {
    fn new(replies: impl IntoIterator<Item = T>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }

    fn replace(&self, replies: impl IntoIterator<Item = T>) {
        *self.replies.lock().unwrap() = replies.into_iter().collect();
    }

    fn next(&self) -> Option<T> {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        }
    }
}

pub struct ScriptedFleetClient {
    allocate: Script<AllocateReply>,
    status: Script<StatusReply>,
    allocate_calls: AtomicUsize,
    status_calls: AtomicUsize,
    fleets: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    fail_deletes: AtomicBool,
}

impl ScriptedFleetClient {
    pub fn new(
        allocate: impl IntoIterator<Item = AllocateReply>,
        status: impl IntoIterator<Item = StatusReply>,
    ) -> Self {
        Self {
            allocate: Script::new(allocate),
            status: Script::new(status),
            allocate_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            fleets: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Allocation never finds capacity.
    pub fn without_capacity() -> Self {
        Self::new([AllocateReply::NoCapacity], [StatusReply::NotFound])
    }

    /// Allocates at once and reports the given states in order.
    pub fn allocating(states: impl IntoIterator<Item = StatusReply>) -> Self {
        Self::new([AllocateReply::Allocated(allocation())], states)
    }

    pub fn set_status(&self, replies: impl IntoIterator<Item = StatusReply>) {
        self.status.replace(replies);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn allocate_calls(&self) -> usize {
        self.allocate_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn fleets(&self) -> Vec<String> {
        self.fleets.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

fn unavailable() -> FleetError {
    FleetError::Api {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "etcd leader changed".to_string(),
    }
}

#[async_trait]
impl FleetClient for ScriptedFleetClient {
    async fn allocate(&self, fleet: &str, _request: &AllocationRequest) -> FleetResult<Allocation> {
        self.allocate_calls.fetch_add(1, Ordering::SeqCst);
        self.fleets.lock().unwrap().push(fleet.to_string());

        match self.allocate.next() {
            Some(AllocateReply::Allocated(allocation)) => Ok(allocation),
            Some(AllocateReply::Unavailable) => Err(unavailable()),
            Some(AllocateReply::Rejected(status)) => Err(FleetError::Api {
                status,
                body: "rejected".to_string(),
            }),
            Some(AllocateReply::Panic) => panic!("scripted allocate panic"),
            Some(AllocateReply::NoCapacity) | None => Err(FleetError::NoCapacity {
                fleet: fleet.to_string(),
                state: "UnAllocated".to_string(),
            }),
        }
    }

    async fn get_status(&self, external_id: &str) -> FleetResult<ClusterServerInfo> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.status.next() {
            Some(StatusReply::State(info)) => Ok(info),
            Some(StatusReply::Unavailable) => Err(unavailable()),
            Some(StatusReply::NotFound) | None => Err(FleetError::NotFound(external_id.to_string())),
        }
    }

    async fn delete(&self, name: &str) -> FleetResult<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }

    async fn health_check(&self) -> FleetResult<()> {
        Ok(())
    }
}

pub fn allocation() -> Allocation {
    Allocation {
        external_id: EXTERNAL_ID.to_string(),
        name: CLUSTER_NAME.to_string(),
        state: GameServerState::Allocated,
        address: None,
        port: None,
    }
}

pub fn state(state: GameServerState) -> StatusReply {
    StatusReply::State(ClusterServerInfo {
        external_id: EXTERNAL_ID.to_string(),
        name: CLUSTER_NAME.to_string(),
        state,
        address: None,
        port: None,
        created_at: None,
    })
}

pub fn ready_at(address: &str, port: u16) -> StatusReply {
    StatusReply::State(ClusterServerInfo {
        external_id: EXTERNAL_ID.to_string(),
        name: CLUSTER_NAME.to_string(),
        state: GameServerState::Ready,
        address: Some(address.to_string()),
        port: Some(port),
        created_at: None,
    })
}

/// An in-memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryServerStore,
    fail_writes: AtomicBool,
    external_id_failures: AtomicUsize,
    fail_ready_writes: AtomicBool,
    ready_writes: AtomicUsize,
    poisoned_delete: Mutex<Option<ServerId>>,
    blind_name_lookups: AtomicBool,
}

impl FlakyStore {
    /// Make every mutation fail until cleared.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` external id writes.
    pub fn fail_external_id_writes(&self, count: usize) {
        self.external_id_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_ready_writes(&self, fail: bool) {
        self.fail_ready_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful `update_ready` calls.
    pub fn ready_writes(&self) -> usize {
        self.ready_writes.load(Ordering::SeqCst)
    }

    /// Fail every delete of `id`.
    pub fn fail_deletes_of(&self, id: ServerId) {
        *self.poisoned_delete.lock().unwrap() = Some(id);
    }

    /// Make `find_by_name` report nothing, as a concurrent create that has
    /// not committed yet would see.
    pub fn set_blind_name_lookups(&self, blind: bool) {
        self.blind_name_lookups.store(blind, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ServerStore for FlakyStore {
    async fn get_by_id(&self, id: ServerId) -> StoreResult<Option<ServerRecord>> {
        self.inner.get_by_id(id).await
    }

    async fn find_by_name(
        &self,
        owner_id: &str,
        display_name: &str,
    ) -> StoreResult<Option<ServerRecord>> {
        if self.blind_name_lookups.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_by_name(owner_id, display_name).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<ServerRecord>> {
        self.inner.list_by_owner(owner_id).await
    }

    async fn save(&self, record: &ServerRecord) -> StoreResult<()> {
        self.check_writable()?;
        self.inner.save(record).await
    }

    async fn update_status(
        &self,
        id: ServerId,
        status: &ServerStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        self.check_writable()?;
        self.inner.update_status(id, status, error_message).await
    }

    async fn update_ready(&self, id: ServerId, address: &str, port: u16) -> StoreResult<()> {
        self.check_writable()?;
        if self.fail_ready_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("ready write rejected".to_string()));
        }
        self.inner.update_ready(id, address, port).await?;
        self.ready_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_external_id(
        &self,
        id: ServerId,
        external_id: &str,
        raw_state: &GameServerState,
    ) -> StoreResult<()> {
        self.check_writable()?;
        let failing = self
            .external_id_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("external id write rejected".to_string()));
        }
        self.inner.update_external_id(id, external_id, raw_state).await
    }

    async fn record_cluster_state(
        &self,
        id: ServerId,
        raw_state: &GameServerState,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.check_writable()?;
        self.inner.record_cluster_state(id, raw_state, synced_at).await
    }

    async fn schedule_cleanup(&self, id: ServerId, at: DateTime<Utc>) -> StoreResult<()> {
        self.check_writable()?;
        self.inner.schedule_cleanup(id, at).await
    }

    async fn list_stopped_eligible_for_cleanup(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ServerRecord>> {
        self.inner.list_stopped_eligible_for_cleanup(now).await
    }

    async fn delete(&self, id: ServerId) -> StoreResult<bool> {
        self.check_writable()?;
        if *self.poisoned_delete.lock().unwrap() == Some(id) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.delete(id).await
    }
}

/// Records every event it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<ServerStatus> {
        self.events().into_iter().map(|e| e.status).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: LifecycleEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub fleet: Arc<ScriptedFleetClient>,
    pub store: Arc<FlakyStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub shutdown_tx: watch::Sender<bool>,
}

impl Harness {
    pub fn new(fleet: ScriptedFleetClient) -> Self {
        Self::with_config(fleet, OrchestratorConfig::default())
    }

    pub fn with_config(fleet: ScriptedFleetClient, config: OrchestratorConfig) -> Self {
        let fleet = Arc::new(fleet);
        let store = Arc::new(FlakyStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let orchestrator = Orchestrator::new(
            fleet.clone(),
            store.clone(),
            notifier.clone(),
            FleetCatalog::default(),
            config,
            shutdown_rx,
        );

        Self {
            orchestrator,
            fleet,
            store,
            notifier,
            shutdown_tx,
        }
    }

    pub async fn record(&self, id: ServerId) -> ServerRecord {
        self.store
            .get_by_id(id)
            .await
            .unwrap()
            .expect("record should exist")
    }

    /// Sleep in one-second steps of (paused) tokio time until the record
    /// reaches `status` or `limit` passes. Returns the time waited.
    pub async fn wait_for_status(
        &self,
        id: ServerId,
        status: ServerStatus,
        limit: Duration,
    ) -> Duration {
        let start = Instant::now();
        loop {
            if self.record(id).await.status == status {
                return start.elapsed();
            }
            if start.elapsed() > limit {
                panic!(
                    "record did not reach {status} within {limit:?}; last: {:?}",
                    self.record(id).await.status
                );
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Let background tasks run for `duration` of tokio time.
    pub async fn run_for(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
