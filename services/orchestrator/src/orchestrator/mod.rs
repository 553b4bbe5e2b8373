//! Server lifecycle orchestration.
//!
//! `create_server` persists a Pending record and returns at once. A tracked
//! provisioning task then allocates an instance from the game type's fleet,
//! retrying until capacity appears or the allocation deadline passes, and
//! polls the allocated instance until it is ready, failed, or out of time.
//! Only that task writes to its record until it exits; deletion and stop
//! cancel and join it first.

mod allocation;
mod error;
mod provisioner;
mod reconciler;
mod tasks;

pub use error::{OrchestratorError, OrchestratorResult};
pub use tasks::{Cancellation, TaskRegistry};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gsfleet_id::ServerId;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::fleet::{FleetCatalog, FleetClient};
use crate::model::{CreateServerRequest, LifecycleEvent, ServerRecord, ServerStatus};
use crate::notify::Notifier;
use crate::store::ServerStore;
use provisioner::Provisioner;

pub(crate) const PANIC_MESSAGE: &str = "provisioning task failed unexpectedly";

/// Timing policy for provisioning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wait between allocation attempts.
    pub allocation_retry_interval: Duration,

    /// Total time allowed to obtain an allocation.
    pub allocation_deadline: Duration,

    /// Wait between status polls after allocation.
    pub poll_interval: Duration,

    /// Total time allowed for an allocated server to become ready.
    pub startup_deadline: Duration,

    /// Give up on allocation errors the cluster reports as permanent
    /// (missing fleet, rejected request) instead of retrying them.
    pub fail_fast_on_permanent_errors: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            allocation_retry_interval: Duration::from_secs(15),
            allocation_deadline: Duration::from_secs(600),
            poll_interval: Duration::from_secs(10),
            startup_deadline: Duration::from_secs(600),
            fail_fast_on_permanent_errors: false,
        }
    }
}

struct Inner {
    fleet: Arc<dyn FleetClient>,
    store: Arc<dyn ServerStore>,
    notifier: Arc<dyn Notifier>,
    catalog: FleetCatalog,
    config: OrchestratorConfig,
    shutdown: watch::Receiver<bool>,
    tasks: TaskRegistry,
}

impl Inner {
    /// Mark a record whose provisioning task panicked.
    async fn fail_unexpectedly(&self, id: ServerId) {
        let record = match self.store.get_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                error!(server_id = %id, error = %e, "Failed to load record after task panic");
                return;
            }
        };
        if record.status.is_terminal() {
            return;
        }

        if let Err(e) = self
            .store
            .update_status(id, &ServerStatus::Error, Some(PANIC_MESSAGE))
            .await
        {
            error!(server_id = %id, error = %e, "Failed to mark record as failed");
            return;
        }

        let event = LifecycleEvent::transition(
            &record,
            Some(record.status.notification_phase()),
            ServerStatus::Error,
            None,
        )
        .with_error(PANIC_MESSAGE);
        self.notifier.notify(event);
    }
}

/// Drives game server records through their lifecycle.
///
/// Cheap to clone; clones share collaborators and the task registry.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        fleet: Arc<dyn FleetClient>,
        store: Arc<dyn ServerStore>,
        notifier: Arc<dyn Notifier>,
        catalog: FleetCatalog,
        config: OrchestratorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fleet,
                store,
                notifier,
                catalog,
                config,
                shutdown,
                tasks: TaskRegistry::new(),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Persist a Pending record and start provisioning it in the background.
    ///
    /// Returns before any cluster call is made. A name already taken by the
    /// owner is rejected here, or by the store if a concurrent create won.
    #[instrument(
        skip(self, request),
        fields(owner_id = %request.owner_id, display_name = %request.display_name)
    )]
    pub async fn create_server(
        &self,
        request: CreateServerRequest,
    ) -> OrchestratorResult<ServerRecord> {
        if self
            .inner
            .store
            .find_by_name(&request.owner_id, &request.display_name)
            .await?
            .is_some()
        {
            return Err(OrchestratorError::AlreadyExists {
                owner_id: request.owner_id,
                display_name: request.display_name,
            });
        }

        let record = ServerRecord::pending(&request, Utc::now());
        self.inner.store.save(&record).await?;
        info!(
            server_id = %record.id,
            game_type = %record.game_type,
            hourly_cost = record.hourly_cost,
            "Server record created"
        );

        self.inner.notifier.notify(LifecycleEvent::transition(
            &record,
            None,
            ServerStatus::Pending,
            request.channel_id.clone(),
        ));

        self.spawn_provisioning(record.clone(), request.channel_id);
        Ok(record)
    }

    fn spawn_provisioning(&self, record: ServerRecord, channel_id: Option<String>) {
        let id = record.id;
        let provisioner = Provisioner::new(self.inner.clone(), record, channel_id);
        let inner = self.inner.clone();

        self.inner.tasks.spawn(
            id,
            self.inner.shutdown.clone(),
            move |cancel| provisioner.run(cancel),
            move || async move { inner.fail_unexpectedly(id).await },
        );
    }

    /// Delete a server, releasing its cluster object best-effort.
    ///
    /// The record is removed even when the cluster delete fails.
    #[instrument(skip(self))]
    pub async fn delete_server(&self, owner_id: &str, display_name: &str) -> OrchestratorResult<()> {
        let record = self.find(owner_id, display_name).await?;
        self.delete_record(record).await
    }

    /// Delete the server with this exact id, as [`Self::delete_server`] does.
    #[instrument(skip(self))]
    pub async fn delete_server_by_id(&self, id: ServerId) -> OrchestratorResult<()> {
        let record = self
            .inner
            .store
            .get_by_id(id)
            .await?
            .ok_or(OrchestratorError::UnknownId(id))?;
        self.delete_record(record).await
    }

    async fn delete_record(&self, record: ServerRecord) -> OrchestratorResult<()> {
        self.inner.tasks.cancel_and_join(record.id).await;
        self.release(&record).await;

        if !self.inner.store.delete(record.id).await? {
            return Err(OrchestratorError::UnknownId(record.id));
        }
        info!(server_id = %record.id, "Server deleted");

        self.inner.notifier.notify(LifecycleEvent::transition(
            &record,
            Some(record.status.notification_phase()),
            ServerStatus::Deleted,
            None,
        ));
        Ok(())
    }

    /// Stop a server: cancel provisioning, release its cluster object and
    /// mark the record Stopped so the cleanup sweeper can reclaim it later.
    #[instrument(skip(self))]
    pub async fn stop_server(
        &self,
        owner_id: &str,
        display_name: &str,
    ) -> OrchestratorResult<ServerRecord> {
        let record = self.find(owner_id, display_name).await?;
        if record.status == ServerStatus::Stopped {
            return Ok(record);
        }

        self.inner.tasks.cancel_and_join(record.id).await;
        self.release(&record).await;

        self.inner
            .store
            .update_status(record.id, &ServerStatus::Stopped, None)
            .await?;
        let stopped = self
            .inner
            .store
            .get_by_id(record.id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(owner_id, display_name))?;
        info!(server_id = %record.id, "Server stopped");

        self.inner.notifier.notify(LifecycleEvent::transition(
            &stopped,
            Some(record.status.notification_phase()),
            ServerStatus::Stopped,
            None,
        ));
        Ok(stopped)
    }

    /// Hold a stopped server back from cleanup until `at`.
    pub async fn schedule_cleanup(
        &self,
        owner_id: &str,
        display_name: &str,
        at: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let record = self.find(owner_id, display_name).await?;
        self.inner.store.schedule_cleanup(record.id, at).await?;
        debug!(server_id = %record.id, cleanup_at = %at, "Cleanup scheduled");
        Ok(())
    }

    /// The stored record merged with a live cluster snapshot, if any.
    pub async fn get_server_info(
        &self,
        owner_id: &str,
        display_name: &str,
    ) -> OrchestratorResult<ServerRecord> {
        let record = self.find(owner_id, display_name).await?;
        Ok(self.with_live_state(record).await)
    }

    /// Every server the owner has, each merged with its live snapshot.
    pub async fn list_user_servers(&self, owner_id: &str) -> OrchestratorResult<Vec<ServerRecord>> {
        let records = self.inner.store.list_by_owner(owner_id).await?;
        let mut servers = Vec::with_capacity(records.len());
        for record in records {
            servers.push(self.with_live_state(record).await);
        }
        Ok(servers)
    }

    /// Number of provisioning tasks still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Cancel every provisioning task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.tasks.shutdown().await;
    }

    async fn find(&self, owner_id: &str, display_name: &str) -> OrchestratorResult<ServerRecord> {
        self.inner
            .store
            .find_by_name(owner_id, display_name)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(owner_id, display_name))
    }

    async fn with_live_state(&self, mut record: ServerRecord) -> ServerRecord {
        if matches!(record.status, ServerStatus::Stopped | ServerStatus::Deleted) {
            return record;
        }
        let Some(external_id) = record.external_id.clone() else {
            return record;
        };

        match self.inner.fleet.get_status(&external_id).await {
            Ok(info) => record.merge_snapshot(&info, Utc::now()),
            Err(e) => debug!(
                server_id = %record.id,
                external_id = %external_id,
                error = %e,
                "Live status unavailable, returning stored record"
            ),
        }
        record
    }

    /// Delete the record's cluster object, looking up its current name.
    /// Failures are logged and otherwise ignored.
    async fn release(&self, record: &ServerRecord) {
        let Some(external_id) = record.external_id.as_deref() else {
            return;
        };

        let name = match self.inner.fleet.get_status(external_id).await {
            Ok(info) => info.name,
            Err(e) if e.is_not_found() => {
                debug!(server_id = %record.id, external_id, "Game server already gone");
                return;
            }
            Err(e) => {
                warn!(
                    server_id = %record.id,
                    external_id,
                    error = %e,
                    "Failed to resolve game server, skipping cluster delete"
                );
                return;
            }
        };

        match self.inner.fleet.delete(&name).await {
            Ok(()) => info!(server_id = %record.id, name = %name, "Game server deleted from cluster"),
            Err(e) if e.is_not_found() => {
                debug!(server_id = %record.id, name = %name, "Game server already gone")
            }
            Err(e) => warn!(
                server_id = %record.id,
                name = %name,
                error = %e,
                "Failed to delete game server from cluster"
            ),
        }
    }
}
