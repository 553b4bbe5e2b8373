//! Readiness polling after allocation.

use chrono::Utc;
use gsfleet_reconcile::{ConvergenceStatus, Deadline};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::provisioner::Provisioner;
use crate::model::{Allocation, ClusterServerInfo, ServerStatus};

pub(crate) const STARTUP_TIMEOUT_MESSAGE: &str = "startup timed out";

impl Provisioner {
    /// Poll the allocated server until it is ready, fails, or runs out of
    /// time. The first poll happens immediately.
    pub(super) async fn reconcile(&mut self, allocation: Allocation) {
        let deadline = Deadline::after(self.inner.config.startup_deadline);
        let mut interval = tokio::time::interval(self.inner.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if !self.external_id_persisted {
                self.persist_external_id(&allocation).await;
            }

            if deadline.is_expired() {
                warn!(
                    server_id = %self.record.id,
                    external_id = %allocation.external_id,
                    "Startup deadline exceeded"
                );
                if !self.external_id_persisted {
                    self.release_unrecorded(&allocation).await;
                }
                self.settle(
                    ServerStatus::Error,
                    Some(STARTUP_TIMEOUT_MESSAGE.to_string()),
                )
                .await;
                return;
            }

            // The record cannot settle until it names its cluster object.
            if !self.external_id_persisted {
                continue;
            }

            match self.inner.fleet.get_status(&allocation.external_id).await {
                Ok(info) => {
                    if self.observe(info).await {
                        return;
                    }
                }
                Err(e) => warn!(
                    server_id = %self.record.id,
                    external_id = %allocation.external_id,
                    error = %e,
                    "Status poll failed"
                ),
            }
        }
    }

    async fn persist_external_id(&mut self, allocation: &Allocation) {
        match self
            .inner
            .store
            .update_external_id(self.record.id, &allocation.external_id, &allocation.state)
            .await
        {
            Ok(()) => {
                self.external_id_persisted = true;
                self.record.external_id = Some(allocation.external_id.clone());
                self.record.cluster_state = Some(allocation.state.clone());
            }
            Err(e) => warn!(
                server_id = %self.record.id,
                external_id = %allocation.external_id,
                error = %e,
                "Failed to persist external id, will retry"
            ),
        }
    }

    /// Delete an allocation whose external id never reached the store, since
    /// nothing else could find it later.
    async fn release_unrecorded(&self, allocation: &Allocation) {
        match self.inner.fleet.delete(&allocation.name).await {
            Ok(()) => info!(
                server_id = %self.record.id,
                name = %allocation.name,
                "Released unrecorded game server"
            ),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(
                server_id = %self.record.id,
                name = %allocation.name,
                error = %e,
                "Failed to release unrecorded game server"
            ),
        }
    }

    /// Apply one poll. Returns true once the record has settled in a
    /// terminal status.
    async fn observe(&mut self, info: ClusterServerInfo) -> bool {
        match self
            .inner
            .store
            .record_cluster_state(self.record.id, &info.state, Utc::now())
            .await
        {
            Ok(()) => self.record.cluster_state = Some(info.state.clone()),
            Err(e) => debug!(server_id = %self.record.id, error = %e, "Failed to record cluster state"),
        }

        let status = info.state.user_status();
        debug!(
            server_id = %self.record.id,
            cluster_state = %info.state,
            status = %status,
            "Polled game server"
        );

        match info.state.convergence() {
            ConvergenceStatus::Converged => self.mark_ready(&info).await,
            ConvergenceStatus::Diverged => {
                let message = (status == ServerStatus::Error)
                    .then(|| format!("game server reported {} during startup", info.state));
                let settled = self.transition(status, message).await;
                if settled {
                    warn!(
                        server_id = %self.record.id,
                        cluster_state = %info.state,
                        "Game server failed during startup"
                    );
                }
                settled
            }
            ConvergenceStatus::Converging | ConvergenceStatus::Unknown => {
                self.transition(status, None).await;
                false
            }
        }
    }

    async fn mark_ready(&mut self, info: &ClusterServerInfo) -> bool {
        let (Some(address), Some(port)) = (info.address.as_deref(), info.port) else {
            debug!(server_id = %self.record.id, "Game server ready without an address yet");
            return false;
        };

        if let Err(e) = self
            .inner
            .store
            .update_ready(self.record.id, address, port)
            .await
        {
            warn!(server_id = %self.record.id, error = %e, "Failed to persist ready state, will retry");
            return false;
        }
        self.record.status = ServerStatus::Ready;
        self.record.address = Some(address.to_string());
        self.record.port = Some(port);
        self.record.error_message = None;

        info!(server_id = %self.record.id, address, port, "Game server ready");
        self.announce();
        true
    }
}
