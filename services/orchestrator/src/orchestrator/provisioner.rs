//! The per-record provisioning task.

use std::sync::Arc;

use gsfleet_reconcile::TransitionTracker;
use tracing::{debug, info, instrument, warn};

use super::{Cancellation, Inner};
use crate::model::{LifecycleEvent, ServerRecord, ServerStatus};

/// State owned by one provisioning task.
///
/// `record` mirrors what has been persisted; `announced` holds the last
/// notification phase delivered, so repeated statuses are not re-announced.
pub(super) struct Provisioner {
    pub(super) inner: Arc<Inner>,
    pub(super) record: ServerRecord,
    channel_id: Option<String>,
    announced: TransitionTracker<ServerStatus>,
    pub(super) external_id_persisted: bool,
}

impl Provisioner {
    pub(super) fn new(inner: Arc<Inner>, record: ServerRecord, channel_id: Option<String>) -> Self {
        let announced = TransitionTracker::starting_at(record.status.notification_phase());
        Self {
            inner,
            record,
            channel_id,
            announced,
            external_id_persisted: false,
        }
    }

    pub(super) async fn run(mut self, mut cancel: Cancellation) {
        let id = self.record.id;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => info!(server_id = %id, "Provisioning cancelled"),
            _ = self.provision() => {}
        }
    }

    #[instrument(
        skip(self),
        fields(server_id = %self.record.id, game_type = %self.record.game_type)
    )]
    async fn provision(&mut self) {
        let Some(allocation) = self.allocate().await else {
            return;
        };
        self.reconcile(allocation).await;
    }

    /// Persist `status` and announce it if its phase is new.
    ///
    /// Returns false when the write failed; nothing is announced then and
    /// the caller retries on its next iteration.
    pub(super) async fn transition(
        &mut self,
        status: ServerStatus,
        error_message: Option<String>,
    ) -> bool {
        if self.record.status != status || self.record.error_message != error_message {
            if let Err(e) = self
                .inner
                .store
                .update_status(self.record.id, &status, error_message.as_deref())
                .await
            {
                warn!(
                    server_id = %self.record.id,
                    status = %status,
                    error = %e,
                    "Failed to persist status, will retry"
                );
                return false;
            }
            debug!(
                server_id = %self.record.id,
                from = %self.record.status,
                to = %status,
                "Status updated"
            );
            self.record.status = status;
            self.record.error_message = error_message;
        }

        self.announce();
        true
    }

    /// Persist a final status, retrying failed writes every poll interval.
    pub(super) async fn settle(&mut self, status: ServerStatus, error_message: Option<String>) {
        while !self.transition(status.clone(), error_message.clone()).await {
            tokio::time::sleep(self.inner.config.poll_interval).await;
        }
    }

    pub(super) fn announce(&mut self) {
        let phase = self.record.status.notification_phase();
        let previous = self.announced.last().cloned();
        if !self.announced.observe(phase.clone()) {
            return;
        }

        let mut event =
            LifecycleEvent::transition(&self.record, previous, phase, self.channel_id.clone());
        if self.record.status == ServerStatus::Ready {
            if let (Some(address), Some(port)) = (&self.record.address, self.record.port) {
                event = event.with_connection(address.clone(), port);
            }
        }
        if let Some(message) = &self.record.error_message {
            event = event.with_error(message.clone());
        }
        self.inner.notifier.notify(event);
    }
}
