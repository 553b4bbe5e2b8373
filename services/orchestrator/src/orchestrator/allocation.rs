//! Allocation with retry.
//!
//! Capacity shortages and transport errors are retried alike until an
//! absolute deadline; the attempt count never bounds the loop.

use std::collections::BTreeMap;

use gsfleet_reconcile::Deadline;
use tracing::{error, info, warn};

use super::provisioner::Provisioner;
use crate::model::{Allocation, AllocationRequest, ServerStatus};

pub(crate) const ALLOCATION_TIMEOUT_MESSAGE: &str = "allocation timed out waiting for capacity";

const SERVER_ID_LABEL: &str = "gsfleet.io/server-id";

impl Provisioner {
    fn allocation_request(&self) -> AllocationRequest {
        AllocationRequest {
            game_type: self.record.game_type.clone(),
            display_name: self.record.display_name.clone(),
            owner_id: self.record.owner_id.clone(),
            labels: BTreeMap::from([(SERVER_ID_LABEL.to_string(), self.record.id.to_string())]),
        }
    }

    /// Obtain an allocation, or settle the record in Error and return None.
    pub(super) async fn allocate(&mut self) -> Option<Allocation> {
        let config = self.inner.config.clone();
        let deadline = Deadline::after(config.allocation_deadline);
        let fleet = self.inner.catalog.fleet_for(&self.record.game_type).to_string();
        let request = self.allocation_request();

        self.transition(ServerStatus::Creating, None).await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.fleet.allocate(&fleet, &request).await {
                Ok(allocation) => {
                    info!(
                        attempt,
                        fleet = %fleet,
                        external_id = %allocation.external_id,
                        name = %allocation.name,
                        "Game server allocated"
                    );
                    self.transition(ServerStatus::Creating, None).await;
                    return Some(allocation);
                }
                Err(e) if config.fail_fast_on_permanent_errors && e.is_permanent() => {
                    error!(attempt, fleet = %fleet, error = %e, "Allocation rejected permanently");
                    self.settle(ServerStatus::Error, Some(format!("allocation rejected: {e}")))
                        .await;
                    return None;
                }
                Err(e) if e.is_no_capacity() => {
                    info!(
                        attempt,
                        fleet = %fleet,
                        remaining_secs = deadline.remaining().as_secs(),
                        "No capacity, waiting to retry"
                    );
                    self.transition(ServerStatus::Requested, None).await;
                }
                Err(e) => {
                    warn!(attempt, fleet = %fleet, error = %e, "Allocation failed, will retry");
                    self.transition(ServerStatus::Requested, None).await;
                }
            }

            tokio::time::sleep(config.allocation_retry_interval).await;

            if deadline.is_expired() {
                warn!(attempts = attempt, fleet = %fleet, "Allocation deadline exceeded");
                self.settle(
                    ServerStatus::Error,
                    Some(ALLOCATION_TIMEOUT_MESSAGE.to_string()),
                )
                .await;
                return None;
            }
        }
    }
}
