use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::should_clean_up;
use crate::orchestrator::Orchestrator;
use crate::store::ServerStore;

#[derive(Debug, Clone)]
pub struct CleanupWorkerConfig {
    pub interval: Duration,
    /// How long a stopped server is kept before it may be deleted.
    pub grace_period: Duration,
}

impl Default for CleanupWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            grace_period: Duration::from_secs(2 * 3600),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct CleanupWorker {
    store: Arc<dyn ServerStore>,
    orchestrator: Orchestrator,
    config: CleanupWorkerConfig,
}

impl CleanupWorker {
    pub fn new(
        store: Arc<dyn ServerStore>,
        orchestrator: Orchestrator,
        config: CleanupWorkerConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            grace_period_secs = self.config.grace_period.as_secs(),
            "Starting cleanup worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Cleanup worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Delete every stopped server due at `now`.
    ///
    /// One failed deletion is logged and does not stop the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let mut stats = SweepStats::default();

        let candidates = match self.store.list_stopped_eligible_for_cleanup(now).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to list stopped servers");
                return stats;
            }
        };
        stats.scanned = candidates.len();

        for record in candidates {
            if !should_clean_up(&record, now, self.config.grace_period) {
                stats.skipped += 1;
                continue;
            }

            match self.orchestrator.delete_server_by_id(record.id).await {
                Ok(()) => {
                    info!(
                        server_id = %record.id,
                        owner_id = %record.owner_id,
                        display_name = %record.display_name,
                        "Cleaned up stopped server"
                    );
                    stats.deleted += 1;
                }
                Err(e) if e.is_not_found() => stats.skipped += 1,
                Err(e) => {
                    warn!(server_id = %record.id, error = %e, "Failed to clean up stopped server");
                    stats.failed += 1;
                }
            }
        }

        if stats.scanned > 0 {
            info!(
                scanned = stats.scanned,
                deleted = stats.deleted,
                skipped = stats.skipped,
                failed = stats.failed,
                "Cleanup pass complete"
            );
        }
        stats
    }
}
