//! Reclaiming stopped servers.
//!
//! A stopped server keeps its record for a grace period so its owner can
//! restart or inspect it. After that, and once any scheduled `cleanup_at`
//! has passed, the sweeper deletes it through the orchestrator.

mod worker;

pub use worker::{CleanupWorker, CleanupWorkerConfig, SweepStats};

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::model::{ServerRecord, ServerStatus};

/// Whether `record` is due for deletion at `now`.
///
/// Records without `stopped_at` are never due.
pub fn should_clean_up(record: &ServerRecord, now: DateTime<Utc>, grace_period: Duration) -> bool {
    if record.status != ServerStatus::Stopped {
        return false;
    }
    let Some(stopped_at) = record.stopped_at else {
        return false;
    };

    let grace = TimeDelta::from_std(grace_period).unwrap_or(TimeDelta::MAX);
    now.signed_duration_since(stopped_at) > grace
        && record.cleanup_at.is_none_or(|cleanup_at| cleanup_at <= now)
}

/// Time left before `record` becomes due, zero if it already is.
///
/// None for records that are not stopped.
pub fn time_until_cleanup(
    record: &ServerRecord,
    now: DateTime<Utc>,
    grace_period: Duration,
) -> Option<Duration> {
    if record.status != ServerStatus::Stopped {
        return None;
    }
    let stopped_at = record.stopped_at?;

    let grace = TimeDelta::from_std(grace_period).ok()?;
    let mut due = stopped_at.checked_add_signed(grace)?;
    if let Some(cleanup_at) = record.cleanup_at {
        due = due.max(cleanup_at);
    }

    Some(due.signed_duration_since(now).to_std().unwrap_or(Duration::ZERO))
}
