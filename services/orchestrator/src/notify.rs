//! Lifecycle event delivery.
//!
//! Notifiers are best-effort. `notify` is synchronous and cannot fail, so a
//! slow or broken sink never stalls a provisioning task.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::model::LifecycleEvent;

/// A sink for lifecycle events.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: LifecycleEvent);
}

/// Writes each event as a structured log record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: LifecycleEvent) {
        info!(
            server_id = %event.server_id,
            owner_id = %event.owner_id,
            display_name = %event.display_name,
            game_type = %event.game_type,
            previous = event.previous.as_ref().map(|s| s.as_str()),
            status = %event.status,
            address = event.address.as_deref(),
            port = event.port,
            error_message = event.error_message.as_deref(),
            channel_id = event.channel_id.as_deref(),
            "Server lifecycle event"
        );
    }
}

/// Forwards events into a bounded channel for a separate delivery task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl ChannelNotifier {
    /// A notifier and the receiving half of its queue.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: LifecycleEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(event) => ("queue full", event),
                mpsc::error::TrySendError::Closed(event) => ("receiver closed", event),
            };
            warn!(
                server_id = %event.server_id,
                status = %event.status,
                reason,
                "Dropping lifecycle event"
            );
        }
    }
}
