//! Tracked provisioning tasks.
//!
//! Each server record has at most one provisioning task. The registry owns
//! its cancel sender and join handle, so deletion and process shutdown can
//! stop a task and wait for it before touching the record.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gsfleet_id::ServerId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Cancellation observed by a provisioning task: the process-wide shutdown
/// signal or a cancel aimed at this task alone.
#[derive(Debug, Clone)]
pub struct Cancellation {
    global: watch::Receiver<bool>,
    local: watch::Receiver<bool>,
}

impl Cancellation {
    /// Resolves once either signal fires.
    pub async fn cancelled(&mut self) {
        tokio::select! {
            _ = wait_for_signal(&mut self.global) => {}
            _ = wait_for_signal(&mut self.local) => {}
        }
    }
}

async fn wait_for_signal(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender dropped without signalling; this source never fires.
        std::future::pending::<()>().await;
    }
}

struct TaskEntry {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Provisioning tasks keyed by server id.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<ServerId, TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServerId, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the provisioning task for `id`.
    ///
    /// `task` runs on its own tokio task under a supervisor that removes the
    /// registry entry when it ends and runs `on_panic` if it panicked.
    pub fn spawn<F, Fut, P, PFut>(
        &self,
        id: ServerId,
        shutdown: watch::Receiver<bool>,
        task: F,
        on_panic: P,
    ) where
        F: FnOnce(Cancellation) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
        P: FnOnce() -> PFut + Send + 'static,
        PFut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, local) = watch::channel(false);
        let work = task(Cancellation {
            global: shutdown,
            local,
        });
        let registry = self.clone();

        // Held across spawn and insert so the supervisor's removal cannot
        // run before the entry exists.
        let mut tasks = self.lock();
        let handle = tokio::spawn(async move {
            match tokio::spawn(work).await {
                Ok(()) => debug!(server_id = %id, "Provisioning task finished"),
                Err(e) if e.is_panic() => {
                    error!(server_id = %id, "Provisioning task panicked");
                    on_panic().await;
                }
                Err(e) => warn!(server_id = %id, error = %e, "Provisioning task aborted"),
            }
            registry.lock().remove(&id);
        });

        if let Some(previous) = tasks.insert(id, TaskEntry { cancel, handle }) {
            warn!(server_id = %id, "Replacing provisioning task");
            let _ = previous.cancel.send(true);
        }
    }

    /// Cancel the task for `id`, if any, and wait for it to exit.
    pub async fn cancel_and_join(&self, id: ServerId) -> bool {
        let entry = self.lock().remove(&id);
        let Some(entry) = entry else {
            return false;
        };

        let _ = entry.cancel.send(true);
        join(id, entry.handle).await;
        true
    }

    /// Cancel every task and wait for all of them.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.lock().drain().collect();
        if entries.is_empty() {
            return;
        }

        info!(count = entries.len(), "Cancelling provisioning tasks");
        for (_, entry) in &entries {
            let _ = entry.cancel.send(true);
        }
        for (id, entry) in entries {
            join(id, entry.handle).await;
        }
    }

    pub fn contains(&self, id: ServerId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

async fn join(id: ServerId, mut handle: JoinHandle<()>) {
    match tokio::time::timeout(JOIN_TIMEOUT, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(server_id = %id, error = %e, "Provisioning supervisor failed"),
        Err(_) => {
            warn!(server_id = %id, "Provisioning task did not stop in time, aborting");
            handle.abort();
        }
    }
}
