//! Task runner: one background execution per task.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::CoreError;
use crate::supervisor::{CancelFlag, Supervisor};

struct RunningEntry {
    cancel: CancelFlag,
    handle: JoinHandle<()>,
}

/// Spawns and tracks Supervisor runs, one per task at a time.
#[derive(Clone)]
pub struct TaskRunner {
    supervisor: Arc<Supervisor>,
    running: Arc<RwLock<HashMap<String, RunningEntry>>>,
}

impl TaskRunner {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawn a background run for `task_id`. `Conflict` when a run for
    /// the same task is still live.
    pub async fn start(&self, task_id: &str) -> Result<CancelFlag, CoreError> {
        let mut running = self.running.write().await;
        if let Some(entry) = running.get(task_id) {
            if !entry.handle.is_finished() {
                return Err(CoreError::Conflict(format!(
                    "task {} is already running",
                    task_id
                )));
            }
        }

        let cancel = CancelFlag::new();
        let supervisor = self.supervisor.clone();
        let map = self.running.clone();
        let id = task_id.to_string();
        let flag = cancel.clone();
        // The map write lock is held until the entry is inserted, so the
        // spawned cleanup cannot race the insert.
        let handle = tokio::spawn(async move {
            if let Err(e) = supervisor.run(&id, flag).await {
                tracing::error!("[Runner] task {} run aborted: {}", id, e);
            }
            map.write().await.remove(&id);
        });
        running.insert(
            task_id.to_string(),
            RunningEntry {
                cancel: cancel.clone(),
                handle,
            },
        );
        Ok(cancel)
    }

    /// Request cancellation; takes effect at the next step boundary.
    /// Returns false when no run is live for the task.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let running = self.running.read().await;
        match running.get(task_id) {
            Some(entry) if !entry.handle.is_finished() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        let running = self.running.read().await;
        running
            .get(task_id)
            .map(|e| !e.handle.is_finished())
            .unwrap_or(false)
    }

    /// Block until the task's background run finishes. No-op when none
    /// is live.
    pub async fn wait(&self, task_id: &str) {
        let entry = self.running.write().await.remove(task_id);
        if let Some(entry) = entry {
            let _ = entry.handle.await;
        }
    }
}
