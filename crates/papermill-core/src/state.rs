//! Engine: shared handle wiring storage, agents, and the runner together.

use std::sync::Arc;

use serde_json::Value;
use tokio_stream::wrappers::BroadcastStream;

use crate::agents::AgentRegistry;
use crate::db::Database;
use crate::error::CoreError;
use crate::graph::StepId;
use crate::models::{ChecklistType, Message, Task, TaskStatus};
use crate::progress::{ProgressBus, ProgressEvent};
use crate::runner::TaskRunner;
use crate::store::{MessageStore, TaskStore};
use crate::supervisor::{Supervisor, SupervisorConfig};

/// Parameters for a new pipeline run.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub owner_id: String,
    pub topic: String,
    pub dataset: Value,
    pub checklist: ChecklistType,
}

pub struct EngineInner {
    tasks: TaskStore,
    messages: MessageStore,
    bus: ProgressBus,
    supervisor: Arc<Supervisor>,
    runner: TaskRunner,
}

/// Cheaply cloneable engine handle.
pub type Engine = Arc<EngineInner>;

impl EngineInner {
    pub fn new(
        db: Database,
        agents: AgentRegistry,
        bus: ProgressBus,
        config: SupervisorConfig,
    ) -> Result<Engine, CoreError> {
        let tasks = TaskStore::new(db.clone());
        let messages = MessageStore::new(db);
        let supervisor = Arc::new(Supervisor::new(
            agents,
            tasks.clone(),
            messages.clone(),
            bus.clone(),
            config,
        )?);
        let runner = TaskRunner::new(supervisor.clone());
        Ok(Arc::new(Self {
            tasks,
            messages,
            bus,
            supervisor,
            runner,
        }))
    }

    /// Engine wired to the deterministic demo providers.
    pub fn demo(db: Database, config: SupervisorConfig) -> Result<Engine, CoreError> {
        let bus = ProgressBus::new();
        let agents = AgentRegistry::demo(bus.clone());
        Self::new(db, agents, bus, config)
    }

    /// Create a task and start its pipeline run in the background.
    pub async fn create_task(&self, params: NewTask) -> Result<Task, CoreError> {
        if params.topic.trim().is_empty() {
            return Err(CoreError::BadRequest("topic is empty".to_string()));
        }
        if params.owner_id.trim().is_empty() {
            return Err(CoreError::BadRequest("ownerId is empty".to_string()));
        }
        let task = Task::new(
            uuid::Uuid::new_v4().to_string(),
            params.owner_id,
            self.supervisor.graph().qualified_name(),
            params.topic,
            params.dataset,
            params.checklist,
        );
        self.tasks.save(&task).await?;
        tracing::info!("[Engine] created task {} ({})", task.id, task.topic);
        self.runner.start(&task.id).await?;
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task, CoreError> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {} not found", task_id)))
    }

    pub async fn list_tasks(&self, owner_id: &str) -> Result<Vec<Task>, CoreError> {
        self.tasks.list_by_owner(owner_id).await
    }

    /// Full audit log of a task, in append order.
    pub async fn list_messages(&self, task_id: &str) -> Result<Vec<Message>, CoreError> {
        self.get_task(task_id).await?;
        self.messages.list_by_task(task_id).await
    }

    pub async fn count_messages(&self, task_id: &str) -> Result<i64, CoreError> {
        self.messages.count_by_task(task_id).await
    }

    /// Live progress stream for a running task. Events start at
    /// subscription time; there is no replay.
    pub async fn subscribe(&self, task_id: &str) -> BroadcastStream<ProgressEvent> {
        self.bus.subscribe(task_id).await
    }

    /// Request cancellation of a running task; the Supervisor honors it
    /// at the next step boundary.
    pub async fn cancel(&self, task_id: &str) -> Result<(), CoreError> {
        self.get_task(task_id).await?;
        if self.runner.cancel(task_id).await {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "task {} has no live run to cancel",
                task_id
            )))
        }
    }

    /// Re-enter the revision loop with user feedback.
    ///
    /// Allowed from `COMPLETED` directly, and from `NEEDS_INTERVENTION`
    /// only with `reset_rounds`, which zeroes the exhausted round
    /// counter as an explicit operator decision.
    pub async fn submit_revision(
        &self,
        task_id: &str,
        feedback: &str,
        reset_rounds: bool,
    ) -> Result<Task, CoreError> {
        if feedback.trim().is_empty() {
            return Err(CoreError::BadRequest("revision feedback is empty".to_string()));
        }
        let mut task = self.get_task(task_id).await?;
        match task.status {
            TaskStatus::Completed => {}
            TaskStatus::NeedsIntervention => {
                if !reset_rounds {
                    return Err(CoreError::Conflict(format!(
                        "task {} exhausted its revision rounds; resubmit with reset_rounds to start over",
                        task.id
                    )));
                }
                task.revision_round = 0;
            }
            other => {
                return Err(CoreError::Conflict(format!(
                    "task {} is {}; only completed or intervention-pending tasks accept revisions",
                    task.id,
                    other.as_str()
                )));
            }
        }

        task.revision_notes.push(feedback.trim().to_string());
        task.status = TaskStatus::Revision;
        task.current_step = Some(StepId::Revise);
        task.last_error = None;
        task.updated_at = chrono::Utc::now();
        self.tasks.save(&task).await?;
        tracing::info!("[Engine] task {} re-entering revision", task.id);
        self.runner.start(&task.id).await?;
        Ok(task)
    }

    /// Delete a finished task and its audit log.
    pub async fn delete_task(&self, task_id: &str) -> Result<(), CoreError> {
        let task = self.get_task(task_id).await?;
        if self.runner.is_running(task_id).await {
            return Err(CoreError::Conflict(format!(
                "task {} is running; cancel it first",
                task.id
            )));
        }
        self.tasks.delete(task_id).await
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.runner.is_running(task_id).await
    }

    /// Block until the task's background run finishes.
    pub async fn wait(&self, task_id: &str) {
        self.runner.wait(task_id).await;
    }
}
