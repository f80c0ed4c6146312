//! Supervisor: drives one task through the workflow graph.
//!
//! Per step it builds the input from accumulated task state, records a
//! message envelope, invokes the adapter under the retry policy, folds
//! the result back into the task, and asks the graph where to go next.
//! Task state is persisted at every step boundary so a restarted process
//! can resume from `current_step`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::agents::compliance::EvaluateInput;
use crate::agents::literature::SearchInput;
use crate::agents::statistics::AnalyzeInput;
use crate::agents::writing::{ComposeInput, DraftInput, PlanInput};
use crate::agents::{AgentRegistry, SubAgent};
use crate::contract::{self, AgentId, ErrorInfo, ErrorKind, Intent};
use crate::error::CoreError;
use crate::graph::{Route, StepId, WorkflowGraph};
use crate::models::{CallMetrics, Message, Section, Task, TaskStatus};
use crate::progress::{ProgressBus, ProgressEvent};
use crate::store::{MessageStore, TaskStore};

pub const DEFAULT_COMPLIANCE_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MAX_REVISION_ROUNDS: u32 = 3;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_REFERENCES: u32 = 12;

const EXCERPT_LEN: usize = 120;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Minimum compliance score that lets a manuscript through.
    pub compliance_threshold: f64,
    /// Automatic revision rounds before the task needs intervention.
    pub max_revision_rounds: u32,
    /// Per-invocation deadline; over it the call counts as `TIMEOUT`.
    pub call_timeout: Duration,
    /// How many references the literature step asks for.
    pub max_references: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            compliance_threshold: DEFAULT_COMPLIANCE_THRESHOLD,
            max_revision_rounds: DEFAULT_MAX_REVISION_ROUNDS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_references: DEFAULT_MAX_REFERENCES,
        }
    }
}

/// Cooperative cancellation handle, checked at step boundaries only; an
/// in-flight sub-agent call always runs to completion.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one executed step: domain failures are data, not errors.
/// `Err(CoreError)` is reserved for infrastructure faults (storage).
enum StepOutcome {
    Done(String),
    Failed(ErrorInfo),
}

pub struct Supervisor {
    graph: WorkflowGraph,
    agents: AgentRegistry,
    tasks: TaskStore,
    messages: MessageStore,
    bus: ProgressBus,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        agents: AgentRegistry,
        tasks: TaskStore,
        messages: MessageStore,
        bus: ProgressBus,
        config: SupervisorConfig,
    ) -> Result<Self, CoreError> {
        contract::validate_registry().map_err(CoreError::Internal)?;
        let graph = WorkflowGraph::imrad(config.compliance_threshold, config.max_revision_rounds);
        graph.validate()?;
        for agent in [
            AgentId::Literature,
            AgentId::Statistics,
            AgentId::Writing,
            AgentId::Compliance,
        ] {
            if !agents.contains(agent) {
                return Err(CoreError::Internal(format!(
                    "no adapter registered for agent {}",
                    agent.as_str()
                )));
            }
        }
        Ok(Self {
            graph,
            agents,
            tasks,
            messages,
            bus,
            config,
        })
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Run `task_id` to a terminal state (or until cancelled). Returns the
    /// final task; domain failures end up in `task.status` and
    /// `task.last_error`, not in the `Err` channel.
    pub async fn run(&self, task_id: &str, cancel: CancelFlag) -> Result<Task, CoreError> {
        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {} not found", task_id)))?;
        if task.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "task {} is already {}",
                task.id,
                task.status.as_str()
            )));
        }

        let mut step = task.current_step.unwrap_or_else(|| self.graph.entry());
        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Running;
        }
        task.current_step = Some(step);
        task.updated_at = Utc::now();
        self.tasks.save(&task).await?;
        tracing::info!(
            "[Supervisor] task {} ({}) entering step {}",
            task.id,
            task.workflow,
            step.as_str()
        );

        loop {
            if cancel.is_cancelled() {
                task.status = TaskStatus::Cancelled;
                task.updated_at = Utc::now();
                self.tasks.save(&task).await?;
                tracing::info!(
                    "[Supervisor] task {} cancelled before step {}",
                    task.id,
                    step.as_str()
                );
                return self.finish(task).await;
            }

            self.bus
                .emit(&task.id, ProgressEvent::StepStarted { step })
                .await;
            let outcome = if step == StepId::Write {
                self.run_write_step(&mut task).await?
            } else {
                self.run_single_step(&mut task, step).await?
            };
            let excerpt = match outcome {
                StepOutcome::Done(excerpt) => excerpt,
                StepOutcome::Failed(info) => {
                    task.status = TaskStatus::Failed;
                    task.last_error = Some(info.clone());
                    task.updated_at = Utc::now();
                    self.tasks.save(&task).await?;
                    tracing::warn!(
                        "[Supervisor] task {} failed at step {}: {}",
                        task.id,
                        step.as_str(),
                        info
                    );
                    self.bus
                        .emit(&task.id, ProgressEvent::Error { detail: info })
                        .await;
                    self.bus.remove(&task.id).await;
                    return Ok(task);
                }
            };
            self.bus
                .emit(
                    &task.id,
                    ProgressEvent::StepCompleted {
                        step,
                        output_excerpt: excerpt,
                    },
                )
                .await;

            match self.graph.next(step, &task) {
                Route::Step(next) => {
                    task.current_step = Some(next);
                    task.updated_at = Utc::now();
                    self.tasks.save(&task).await?;
                    step = next;
                }
                Route::Loop(next) => {
                    task.revision_round += 1;
                    task.status = TaskStatus::Revision;
                    task.current_step = Some(next);
                    task.updated_at = Utc::now();
                    self.tasks.save(&task).await?;
                    tracing::info!(
                        "[Supervisor] task {} below compliance threshold, revision round {}",
                        task.id,
                        task.revision_round
                    );
                    step = next;
                }
                Route::LoopExhausted => {
                    task.revision_round += 1;
                    task.status = TaskStatus::NeedsIntervention;
                    task.current_step = None;
                    task.updated_at = Utc::now();
                    self.tasks.save(&task).await?;
                    tracing::warn!(
                        "[Supervisor] task {} exhausted {} revision rounds, needs intervention",
                        task.id,
                        task.revision_round
                    );
                    return self.finish(task).await;
                }
                Route::End => {
                    task.status = TaskStatus::Completed;
                    task.current_step = None;
                    task.updated_at = Utc::now();
                    self.tasks.save(&task).await?;
                    tracing::info!("[Supervisor] task {} completed", task.id);
                    return self.finish(task).await;
                }
            }
        }
    }

    async fn finish(&self, task: Task) -> Result<Task, CoreError> {
        self.bus
            .emit(
                &task.id,
                ProgressEvent::Done {
                    task: Box::new(task.clone()),
                },
            )
            .await;
        self.bus.remove(&task.id).await;
        Ok(task)
    }

    async fn run_single_step(
        &self,
        task: &mut Task,
        step: StepId,
    ) -> Result<StepOutcome, CoreError> {
        let node = self
            .graph
            .node(step)
            .ok_or_else(|| CoreError::Internal(format!("no node for step {}", step.as_str())))?;
        let input = match self.build_input(step, task) {
            Ok(v) => v,
            Err(info) => return Ok(StepOutcome::Failed(info)),
        };
        let envelope = match Message::send(
            AgentId::Supervisor,
            node.agent,
            node.intent,
            &task.id,
            input.clone(),
        ) {
            Ok(m) => m,
            Err(info) => return Ok(StepOutcome::Failed(info)),
        };
        let agent = self.agents.get(node.agent).ok_or_else(|| {
            CoreError::Internal(format!("no adapter for agent {}", node.agent.as_str()))
        })?;

        match Self::invoke_call(agent, node.intent, input, self.config.call_timeout).await {
            Ok((payload, metrics)) => {
                let excerpt = excerpt(&payload);
                let msg = envelope.finalize_ok(payload, metrics);
                if let Err(e) = task.apply_message(&msg) {
                    return Ok(StepOutcome::Failed(ErrorInfo::new(
                        ErrorKind::ToolError,
                        format!("malformed {} output: {}", msg.intent.as_str(), e),
                    )));
                }
                self.messages.append(&msg).await?;
                Ok(StepOutcome::Done(excerpt))
            }
            Err(info) => {
                let msg = envelope.finalize_error(info.clone(), CallMetrics::default());
                self.messages.append(&msg).await?;
                Ok(StepOutcome::Failed(info))
            }
        }
    }

    /// Fan the pending sections out to parallel drafting calls.
    ///
    /// All-or-nothing: when any section fails after retries, its sibling
    /// drafts are discarded and only the failing message reaches the
    /// audit log, so replaying the log reproduces the live fold exactly.
    async fn run_write_step(&self, task: &mut Task) -> Result<StepOutcome, CoreError> {
        let sections: Vec<Section> = if task.pending_sections.is_empty() {
            Section::ALL.to_vec()
        } else {
            task.pending_sections.clone()
        };
        let agent = self
            .agents
            .get(AgentId::Writing)
            .ok_or_else(|| CoreError::Internal("no adapter for agent writing".to_string()))?;

        type DraftResult = (Section, Message, Result<(Value, CallMetrics), ErrorInfo>);
        let mut set: JoinSet<DraftResult> = JoinSet::new();
        for section in sections {
            let input = DraftInput {
                task_id: task.id.clone(),
                section,
                topic: task.topic.clone(),
                references: task.references.clone(),
                stats: task.stats_report.clone(),
                revision_notes: task.revision_notes.clone(),
                round: task.revision_round,
            };
            let input = serde_json::to_value(&input).map_err(|e| {
                CoreError::Internal(format!("cannot encode draft input: {}", e))
            })?;
            let envelope = match Message::send(
                AgentId::Supervisor,
                AgentId::Writing,
                Intent::DraftSection,
                &task.id,
                input.clone(),
            ) {
                Ok(m) => m,
                Err(info) => return Ok(StepOutcome::Failed(info)),
            };
            let agent = agent.clone();
            let timeout = self.config.call_timeout;
            set.spawn(async move {
                let result =
                    Self::invoke_call(agent, Intent::DraftSection, input, timeout).await;
                (section, envelope, result)
            });
        }

        let mut results: Vec<DraftResult> = Vec::new();
        while let Some(joined) = set.join_next().await {
            let entry = joined
                .map_err(|e| CoreError::Internal(format!("draft task panicked: {}", e)))?;
            results.push(entry);
        }
        // JoinSet yields in completion order; fold in section order.
        results.sort_by_key(|(section, _, _)| *section);

        let mut failure: Option<(Section, Message, ErrorInfo)> = None;
        let mut successes: Vec<(Message, Value, CallMetrics)> = Vec::new();
        for (section, envelope, result) in results {
            match result {
                Ok((payload, metrics)) => successes.push((envelope, payload, metrics)),
                Err(info) => {
                    if failure.is_none() {
                        failure = Some((section, envelope, info));
                    }
                }
            }
        }
        if let Some((section, envelope, info)) = failure {
            tracing::warn!(
                "[Supervisor] draft {} failed, discarding sibling drafts: {}",
                section.as_str(),
                info
            );
            let msg = envelope.finalize_error(info.clone(), CallMetrics::default());
            self.messages.append(&msg).await?;
            return Ok(StepOutcome::Failed(info));
        }

        let drafted = successes.len();
        for (envelope, payload, metrics) in successes {
            let msg = envelope.finalize_ok(payload, metrics);
            if let Err(e) = task.apply_message(&msg) {
                return Ok(StepOutcome::Failed(ErrorInfo::new(
                    ErrorKind::ToolError,
                    format!("malformed draft output: {}", e),
                )));
            }
            self.messages.append(&msg).await?;
        }
        Ok(StepOutcome::Done(format!("{} sections drafted", drafted)))
    }

    /// Build a step's input from accumulated task state. A missing
    /// prerequisite is a `VALIDATION_ERROR`: the graph should never route
    /// into a step the state cannot feed.
    fn build_input(&self, step: StepId, task: &Task) -> Result<Value, ErrorInfo> {
        let encoded = match step {
            StepId::Literature => serde_json::to_value(SearchInput {
                task_id: task.id.clone(),
                query: task.topic.clone(),
                max_results: self.config.max_references,
            }),
            StepId::Stats => serde_json::to_value(AnalyzeInput {
                task_id: task.id.clone(),
                dataset: task.dataset.clone(),
            }),
            StepId::Write => {
                return Err(ErrorInfo::validation(
                    "write step builds per-section inputs",
                ))
            }
            StepId::Merge => serde_json::to_value(ComposeInput {
                task_id: task.id.clone(),
                topic: task.topic.clone(),
                sections: task.sections.clone(),
            }),
            StepId::Compliance => {
                let manuscript = task
                    .manuscript
                    .clone()
                    .ok_or_else(|| ErrorInfo::validation("no manuscript to evaluate"))?;
                serde_json::to_value(EvaluateInput {
                    task_id: task.id.clone(),
                    manuscript,
                    checklist: task.checklist,
                })
            }
            StepId::Revise => {
                let report = task
                    .compliance_report
                    .clone()
                    .ok_or_else(|| ErrorInfo::validation("no compliance report to plan from"))?;
                serde_json::to_value(PlanInput {
                    task_id: task.id.clone(),
                    compliance_report: report,
                })
            }
        };
        encoded.map_err(|e| {
            ErrorInfo::new(
                ErrorKind::ToolError,
                format!("cannot encode {} input: {}", step.as_str(), e),
            )
        })
    }

    /// One adapter invocation under the retry policy: classified failures
    /// retry up to their kind's attempt cap with the kind's backoff (or a
    /// provider-supplied hint). Each attempt runs under the per-call
    /// deadline, and a timed-out attempt doubles the deadline for the next
    /// one so slow-but-progressing calls get room to finish.
    async fn invoke_call(
        agent: Arc<dyn SubAgent>,
        intent: Intent,
        input: Value,
        call_timeout: Duration,
    ) -> Result<(Value, CallMetrics), ErrorInfo> {
        let mut attempts = 0u32;
        let mut deadline = call_timeout;
        loop {
            attempts += 1;
            let started = tokio::time::Instant::now();
            let outcome =
                tokio::time::timeout(deadline, agent.invoke(intent, input.clone())).await;
            let latency_ms = started.elapsed().as_millis() as u64;
            let info = match outcome {
                Ok(Ok(output)) => {
                    let mut metrics = output.metrics;
                    metrics.latency_ms = latency_ms;
                    return Ok((output.payload, metrics));
                }
                Ok(Err(err)) => err.info,
                Err(_) => ErrorInfo::new(
                    ErrorKind::Timeout,
                    format!(
                        "{} exceeded the {}ms call deadline",
                        intent.as_str(),
                        deadline.as_millis()
                    ),
                ),
            };
            if !contract::should_retry(&info, attempts) {
                tracing::warn!(
                    "[Supervisor] {} giving up after attempt {}: {}",
                    intent.as_str(),
                    attempts,
                    info
                );
                return Err(info);
            }
            if info.code == ErrorKind::Timeout {
                deadline *= 2;
            }
            let delay = contract::retry_delay(&info, attempts);
            tracing::warn!(
                "[Supervisor] {} attempt {} failed ({}), retrying in {:?}",
                intent.as_str(),
                attempts,
                info,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn excerpt(payload: &Value) -> String {
    let text = match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= EXCERPT_LEN {
        text
    } else {
        let cut: String = text.chars().take(EXCERPT_LEN).collect();
        format!("{}…", cut)
    }
}
