//! End-to-end pipeline runs against an in-memory database, with demo
//! providers or scripted ones where a scenario needs controlled failures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use papermill_core::agents::{
    AgentRegistry, ComplianceAgent, LiteratureAgent, StatisticsAgent, WritingAgent,
};
use papermill_core::contract::{ErrorKind, Intent};
use papermill_core::db::Database;
use papermill_core::models::{
    Analysis, ChecklistType, ComplianceItem, ItemStatus, MessageStatus, Section, Task, TaskStatus,
};
use papermill_core::progress::ProgressBus;
use papermill_core::providers::demo::{DemoEvaluator, DemoGenerator, DemoLiterature, DemoStats};
use papermill_core::providers::{
    ChecklistEvaluator, Generation, ProviderError, StatsEngine, TextGenerator, TokenStream,
};
use papermill_core::state::{EngineInner, NewTask};
use papermill_core::supervisor::SupervisorConfig;
use papermill_core::templates::TemplateRepository;

fn dataset() -> Value {
    json!({
        "tests": [
            { "name": "t-test", "data": { "groupA": [1, 2, 3], "groupB": [2, 3, 4] } },
        ]
    })
}

fn new_task() -> NewTask {
    NewTask {
        owner_id: "researcher-1".to_string(),
        topic: "Aspirin for secondary stroke prevention".to_string(),
        dataset: dataset(),
        checklist: ChecklistType::Consort,
    }
}

fn registry_with(
    stats: Arc<dyn StatsEngine>,
    generator: Arc<dyn TextGenerator>,
    evaluator: Arc<dyn ChecklistEvaluator>,
    bus: ProgressBus,
) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(LiteratureAgent::new(Arc::new(DemoLiterature))));
    registry.register(Arc::new(StatisticsAgent::new(stats)));
    registry.register(Arc::new(WritingAgent::new(
        generator,
        TemplateRepository::builtin(),
        Some(bus),
    )));
    registry.register(Arc::new(ComplianceAgent::new(evaluator)));
    registry
}

// ─── Scenario: happy path ─────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_completes_without_revision() {
    let db = Database::open_in_memory().unwrap();
    let engine = EngineInner::demo(db, SupervisorConfig::default()).unwrap();

    let task = engine.create_task(new_task()).await.unwrap();
    engine.wait(&task.id).await;

    let task = engine.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.revision_round, 0);
    assert_eq!(task.references.len(), 12);
    assert_eq!(task.sections.len(), 4);
    let manuscript = task.manuscript.as_deref().unwrap();
    assert!(manuscript.contains("## Methods"));
    assert!(manuscript.contains("p ="));
    assert!(task.compliance_score().unwrap() >= 0.8);
    assert!(task.last_error.is_none());

    // literature + stats + 4 drafts + merge + compliance
    let messages = engine.list_messages(&task.id).await.unwrap();
    assert_eq!(messages.len(), 8);
    assert!(messages.iter().all(|m| m.status == MessageStatus::Ok));
    // seq is contiguous from 1
    for (i, msg) in messages.iter().enumerate() {
        assert_eq!(msg.seq, i as i64 + 1);
    }
}

#[tokio::test]
async fn audit_log_replay_reconstructs_task_state() {
    let db = Database::open_in_memory().unwrap();
    let engine = EngineInner::demo(db, SupervisorConfig::default()).unwrap();

    let created = engine.create_task(new_task()).await.unwrap();
    engine.wait(&created.id).await;
    let live = engine.get_task(&created.id).await.unwrap();
    let messages = engine.list_messages(&created.id).await.unwrap();

    let mut replayed = Task::new(
        created.id.clone(),
        created.owner_id.clone(),
        created.workflow.clone(),
        created.topic.clone(),
        created.dataset.clone(),
        created.checklist,
    );
    for msg in &messages {
        replayed.apply_message(msg).unwrap();
    }

    assert_eq!(replayed.references, live.references);
    assert_eq!(replayed.sections, live.sections);
    assert_eq!(replayed.manuscript, live.manuscript);
    assert_eq!(
        replayed.compliance_score().unwrap(),
        live.compliance_score().unwrap()
    );
    assert!(replayed.pending_sections.is_empty());
}

// ─── Scenario: revision loop exhaustion ───────────────────────────────────

/// Always scores 3 of 5 items as passing (0.6, below the 0.8 gate).
struct AlwaysLow;

#[async_trait]
impl ChecklistEvaluator for AlwaysLow {
    async fn evaluate(
        &self,
        _manuscript: &str,
        _checklist_type: ChecklistType,
    ) -> Result<Vec<ComplianceItem>, ProviderError> {
        let mut items = Vec::new();
        for (id, status, section) in [
            ("1a", ItemStatus::Pass, Section::Introduction),
            ("3a", ItemStatus::Pass, Section::Methods),
            ("13a", ItemStatus::Pass, Section::Results),
            ("17a", ItemStatus::Fail, Section::Results),
            ("20", ItemStatus::Fail, Section::Discussion),
        ] {
            items.push(ComplianceItem {
                item_id: id.to_string(),
                description: format!("item {}", id),
                status,
                finding: Some("insufficient detail".to_string()),
                suggestion: Some("expand this item".to_string()),
                section: Some(section),
            });
        }
        Ok(items)
    }
}

#[tokio::test(start_paused = true)]
async fn persistent_low_compliance_exhausts_revisions() {
    let db = Database::open_in_memory().unwrap();
    let bus = ProgressBus::new();
    let registry = registry_with(
        Arc::new(DemoStats),
        Arc::new(DemoGenerator),
        Arc::new(AlwaysLow),
        bus.clone(),
    );
    let engine = EngineInner::new(db, registry, bus, SupervisorConfig::default()).unwrap();

    let task = engine.create_task(new_task()).await.unwrap();
    engine.wait(&task.id).await;

    let task = engine.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::NeedsIntervention);
    assert_eq!(task.revision_round, 3);
    // Revision guidance from each failed evaluation accumulated.
    assert!(!task.revision_notes.is_empty());

    // One manuscript version per evaluation: the initial compose plus
    // one per completed revision cycle.
    let messages = engine.list_messages(&task.id).await.unwrap();
    let composes = messages
        .iter()
        .filter(|m| m.intent == Intent::ComposeManuscript)
        .count();
    assert_eq!(composes, 3);
    let evaluations = messages
        .iter()
        .filter(|m| m.intent == Intent::EvaluateChecklist)
        .count();
    assert_eq!(evaluations, 3);
    let plans = messages
        .iter()
        .filter(|m| m.intent == Intent::PlanRevision)
        .count();
    assert_eq!(plans, 2);

    // Revision drafts only touched the failing sections.
    let drafts = messages
        .iter()
        .filter(|m| m.intent == Intent::DraftSection)
        .count();
    assert_eq!(drafts, 4 + 2 * 2);
}

#[tokio::test(start_paused = true)]
async fn intervention_requires_explicit_round_reset() {
    let db = Database::open_in_memory().unwrap();
    let bus = ProgressBus::new();
    let registry = registry_with(
        Arc::new(DemoStats),
        Arc::new(DemoGenerator),
        Arc::new(AlwaysLow),
        bus.clone(),
    );
    let engine = EngineInner::new(db, registry, bus, SupervisorConfig::default()).unwrap();

    let task = engine.create_task(new_task()).await.unwrap();
    engine.wait(&task.id).await;

    let err = engine
        .submit_revision(&task.id, "tighten the results section", false)
        .await
        .unwrap_err();
    assert!(matches!(err, papermill_core::CoreError::Conflict(_)));

    let resumed = engine
        .submit_revision(&task.id, "tighten the results section", true)
        .await
        .unwrap();
    assert_eq!(resumed.status, TaskStatus::Revision);
    assert_eq!(resumed.revision_round, 0);
    engine.wait(&task.id).await;
    let done = engine.get_task(&task.id).await.unwrap();
    // Still evaluated by the same strict evaluator, so it exhausts again.
    assert_eq!(done.status, TaskStatus::NeedsIntervention);
}

// ─── Scenario: timeout taxonomy ───────────────────────────────────────────

/// Statistical backend that reports a deadline failure on every call.
struct TimingOut {
    calls: AtomicU32,
}

#[async_trait]
impl StatsEngine for TimingOut {
    async fn analyze(&self, _test_name: &str, _data: &Value) -> Result<Analysis, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Timeout("solver did not converge".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn repeated_timeouts_fail_the_task() {
    let db = Database::open_in_memory().unwrap();
    let bus = ProgressBus::new();
    let stats = Arc::new(TimingOut {
        calls: AtomicU32::new(0),
    });
    let registry = registry_with(
        stats.clone(),
        Arc::new(DemoGenerator),
        Arc::new(DemoEvaluator),
        bus.clone(),
    );
    let engine = EngineInner::new(db, registry, bus, SupervisorConfig::default()).unwrap();

    let task = engine.create_task(new_task()).await.unwrap();
    engine.wait(&task.id).await;

    let task = engine.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.last_error.as_ref().unwrap();
    assert_eq!(error.code, ErrorKind::Timeout);
    // TIMEOUT allows two attempts total.
    assert_eq!(stats.calls.load(Ordering::SeqCst), 2);
    // Literature finished before the failure and its fold survived.
    assert_eq!(task.references.len(), 12);

    // The audit log carries one ok literature message and one error
    // stats message; retries never produce extra envelopes.
    let messages = engine.list_messages(&task.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].status, MessageStatus::Error);
    assert_eq!(
        messages[1].error.as_ref().unwrap().code,
        ErrorKind::Timeout
    );
}

/// Fails twice with a transient tool error, then behaves like the demo.
struct FlakyStats {
    calls: AtomicU32,
}

#[async_trait]
impl StatsEngine for FlakyStats {
    async fn analyze(&self, test_name: &str, data: &Value) -> Result<Analysis, ProviderError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(ProviderError::Tool("transient backend error".to_string()));
        }
        DemoStats.analyze(test_name, data).await
    }
}

#[tokio::test(start_paused = true)]
async fn transient_tool_errors_are_retried_to_success() {
    let db = Database::open_in_memory().unwrap();
    let bus = ProgressBus::new();
    let stats = Arc::new(FlakyStats {
        calls: AtomicU32::new(0),
    });
    let registry = registry_with(
        stats.clone(),
        Arc::new(DemoGenerator),
        Arc::new(DemoEvaluator),
        bus.clone(),
    );
    let engine = EngineInner::new(db, registry, bus, SupervisorConfig::default()).unwrap();

    let task = engine.create_task(new_task()).await.unwrap();
    engine.wait(&task.id).await;

    let task = engine.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(stats.calls.load(Ordering::SeqCst), 3);
    // Only the final, successful attempt is recorded.
    let messages = engine.list_messages(&task.id).await.unwrap();
    assert!(messages.iter().all(|m| m.status == MessageStatus::Ok));
}

// ─── Scenario: all-or-nothing parallel drafting ───────────────────────────

/// Generator that cannot draft the Methods section.
struct NoMethods;

#[async_trait]
impl TextGenerator for NoMethods {
    async fn generate(&self, prompt: &str, context: &str) -> Result<Generation, ProviderError> {
        if prompt.contains("Methods section") {
            return Err(ProviderError::Generation("refused".to_string()));
        }
        DemoGenerator.generate(prompt, context).await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        context: &str,
    ) -> Result<TokenStream, ProviderError> {
        if prompt.contains("Methods section") {
            return Err(ProviderError::Generation("refused".to_string()));
        }
        DemoGenerator.generate_stream(prompt, context).await
    }
}

#[tokio::test(start_paused = true)]
async fn failed_section_discards_sibling_drafts() {
    let db = Database::open_in_memory().unwrap();
    let bus = ProgressBus::new();
    let registry = registry_with(
        Arc::new(DemoStats),
        Arc::new(NoMethods),
        Arc::new(DemoEvaluator),
        bus.clone(),
    );
    let engine = EngineInner::new(db, registry, bus, SupervisorConfig::default()).unwrap();

    let task = engine.create_task(new_task()).await.unwrap();
    engine.wait(&task.id).await;

    let task = engine.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.last_error.as_ref().unwrap().code, ErrorKind::LlmError);
    // No partial section fold: the three successful siblings were voided.
    assert!(task.sections.is_empty());
    assert_eq!(task.pending_sections.len(), 4);

    // Exactly one draft message in the log, and it is the failure.
    let messages = engine.list_messages(&task.id).await.unwrap();
    let drafts: Vec<_> = messages
        .iter()
        .filter(|m| m.intent == Intent::DraftSection)
        .collect();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].status, MessageStatus::Error);
}

// ─── Scenario: cancellation at a step boundary ────────────────────────────

/// Signals when analysis begins, then blocks until released.
struct GatedStats {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl StatsEngine for GatedStats {
    async fn analyze(&self, test_name: &str, data: &Value) -> Result<Analysis, ProviderError> {
        self.entered.notify_one();
        self.release.notified().await;
        DemoStats.analyze(test_name, data).await
    }
}

#[tokio::test]
async fn cancel_lands_at_the_next_step_boundary() {
    let db = Database::open_in_memory().unwrap();
    let bus = ProgressBus::new();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let registry = registry_with(
        Arc::new(GatedStats {
            entered: entered.clone(),
            release: release.clone(),
        }),
        Arc::new(DemoGenerator),
        Arc::new(DemoEvaluator),
        bus.clone(),
    );
    let engine = EngineInner::new(db, registry, bus, SupervisorConfig::default()).unwrap();

    let task = engine.create_task(new_task()).await.unwrap();
    entered.notified().await;
    engine.cancel(&task.id).await.unwrap();
    release.notify_one();
    engine.wait(&task.id).await;

    let task = engine.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    // The in-flight stats call ran to completion and its fold stuck.
    assert!(task.stats_report.is_some());
    // Nothing past the boundary ran.
    assert!(task.sections.is_empty());
    assert!(task.manuscript.is_none());
}

#[tokio::test]
async fn cancel_without_live_run_is_a_conflict() {
    let db = Database::open_in_memory().unwrap();
    let engine = EngineInner::demo(db, SupervisorConfig::default()).unwrap();

    let task = engine.create_task(new_task()).await.unwrap();
    engine.wait(&task.id).await;

    let err = engine.cancel(&task.id).await.unwrap_err();
    assert!(matches!(err, papermill_core::CoreError::Conflict(_)));
}

// ─── Input validation ─────────────────────────────────────────────────────

#[tokio::test]
async fn empty_topic_is_rejected_before_any_run() {
    let db = Database::open_in_memory().unwrap();
    let engine = EngineInner::demo(db, SupervisorConfig::default()).unwrap();

    let err = engine
        .create_task(NewTask {
            owner_id: "researcher-1".to_string(),
            topic: "  ".to_string(),
            dataset: dataset(),
            checklist: ChecklistType::Consort,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, papermill_core::CoreError::BadRequest(_)));
}

#[tokio::test]
async fn dataset_without_tests_fails_validation_without_retries() {
    let db = Database::open_in_memory().unwrap();
    let engine = EngineInner::demo(db, SupervisorConfig::default()).unwrap();

    let task = engine
        .create_task(NewTask {
            owner_id: "researcher-1".to_string(),
            topic: "Aspirin for secondary stroke prevention".to_string(),
            dataset: json!({ "tests": [] }),
            checklist: ChecklistType::Consort,
        })
        .await
        .unwrap();
    engine.wait(&task.id).await;

    let task = engine.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.last_error.as_ref().unwrap().code,
        ErrorKind::ValidationError
    );
}
