//! Task model — one pipeline run and its accumulated outputs.
//!
//! A task is created at submission and mutated only by the Supervisor
//! after each completed step. `apply_message` is the single fold that
//! merges a finalized `ok` message into the accumulated state; the
//! Supervisor uses it live and the audit-trail replay uses the exact same
//! fold, so replaying a task's message log reconstructs its content
//! deterministically.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{ErrorInfo, Intent};
use crate::error::CoreError;
use crate::graph::StepId;
use crate::models::compliance::{ChecklistType, ComplianceReport};
use crate::models::message::{Message, MessageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Revision,
    Completed,
    Failed,
    NeedsIntervention,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Revision => "REVISION",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::NeedsIntervention => "NEEDS_INTERVENTION",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "REVISION" => Some(Self::Revision),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "NEEDS_INTERVENTION" => Some(Self::NeedsIntervention),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::NeedsIntervention | Self::Cancelled
        )
    }
}

/// Manuscript sections, in IMRaD order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Introduction,
    Methods,
    Results,
    Discussion,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Introduction,
        Section::Methods,
        Section::Results,
        Section::Discussion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Introduction => "introduction",
            Self::Methods => "methods",
            Self::Results => "results",
            Self::Discussion => "discussion",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "introduction" => Some(Self::Introduction),
            "methods" => Some(Self::Methods),
            "results" => Some(Self::Results),
            "discussion" => Some(Self::Discussion),
            _ => None,
        }
    }

    pub fn heading(&self) -> &'static str {
        match self {
            Self::Introduction => "Introduction",
            Self::Methods => "Methods",
            Self::Results => "Results",
            Self::Discussion => "Discussion",
        }
    }
}

/// One literature search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: i32,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub relevance: f64,
}

/// One statistical test result from the external engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub test_name: String,
    pub statistic: f64,
    pub p_value: f64,
    pub confidence_interval: (f64, f64),
    pub effect_size: f64,
}

/// Accumulated output of the stats step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub analyses: Vec<Analysis>,
}

/// Output payload of one `draft_section` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDraft {
    pub section: Section,
    pub text: String,
}

/// Output payload of `compose_manuscript`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManuscriptOutput {
    pub manuscript: String,
}

/// Output payload of `plan_revision`: which sections to rewrite and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionPlan {
    pub failed_sections: Vec<Section>,
    pub notes: Vec<String>,
}

/// One paper-writing pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub owner_id: String,
    /// Name and version of the workflow graph driving this run.
    pub workflow: String,
    pub topic: String,
    /// Opaque study payload forwarded to the statistical engine.
    pub dataset: Value,
    pub checklist: ChecklistType,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepId>,
    pub revision_round: u32,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_report: Option<StatsReport>,
    #[serde(default)]
    pub sections: BTreeMap<Section, String>,
    /// Sections the next write step must (re)draft.
    #[serde(default)]
    pub pending_sections: Vec<Section>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manuscript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_report: Option<ComplianceReport>,
    /// Revision guidance: planner output plus user-submitted feedback.
    #[serde(default)]
    pub revision_notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: String,
        owner_id: String,
        workflow: String,
        topic: String,
        dataset: Value,
        checklist: ChecklistType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            workflow,
            topic,
            dataset,
            checklist,
            status: TaskStatus::Pending,
            current_step: None,
            revision_round: 0,
            references: Vec::new(),
            stats_report: None,
            sections: BTreeMap::new(),
            pending_sections: Section::ALL.to_vec(),
            manuscript: None,
            compliance_report: None,
            revision_notes: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge one finalized `ok` message into the accumulated state.
    ///
    /// Non-`ok` messages are ignored, so replaying a full audit log skips
    /// failed attempts the same way the live run did.
    pub fn apply_message(&mut self, msg: &Message) -> Result<(), CoreError> {
        if msg.status != MessageStatus::Ok {
            return Ok(());
        }
        let output = msg
            .output
            .as_ref()
            .ok_or_else(|| CoreError::Internal(format!("ok message {} has no output", msg.id)))?;

        match msg.intent {
            Intent::SearchLiterature => {
                self.references = serde_json::from_value(output.clone())?;
            }
            Intent::AnalyzeData => {
                self.stats_report = Some(serde_json::from_value(output.clone())?);
            }
            Intent::DraftSection => {
                let draft: SectionDraft = serde_json::from_value(output.clone())?;
                self.sections.insert(draft.section, draft.text);
                self.pending_sections.retain(|s| *s != draft.section);
            }
            Intent::ComposeManuscript => {
                let composed: ManuscriptOutput = serde_json::from_value(output.clone())?;
                self.manuscript = Some(composed.manuscript);
            }
            Intent::PlanRevision => {
                let plan: RevisionPlan = serde_json::from_value(output.clone())?;
                self.pending_sections = if plan.failed_sections.is_empty() {
                    Section::ALL.to_vec()
                } else {
                    plan.failed_sections
                };
                self.revision_notes.extend(plan.notes);
            }
            Intent::EvaluateChecklist => {
                self.compliance_report = Some(serde_json::from_value(output.clone())?);
            }
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Current compliance score, if the compliance step has run.
    pub fn compliance_score(&self) -> Option<f64> {
        self.compliance_report.as_ref().map(|r| r.overall_score())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::AgentId;

    fn task() -> Task {
        Task::new(
            "t-1".to_string(),
            "owner-1".to_string(),
            "imrad@1".to_string(),
            "Beta-blockers in heart failure".to_string(),
            serde_json::json!({}),
            ChecklistType::Consort,
        )
    }

    #[test]
    fn test_new_task_pends_all_sections() {
        let t = task();
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.pending_sections, Section::ALL.to_vec());
        assert_eq!(t.revision_round, 0);
    }

    #[test]
    fn test_apply_section_draft_clears_pending() {
        let mut t = task();
        let msg = Message::send(
            AgentId::Supervisor,
            AgentId::Writing,
            Intent::DraftSection,
            &t.id,
            serde_json::json!({}),
        )
        .unwrap()
        .finalize_ok(
            serde_json::to_value(SectionDraft {
                section: Section::Methods,
                text: "We conducted a randomized trial.".to_string(),
            })
            .unwrap(),
            Default::default(),
        );
        t.apply_message(&msg).unwrap();
        assert_eq!(
            t.sections.get(&Section::Methods).unwrap(),
            "We conducted a randomized trial."
        );
        assert!(!t.pending_sections.contains(&Section::Methods));
        assert_eq!(t.pending_sections.len(), 3);
    }

    #[test]
    fn test_apply_ignores_errored_messages() {
        let mut t = task();
        let msg = Message::send(
            AgentId::Supervisor,
            AgentId::Literature,
            Intent::SearchLiterature,
            &t.id,
            serde_json::json!({}),
        )
        .unwrap()
        .finalize_error(
            crate::contract::ErrorInfo::validation("bad query"),
            Default::default(),
        );
        t.apply_message(&msg).unwrap();
        assert!(t.references.is_empty());
    }

    #[test]
    fn test_revision_plan_resets_pending_sections() {
        let mut t = task();
        t.pending_sections.clear();
        let msg = Message::send(
            AgentId::Supervisor,
            AgentId::Writing,
            Intent::PlanRevision,
            &t.id,
            serde_json::json!({}),
        )
        .unwrap()
        .finalize_ok(
            serde_json::to_value(RevisionPlan {
                failed_sections: vec![Section::Results],
                notes: vec!["Report exact p-values".to_string()],
            })
            .unwrap(),
            Default::default(),
        );
        t.apply_message(&msg).unwrap();
        assert_eq!(t.pending_sections, vec![Section::Results]);
        assert_eq!(t.revision_notes.len(), 1);
    }
}
