//! Writing agent: section drafting, manuscript assembly, revision
//! planning. Drafting consumes the generator's token stream and forwards
//! tokens onto the progress bus when one is attached.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::StreamExt;

use crate::contract::{AgentId, Intent};
use crate::models::{
    ComplianceReport, ItemStatus, ManuscriptOutput, Reference, RevisionPlan, Section, SectionDraft,
    StatsReport,
};
use crate::progress::{ProgressBus, ProgressEvent};
use crate::providers::TextGenerator;
use crate::templates::TemplateRepository;

use super::{parse_input, AgentError, AgentOutput, SubAgent};

/// Input payload for `draft_section`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftInput {
    pub task_id: String,
    pub section: Section,
    pub topic: String,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub stats: Option<StatsReport>,
    #[serde(default)]
    pub revision_notes: Vec<String>,
    #[serde(default)]
    pub round: u32,
}

/// Input payload for `compose_manuscript`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeInput {
    pub task_id: String,
    pub topic: String,
    pub sections: BTreeMap<Section, String>,
}

/// Input payload for `plan_revision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInput {
    pub task_id: String,
    pub compliance_report: ComplianceReport,
}

/// How many references a drafting prompt cites at most.
const PROMPT_REFERENCE_CAP: usize = 8;

pub struct WritingAgent {
    generator: Arc<dyn TextGenerator>,
    templates: TemplateRepository,
    bus: Option<ProgressBus>,
}

impl WritingAgent {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        templates: TemplateRepository,
        bus: Option<ProgressBus>,
    ) -> Self {
        Self {
            generator,
            templates,
            bus,
        }
    }

    async fn draft(&self, input: DraftInput) -> Result<AgentOutput, AgentError> {
        if input.topic.trim().is_empty() {
            return Err(AgentError::validation("topic is empty"));
        }
        let prompt = self.drafting_prompt(&input)?;

        let mut stream = self.generator.generate_stream(&prompt, &input.topic).await?;
        let mut text = String::new();
        let mut output_tokens = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            output_tokens += 1;
            if let Some(bus) = &self.bus {
                bus.emit(
                    &input.task_id,
                    ProgressEvent::Token {
                        text: chunk.clone(),
                    },
                )
                .await;
            }
            text.push_str(&chunk);
        }
        if text.trim().is_empty() {
            return Err(AgentError {
                info: crate::contract::ErrorInfo::new(
                    crate::contract::ErrorKind::LlmError,
                    format!("empty draft for section {}", input.section.as_str()),
                ),
            });
        }
        tracing::debug!(
            "[Writing] drafted {} ({} tokens)",
            input.section.as_str(),
            output_tokens
        );

        let draft = SectionDraft {
            section: input.section,
            text,
        };
        let payload = serde_json::to_value(&draft)
            .map_err(|e| AgentError::validation(format!("unserializable draft: {}", e)))?;
        let mut out = AgentOutput::new(payload);
        out.metrics.input_tokens = Some(prompt.split_whitespace().count() as u64);
        out.metrics.output_tokens = Some(output_tokens);
        Ok(out)
    }

    fn drafting_prompt(&self, input: &DraftInput) -> Result<String, AgentError> {
        let references = input
            .references
            .iter()
            .take(PROMPT_REFERENCE_CAP)
            .map(|r| format!("- {} ({}): {}", r.authors.join(", "), r.year, r.title))
            .collect::<Vec<_>>()
            .join("\n");
        let stats = input
            .stats
            .as_ref()
            .map(|report| {
                report
                    .analyses
                    .iter()
                    .map(|a| {
                        format!(
                            "- {}: statistic {:.3}, p = {:.3}, 95% CI [{:.3}, {:.3}], effect {:.3}",
                            a.test_name,
                            a.statistic,
                            a.p_value,
                            a.confidence_interval.0,
                            a.confidence_interval.1,
                            a.effect_size
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        let revision = if !input.revision_notes.is_empty() {
            let mut vars = HashMap::new();
            vars.insert("round", input.round.max(1).to_string());
            vars.insert("notes", input.revision_notes.join("\n"));
            self.templates
                .render("revision.preamble", &vars)
                .map_err(|e| AgentError::validation(e.to_string()))?
        } else {
            String::new()
        };

        let mut vars = HashMap::new();
        vars.insert("topic", input.topic.clone());
        vars.insert("references", references);
        vars.insert("stats", stats);
        vars.insert("revision", revision);
        self.templates
            .render(&format!("draft.{}", input.section.as_str()), &vars)
            .map_err(|e| AgentError::validation(e.to_string()))
    }

    /// Deterministic assembly; no model call involved.
    fn compose(&self, input: ComposeInput) -> Result<AgentOutput, AgentError> {
        for section in Section::ALL {
            if !input.sections.contains_key(&section) {
                return Err(AgentError::validation(format!(
                    "cannot compose manuscript: section {} is missing",
                    section.as_str()
                )));
            }
        }
        let mut manuscript = format!("# {}\n", input.topic);
        for section in Section::ALL {
            manuscript.push_str(&format!(
                "\n## {}\n{}\n",
                section.heading(),
                input.sections[&section].trim_end()
            ));
        }
        let payload = serde_json::to_value(ManuscriptOutput { manuscript })
            .map_err(|e| AgentError::validation(format!("unserializable manuscript: {}", e)))?;
        Ok(AgentOutput::new(payload))
    }

    /// Turn a compliance report into a revision plan: which sections to
    /// redraft and the reviewer notes to feed back into their prompts.
    fn plan_revision(&self, input: PlanInput) -> Result<AgentOutput, AgentError> {
        let report = input.compliance_report;
        let failed_sections = report.failed_sections();
        let notes = report
            .items
            .iter()
            .filter(|item| item.status != ItemStatus::Pass)
            .map(|item| {
                let finding = item.finding.as_deref().unwrap_or("not addressed");
                match &item.suggestion {
                    Some(suggestion) => {
                        format!("item {}: {}; {}", item.item_id, finding, suggestion)
                    }
                    None => format!("item {}: {}", item.item_id, finding),
                }
            })
            .collect::<Vec<_>>();
        let plan = RevisionPlan {
            failed_sections,
            notes,
        };
        let payload = serde_json::to_value(&plan)
            .map_err(|e| AgentError::validation(format!("unserializable plan: {}", e)))?;
        Ok(AgentOutput::new(payload))
    }
}

#[async_trait]
impl SubAgent for WritingAgent {
    fn id(&self) -> AgentId {
        AgentId::Writing
    }

    async fn invoke(&self, intent: Intent, input: Value) -> Result<AgentOutput, AgentError> {
        self.ensure_accepts(intent)?;
        match intent {
            Intent::DraftSection => self.draft(parse_input(input)?).await,
            Intent::ComposeManuscript => self.compose(parse_input(input)?),
            Intent::PlanRevision => self.plan_revision(parse_input(input)?),
            _ => unreachable!("intent registry admits only writing intents"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChecklistType, ComplianceItem};
    use crate::providers::demo::DemoGenerator;

    fn agent() -> WritingAgent {
        WritingAgent::new(
            Arc::new(DemoGenerator),
            TemplateRepository::builtin(),
            None,
        )
    }

    fn draft_input(section: Section) -> Value {
        serde_json::to_value(DraftInput {
            task_id: "t1".into(),
            section,
            topic: "Aspirin and stroke prevention".into(),
            references: Vec::new(),
            stats: None,
            revision_notes: Vec::new(),
            round: 0,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn drafts_a_section_with_token_accounting() {
        let out = agent()
            .invoke(Intent::DraftSection, draft_input(Section::Methods))
            .await
            .unwrap();
        let draft: SectionDraft = serde_json::from_value(out.payload).unwrap();
        assert_eq!(draft.section, Section::Methods);
        assert!(!draft.text.is_empty());
        assert!(out.metrics.output_tokens.unwrap() > 0);
    }

    #[tokio::test]
    async fn compose_requires_all_sections() {
        let mut sections = BTreeMap::new();
        sections.insert(Section::Introduction, "intro".to_string());
        let input = serde_json::to_value(ComposeInput {
            task_id: "t1".into(),
            topic: "T".into(),
            sections,
        })
        .unwrap();
        let err = agent()
            .invoke(Intent::ComposeManuscript, input)
            .await
            .unwrap_err();
        assert!(err.info.message.contains("missing"));
    }

    #[tokio::test]
    async fn compose_orders_sections_imrad() {
        let mut sections = BTreeMap::new();
        for section in Section::ALL {
            sections.insert(section, format!("{} text", section.as_str()));
        }
        let input = serde_json::to_value(ComposeInput {
            task_id: "t1".into(),
            topic: "Topic".into(),
            sections,
        })
        .unwrap();
        let out = agent()
            .invoke(Intent::ComposeManuscript, input)
            .await
            .unwrap();
        let output: ManuscriptOutput = serde_json::from_value(out.payload).unwrap();
        let intro = output.manuscript.find("## Introduction").unwrap();
        let methods = output.manuscript.find("## Methods").unwrap();
        let results = output.manuscript.find("## Results").unwrap();
        let discussion = output.manuscript.find("## Discussion").unwrap();
        assert!(intro < methods && methods < results && results < discussion);
        assert!(output.manuscript.starts_with("# Topic\n"));
    }

    #[tokio::test]
    async fn plan_revision_collects_failing_sections_and_notes() {
        let report = ComplianceReport::new(
            ChecklistType::Consort,
            vec![
                ComplianceItem {
                    item_id: "3a".into(),
                    description: "Trial design".into(),
                    status: ItemStatus::Fail,
                    finding: Some("design not described".into()),
                    suggestion: Some("describe randomisation".into()),
                    section: Some(Section::Methods),
                },
                ComplianceItem {
                    item_id: "20".into(),
                    description: "Limitations".into(),
                    status: ItemStatus::Pass,
                    finding: None,
                    suggestion: None,
                    section: Some(Section::Discussion),
                },
            ],
        );
        let input = serde_json::to_value(PlanInput {
            task_id: "t1".into(),
            compliance_report: report,
        })
        .unwrap();
        let out = agent().invoke(Intent::PlanRevision, input).await.unwrap();
        let plan: RevisionPlan = serde_json::from_value(out.payload).unwrap();
        assert_eq!(plan.failed_sections, vec![Section::Methods]);
        assert_eq!(plan.notes.len(), 1);
        assert!(plan.notes[0].contains("3a"));
    }
}
