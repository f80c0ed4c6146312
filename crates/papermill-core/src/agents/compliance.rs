//! Compliance agent: evaluates a manuscript against a reporting
//! checklist.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{AgentId, Intent};
use crate::models::{ChecklistType, ComplianceReport};
use crate::providers::ChecklistEvaluator;

use super::{parse_input, AgentError, AgentOutput, SubAgent};

/// Input payload for `evaluate_checklist`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateInput {
    pub task_id: String,
    pub manuscript: String,
    pub checklist: ChecklistType,
}

pub struct ComplianceAgent {
    provider: Arc<dyn ChecklistEvaluator>,
}

impl ComplianceAgent {
    pub fn new(provider: Arc<dyn ChecklistEvaluator>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SubAgent for ComplianceAgent {
    fn id(&self) -> AgentId {
        AgentId::Compliance
    }

    async fn invoke(&self, intent: Intent, input: Value) -> Result<AgentOutput, AgentError> {
        self.ensure_accepts(intent)?;
        let input: EvaluateInput = parse_input(input)?;
        if input.manuscript.trim().is_empty() {
            return Err(AgentError::validation("manuscript is empty"));
        }

        let items = self
            .provider
            .evaluate(&input.manuscript, input.checklist)
            .await?;
        let report = ComplianceReport::new(input.checklist, items);
        tracing::debug!(
            "[Compliance] {} score {:.2}",
            input.checklist.as_str(),
            report.overall_score()
        );

        let payload = serde_json::to_value(&report)
            .map_err(|e| AgentError::validation(format!("unserializable report: {}", e)))?;
        Ok(AgentOutput::new(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::demo::DemoEvaluator;

    fn agent() -> ComplianceAgent {
        ComplianceAgent::new(Arc::new(DemoEvaluator))
    }

    #[tokio::test]
    async fn complete_manuscript_scores_high() {
        let manuscript =
            "# T\n\n## Introduction\nx\n\n## Methods\nx\n\n## Results\np = 0.03\n\n## Discussion\nx\n";
        let input = serde_json::json!({
            "taskId": "t1",
            "manuscript": manuscript,
            "checklist": "consort",
        });
        let out = agent()
            .invoke(Intent::EvaluateChecklist, input)
            .await
            .unwrap();
        let report: ComplianceReport = serde_json::from_value(out.payload).unwrap();
        assert!(report.overall_score() >= 0.99);
    }

    #[tokio::test]
    async fn empty_manuscript_is_validation_error() {
        let input = serde_json::json!({
            "taskId": "t1",
            "manuscript": "",
            "checklist": "consort",
        });
        let err = agent()
            .invoke(Intent::EvaluateChecklist, input)
            .await
            .unwrap_err();
        assert!(!err.info.recoverable);
    }
}
