//! Statistics agent: runs the statistical tests a dataset declares.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{AgentId, Intent};
use crate::models::StatsReport;
use crate::providers::StatsEngine;

use super::{parse_input, AgentError, AgentOutput, SubAgent};

/// Input payload for `analyze_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeInput {
    pub task_id: String,
    pub dataset: Value,
}

/// Shape the dataset payload must declare: a list of named tests, each
/// with its own data slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    pub name: String,
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct DatasetTests {
    #[serde(default)]
    tests: Vec<TestSpec>,
}

pub struct StatisticsAgent {
    provider: Arc<dyn StatsEngine>,
}

impl StatisticsAgent {
    pub fn new(provider: Arc<dyn StatsEngine>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SubAgent for StatisticsAgent {
    fn id(&self) -> AgentId {
        AgentId::Statistics
    }

    async fn invoke(&self, intent: Intent, input: Value) -> Result<AgentOutput, AgentError> {
        self.ensure_accepts(intent)?;
        let input: AnalyzeInput = parse_input(input)?;
        let dataset: DatasetTests = serde_json::from_value(input.dataset)
            .map_err(|e| AgentError::validation(format!("malformed dataset: {}", e)))?;
        if dataset.tests.is_empty() {
            return Err(AgentError::validation("dataset declares no tests"));
        }

        let mut analyses = Vec::with_capacity(dataset.tests.len());
        for test in &dataset.tests {
            let analysis = self.provider.analyze(&test.name, &test.data).await?;
            analyses.push(analysis);
        }
        tracing::debug!("[Statistics] ran {} analyses", analyses.len());

        let report = StatsReport { analyses };
        let payload = serde_json::to_value(&report)
            .map_err(|e| AgentError::validation(format!("unserializable report: {}", e)))?;
        Ok(AgentOutput::new(payload))
    }
}
