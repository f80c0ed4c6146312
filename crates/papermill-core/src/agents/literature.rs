//! Literature agent: wraps a literature-search backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{AgentId, Intent};
use crate::providers::LiteratureSearch;

use super::{parse_input, AgentError, AgentOutput, SubAgent};

/// Input payload for `search_literature`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchInput {
    pub task_id: String,
    pub query: String,
    pub max_results: u32,
}

pub struct LiteratureAgent {
    provider: Arc<dyn LiteratureSearch>,
}

impl LiteratureAgent {
    pub fn new(provider: Arc<dyn LiteratureSearch>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SubAgent for LiteratureAgent {
    fn id(&self) -> AgentId {
        AgentId::Literature
    }

    async fn invoke(&self, intent: Intent, input: Value) -> Result<AgentOutput, AgentError> {
        self.ensure_accepts(intent)?;
        let input: SearchInput = parse_input(input)?;
        if input.query.trim().is_empty() {
            return Err(AgentError::validation("search query is empty"));
        }
        if input.max_results == 0 {
            return Err(AgentError::validation("maxResults must be positive"));
        }

        let references = self
            .provider
            .search(&input.query, input.max_results)
            .await?;
        tracing::debug!(
            "[Literature] {} references for query '{}'",
            references.len(),
            input.query
        );

        let payload = serde_json::to_value(&references)
            .map_err(|e| AgentError::validation(format!("unserializable references: {}", e)))?;
        Ok(AgentOutput::new(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::demo::DemoLiterature;

    fn agent() -> LiteratureAgent {
        LiteratureAgent::new(Arc::new(DemoLiterature))
    }

    #[tokio::test]
    async fn search_returns_requested_count() {
        let input = serde_json::json!({
            "taskId": "t1",
            "query": "statin therapy outcomes",
            "maxResults": 5,
        });
        let out = agent()
            .invoke(Intent::SearchLiterature, input)
            .await
            .unwrap();
        let refs = out.payload.as_array().unwrap();
        assert_eq!(refs.len(), 5);
    }

    #[tokio::test]
    async fn empty_query_is_validation_error() {
        let input = serde_json::json!({
            "taskId": "t1",
            "query": "   ",
            "maxResults": 5,
        });
        let err = agent()
            .invoke(Intent::SearchLiterature, input)
            .await
            .unwrap_err();
        assert!(!err.info.recoverable);
    }

    #[tokio::test]
    async fn rejects_foreign_intent() {
        let input = serde_json::json!({ "taskId": "t1" });
        let err = agent().invoke(Intent::AnalyzeData, input).await.unwrap_err();
        assert!(err.info.message.contains("not registered"));
    }
}
