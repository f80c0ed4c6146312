//! External service interfaces consumed by the sub-agent adapters.
//!
//! The core never talks to a search index, a statistics engine, or an LLM
//! directly; it goes through these traits so deployments can plug in real
//! integrations and tests can script failures. The deterministic in-process
//! implementations live in [`demo`].

pub mod demo;

use std::pin::Pin;

use async_trait::async_trait;
use serde_json::Value;
use tokio_stream::Stream;

use crate::models::{Analysis, ChecklistType, ComplianceItem, Reference};

/// Failure surface of every external provider. The message contract maps
/// these onto the retryable error taxonomy via `contract::classify_error`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("tool failure: {0}")]
    Tool(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("generation failure: {0}")]
    Generation(String),
}

/// Literature search backend.
#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<Reference>, ProviderError>;
}

/// Statistical computation backend.
#[async_trait]
pub trait StatsEngine: Send + Sync {
    async fn analyze(&self, test_name: &str, data: &Value) -> Result<Analysis, ProviderError>;
}

/// Token stream produced by a streaming generator.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Completed generation with token accounting, when the backend reports it.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, context: &str) -> Result<Generation, ProviderError>;

    /// Streaming variant. The default wraps `generate` and yields the full
    /// text as a single token, so non-streaming backends still work.
    async fn generate_stream(
        &self,
        prompt: &str,
        context: &str,
    ) -> Result<TokenStream, ProviderError> {
        let generation = self.generate(prompt, context).await?;
        Ok(Box::pin(tokio_stream::once(Ok(generation.text))))
    }
}

/// Reporting-guideline checklist evaluator.
#[async_trait]
pub trait ChecklistEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        manuscript: &str,
        checklist_type: ChecklistType,
    ) -> Result<Vec<ComplianceItem>, ProviderError>;
}
