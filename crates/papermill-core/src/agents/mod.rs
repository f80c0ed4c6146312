//! Sub-agent adapters.
//!
//! Each adapter wraps one external capability behind the uniform
//! `invoke(intent, input) -> output` contract. Adapters are stateless
//! between calls and never touch task state; their only side effects are
//! the external calls themselves. Failures surface as classified
//! `AgentError`s that the Supervisor's retry loop understands.

pub mod compliance;
pub mod literature;
pub mod statistics;
pub mod writing;

pub use compliance::ComplianceAgent;
pub use literature::LiteratureAgent;
pub use statistics::StatisticsAgent;
pub use writing::WritingAgent;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::contract::{self, AgentId, ErrorInfo, Intent};
use crate::models::CallMetrics;
use crate::progress::ProgressBus;
use crate::providers::ProviderError;
use crate::templates::TemplateRepository;

/// Classified failure of one adapter invocation.
#[derive(Debug, Clone)]
pub struct AgentError {
    pub info: ErrorInfo,
}

impl AgentError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            info: ErrorInfo::validation(message),
        }
    }
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.info)
    }
}

impl std::error::Error for AgentError {}

impl From<ProviderError> for AgentError {
    fn from(err: ProviderError) -> Self {
        Self {
            info: contract::classify_error(&err),
        }
    }
}

/// Successful adapter result: serialized payload plus call accounting.
/// The Supervisor fills in wall-clock latency after the call returns.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub payload: Value,
    pub metrics: CallMetrics,
}

impl AgentOutput {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            metrics: CallMetrics::default(),
        }
    }
}

/// Uniform sub-agent contract.
#[async_trait]
pub trait SubAgent: Send + Sync {
    fn id(&self) -> AgentId;

    async fn invoke(&self, intent: Intent, input: Value) -> Result<AgentOutput, AgentError>;

    /// Reject intents not registered for this agent.
    fn ensure_accepts(&self, intent: Intent) -> Result<(), AgentError> {
        if contract::accepts(self.id(), intent) {
            Ok(())
        } else {
            Err(AgentError::validation(format!(
                "intent {} is not registered for agent {}",
                intent.as_str(),
                self.id().as_str()
            )))
        }
    }
}

/// Deserialize an input payload, mapping malformed input to
/// `VALIDATION_ERROR`.
pub(crate) fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T, AgentError> {
    serde_json::from_value(input)
        .map_err(|e| AgentError::validation(format!("malformed input payload: {}", e)))
}

/// The closed set of adapters the Supervisor dispatches to.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, Arc<dyn SubAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn SubAgent>) {
        self.agents.insert(agent.id(), agent);
    }

    pub fn get(&self, id: AgentId) -> Option<Arc<dyn SubAgent>> {
        self.agents.get(&id).cloned()
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    /// Registry wired to the deterministic demo providers. Token streams
    /// are forwarded onto `bus` during the writing step.
    pub fn demo(bus: ProgressBus) -> Self {
        use crate::providers::demo::{DemoEvaluator, DemoGenerator, DemoLiterature, DemoStats};

        let mut registry = Self::new();
        registry.register(Arc::new(LiteratureAgent::new(Arc::new(DemoLiterature))));
        registry.register(Arc::new(StatisticsAgent::new(Arc::new(DemoStats))));
        registry.register(Arc::new(WritingAgent::new(
            Arc::new(DemoGenerator),
            TemplateRepository::builtin(),
            Some(bus),
        )));
        registry.register(Arc::new(ComplianceAgent::new(Arc::new(DemoEvaluator))));
        registry
    }
}
