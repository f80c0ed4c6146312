//! Inter-agent message contract.
//!
//! Defines the closed set of agents and intents, the static
//! `(receiver, intent)` registry, the error taxonomy with its per-kind
//! retry policy, and classification of external provider failures.
//!
//! Everything here is pure: envelope construction and retry decisions do
//! not touch the store. Persistence of finalized envelopes is the
//! Supervisor's job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::providers::ProviderError;

// ─── Agents & Intents ─────────────────────────────────────────────────────

/// Closed set of pipeline participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    Supervisor,
    Literature,
    Statistics,
    Writing,
    Compliance,
}

impl AgentId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::Literature => "literature",
            Self::Statistics => "statistics",
            Self::Writing => "writing",
            Self::Compliance => "compliance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "supervisor" => Some(Self::Supervisor),
            "literature" => Some(Self::Literature),
            "statistics" => Some(Self::Statistics),
            "writing" => Some(Self::Writing),
            "compliance" => Some(Self::Compliance),
            _ => None,
        }
    }
}

/// Closed set of operations a sub-agent can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    SearchLiterature,
    AnalyzeData,
    DraftSection,
    ComposeManuscript,
    PlanRevision,
    EvaluateChecklist,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchLiterature => "search_literature",
            Self::AnalyzeData => "analyze_data",
            Self::DraftSection => "draft_section",
            Self::ComposeManuscript => "compose_manuscript",
            Self::PlanRevision => "plan_revision",
            Self::EvaluateChecklist => "evaluate_checklist",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "search_literature" => Some(Self::SearchLiterature),
            "analyze_data" => Some(Self::AnalyzeData),
            "draft_section" => Some(Self::DraftSection),
            "compose_manuscript" => Some(Self::ComposeManuscript),
            "plan_revision" => Some(Self::PlanRevision),
            "evaluate_checklist" => Some(Self::EvaluateChecklist),
            _ => None,
        }
    }
}

/// The static intent registry: which intents each agent accepts.
pub fn registered_intents(agent: AgentId) -> &'static [Intent] {
    match agent {
        AgentId::Supervisor => &[],
        AgentId::Literature => &[Intent::SearchLiterature],
        AgentId::Statistics => &[Intent::AnalyzeData],
        AgentId::Writing => &[
            Intent::DraftSection,
            Intent::ComposeManuscript,
            Intent::PlanRevision,
        ],
        AgentId::Compliance => &[Intent::EvaluateChecklist],
    }
}

/// Whether `receiver` accepts `intent`.
pub fn accepts(receiver: AgentId, intent: Intent) -> bool {
    registered_intents(receiver).contains(&intent)
}

/// Validate the registry invariants once at startup: every intent is
/// registered to exactly one receiver, and every non-supervisor agent
/// accepts at least one intent.
pub fn validate_registry() -> Result<(), String> {
    const ALL_AGENTS: [AgentId; 5] = [
        AgentId::Supervisor,
        AgentId::Literature,
        AgentId::Statistics,
        AgentId::Writing,
        AgentId::Compliance,
    ];
    const ALL_INTENTS: [Intent; 6] = [
        Intent::SearchLiterature,
        Intent::AnalyzeData,
        Intent::DraftSection,
        Intent::ComposeManuscript,
        Intent::PlanRevision,
        Intent::EvaluateChecklist,
    ];

    for intent in ALL_INTENTS {
        let receivers = ALL_AGENTS
            .iter()
            .filter(|a| accepts(**a, intent))
            .count();
        if receivers != 1 {
            return Err(format!(
                "intent {} has {} receivers, expected exactly 1",
                intent.as_str(),
                receivers
            ));
        }
    }
    for agent in ALL_AGENTS {
        if agent != AgentId::Supervisor && registered_intents(agent).is_empty() {
            return Err(format!("agent {} accepts no intents", agent.as_str()));
        }
    }
    Ok(())
}

// ─── Error taxonomy & retry policy ────────────────────────────────────────

/// Classified failure kinds for sub-agent invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "TOOL_ERROR")]
    ToolError,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "RATE_LIMIT")]
    RateLimit,
    #[serde(rename = "LLM_ERROR")]
    LlmError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ToolError => "TOOL_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::RateLimit => "RATE_LIMIT",
            Self::LlmError => "LLM_ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "VALIDATION_ERROR" => Some(Self::ValidationError),
            "TOOL_ERROR" => Some(Self::ToolError),
            "TIMEOUT" => Some(Self::Timeout),
            "RATE_LIMIT" => Some(Self::RateLimit),
            "LLM_ERROR" => Some(Self::LlmError),
            _ => None,
        }
    }

    /// Whether this kind can be retried at all.
    pub fn recoverable(&self) -> bool {
        !matches!(self, Self::ValidationError)
    }

    /// Total attempts allowed for this kind (first try included).
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::ValidationError => 1,
            Self::ToolError => 3,
            Self::Timeout => 2,
            Self::RateLimit => 3,
            Self::LlmError => 2,
        }
    }

    /// Backoff before retrying after `failed_attempts` failures (1-based).
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let n = failed_attempts.max(1) - 1;
        match self {
            Self::ValidationError => Duration::ZERO,
            Self::ToolError => Duration::from_secs(1 << n.min(8)),
            Self::Timeout => Duration::from_secs(5),
            Self::RateLimit => Duration::from_secs(10 * 3u64.pow(n.min(6))),
            Self::LlmError => Duration::from_secs(2),
        }
    }
}

/// Serializable error detail carried on finalized messages and failed tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorKind,
    pub message: String,
    pub recoverable: bool,
    /// Provider-supplied hint overriding the kind's default backoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorInfo {
    pub fn new(code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: code.recoverable(),
            retry_after_ms: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

/// Whether another attempt is allowed after `attempts_so_far` attempts
/// have failed with this error.
pub fn should_retry(error: &ErrorInfo, attempts_so_far: u32) -> bool {
    error.recoverable && attempts_so_far < error.code.max_attempts()
}

/// Delay to sleep before the next attempt. A provider-supplied
/// `retry_after_ms` hint takes precedence over the kind's default curve.
pub fn retry_delay(error: &ErrorInfo, attempts_so_far: u32) -> Duration {
    match error.retry_after_ms {
        Some(ms) => Duration::from_millis(ms),
        None => error.code.backoff(attempts_so_far),
    }
}

/// Map an external provider failure into the taxonomy.
pub fn classify_error(err: &ProviderError) -> ErrorInfo {
    match err {
        ProviderError::InvalidInput(msg) => ErrorInfo::validation(msg.clone()),
        ProviderError::Tool(msg) => ErrorInfo::new(ErrorKind::ToolError, msg.clone()),
        ProviderError::Timeout(msg) => ErrorInfo::new(ErrorKind::Timeout, msg.clone()),
        ProviderError::RateLimited {
            message,
            retry_after_ms,
        } => {
            let mut info = ErrorInfo::new(ErrorKind::RateLimit, message.clone());
            info.retry_after_ms = *retry_after_ms;
            info
        }
        ProviderError::Generation(msg) => ErrorInfo::new(ErrorKind::LlmError, msg.clone()),
    }
}
