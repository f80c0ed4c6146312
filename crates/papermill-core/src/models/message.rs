//! The message envelope exchanged between the Supervisor and sub-agents.
//!
//! One envelope per invocation. An envelope starts `pending`, is finalized
//! exactly once (`ok` or `error`), and is then appended to the task's
//! audit trail. Finalizers consume `self` so a stored message can never be
//! mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{self, AgentId, ErrorInfo, Intent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Ok,
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ok" => Some(Self::Ok),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Latency and token accounting for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetrics {
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// One sub-agent invocation envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Correlation id: the owning task's id. All messages of one pipeline
    /// run share it.
    pub task_id: String,
    pub sender: AgentId,
    pub receiver: AgentId,
    pub intent: Intent,
    pub input: Value,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CallMetrics>,
    /// Position in the task's append-only audit log. Assigned by the
    /// message store on append; 0 until then.
    #[serde(default)]
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a pending envelope with a fresh id. Fails fast with
    /// `VALIDATION_ERROR` when the intent is not registered for the
    /// receiver.
    pub fn send(
        sender: AgentId,
        receiver: AgentId,
        intent: Intent,
        task_id: &str,
        input: Value,
    ) -> Result<Self, ErrorInfo> {
        if !contract::accepts(receiver, intent) {
            return Err(ErrorInfo::validation(format!(
                "intent {} is not registered for agent {}",
                intent.as_str(),
                receiver.as_str()
            )));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            sender,
            receiver,
            intent,
            input,
            status: MessageStatus::Pending,
            output: None,
            error: None,
            metrics: None,
            seq: 0,
            created_at: Utc::now(),
        })
    }

    /// Finalize as a successful invocation.
    pub fn finalize_ok(mut self, output: Value, metrics: CallMetrics) -> Self {
        self.status = MessageStatus::Ok;
        self.output = Some(output);
        self.metrics = Some(metrics);
        self
    }

    /// Finalize as a failed invocation, preserving the classified error.
    pub fn finalize_error(mut self, error: ErrorInfo, metrics: CallMetrics) -> Self {
        self.status = MessageStatus::Error;
        self.error = Some(error);
        self.metrics = Some(metrics);
        self
    }
}
