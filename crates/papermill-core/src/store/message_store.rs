//! Append-only message audit log.
//!
//! `append` assigns the next per-task sequence number and inserts in one
//! statement batch on the single connection, so messages of one task are
//! strictly ordered. Rows are never updated.

use chrono::{DateTime, Utc};

use crate::contract::{AgentId, Intent};
use crate::db::Database;
use crate::error::CoreError;
use crate::models::{CallMetrics, Message, MessageStatus};

#[derive(Clone)]
pub struct MessageStore {
    db: Database,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a finalized message, assigning its sequence number.
    /// Returns the assigned seq.
    pub async fn append(&self, message: &Message) -> Result<i64, CoreError> {
        if message.status == MessageStatus::Pending {
            return Err(CoreError::BadRequest(format!(
                "message {} is still pending; only finalized messages are appended",
                message.id
            )));
        }
        let m = message.clone();
        self.db
            .with_conn_async(move |conn| {
                let seq: i64 = conn.query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE task_id = ?1",
                    rusqlite::params![m.task_id],
                    |row| row.get(0),
                )?;
                conn.execute(
                    "INSERT INTO messages (id, task_id, seq, sender, receiver, intent, status,
                     input, output, error, latency_ms, input_tokens, output_tokens, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    rusqlite::params![
                        m.id,
                        m.task_id,
                        seq,
                        m.sender.as_str(),
                        m.receiver.as_str(),
                        m.intent.as_str(),
                        m.status.as_str(),
                        m.input.to_string(),
                        m.output.as_ref().map(|v| v.to_string()),
                        m.error
                            .as_ref()
                            .map(|e| serde_json::to_string(e).unwrap_or_default()),
                        m.metrics.as_ref().map(|x| x.latency_ms),
                        m.metrics.as_ref().and_then(|x| x.input_tokens),
                        m.metrics.as_ref().and_then(|x| x.output_tokens),
                        m.created_at.timestamp_millis(),
                    ],
                )?;
                Ok(seq)
            })
            .await
    }

    /// Full audit trail of a task, in append order.
    pub async fn list_by_task(&self, task_id: &str) -> Result<Vec<Message>, CoreError> {
        let id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, task_id, seq, sender, receiver, intent, status,
                     input, output, error, latency_ms, input_tokens, output_tokens, created_at
                     FROM messages WHERE task_id = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id], row_to_message)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn count_by_task(&self, task_id: &str) -> Result<i64, CoreError> {
        let id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE task_id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
            })
            .await
    }
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let sender: String = row.get(3)?;
    let receiver: String = row.get(4)?;
    let intent: String = row.get(5)?;
    let status: String = row.get(6)?;
    let input: String = row.get(7)?;
    let output: Option<String> = row.get(8)?;
    let error: Option<String> = row.get(9)?;
    let latency_ms: Option<i64> = row.get(10)?;
    let input_tokens: Option<i64> = row.get(11)?;
    let output_tokens: Option<i64> = row.get(12)?;
    let created_ms: i64 = row.get(13)?;

    Ok(Message {
        id: row.get(0)?,
        task_id: row.get(1)?,
        seq: row.get(2)?,
        sender: AgentId::from_str(&sender).unwrap_or(AgentId::Supervisor),
        receiver: AgentId::from_str(&receiver).unwrap_or(AgentId::Supervisor),
        intent: Intent::from_str(&intent).unwrap_or(Intent::SearchLiterature),
        status: MessageStatus::from_str(&status).unwrap_or(MessageStatus::Error),
        input: serde_json::from_str(&input).unwrap_or(serde_json::Value::Null),
        output: output.as_deref().and_then(|s| serde_json::from_str(s).ok()),
        error: error.as_deref().and_then(|s| serde_json::from_str(s).ok()),
        metrics: Some(CallMetrics {
            latency_ms: latency_ms.unwrap_or(0) as u64,
            input_tokens: input_tokens.map(|t| t as u64),
            output_tokens: output_tokens.map(|t| t as u64),
        }),
        created_at: DateTime::<Utc>::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChecklistType, Task};
    use crate::store::TaskStore;

    async fn setup() -> (TaskStore, MessageStore) {
        let db = Database::open_in_memory().unwrap();
        let tasks = TaskStore::new(db.clone());
        let task = Task::new(
            "task-1".to_string(),
            "owner-1".to_string(),
            "imrad@1".to_string(),
            "topic".to_string(),
            serde_json::json!({}),
            ChecklistType::Consort,
        );
        tasks.save(&task).await.unwrap();
        (tasks, MessageStore::new(db))
    }

    fn finalized(task_id: &str, n: u32) -> Message {
        Message::send(
            AgentId::Supervisor,
            AgentId::Literature,
            Intent::SearchLiterature,
            task_id,
            serde_json::json!({ "attempt": n }),
        )
        .unwrap()
        .finalize_ok(serde_json::json!([]), CallMetrics::default())
    }

    #[tokio::test]
    async fn test_append_assigns_monotonic_seq() {
        let (_tasks, messages) = setup().await;
        let seq1 = messages.append(&finalized("task-1", 1)).await.unwrap();
        let seq2 = messages.append(&finalized("task-1", 2)).await.unwrap();
        let seq3 = messages.append(&finalized("task-1", 3)).await.unwrap();
        assert_eq!((seq1, seq2, seq3), (1, 2, 3));

        let trail = messages.list_by_task("task-1").await.unwrap();
        assert_eq!(trail.len(), 3);
        assert!(trail.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(trail.iter().all(|m| m.task_id == "task-1"));
    }

    #[tokio::test]
    async fn test_append_rejects_pending_messages() {
        let (_tasks, messages) = setup().await;
        let pending = Message::send(
            AgentId::Supervisor,
            AgentId::Literature,
            Intent::SearchLiterature,
            "task-1",
            serde_json::Value::Null,
        )
        .unwrap();
        let err = messages.append(&pending).await.unwrap_err();
        assert!(matches!(err, CoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_error_detail_roundtrips() {
        let (_tasks, messages) = setup().await;
        let msg = Message::send(
            AgentId::Supervisor,
            AgentId::Literature,
            Intent::SearchLiterature,
            "task-1",
            serde_json::Value::Null,
        )
        .unwrap()
        .finalize_error(
            crate::contract::ErrorInfo::new(crate::contract::ErrorKind::Timeout, "too slow"),
            CallMetrics {
                latency_ms: 30_000,
                ..Default::default()
            },
        );
        messages.append(&msg).await.unwrap();

        let trail = messages.list_by_task("task-1").await.unwrap();
        let loaded = &trail[0];
        assert_eq!(loaded.status, MessageStatus::Error);
        let error = loaded.error.as_ref().unwrap();
        assert_eq!(error.code, crate::contract::ErrorKind::Timeout);
        assert_eq!(loaded.metrics.as_ref().unwrap().latency_ms, 30_000);
    }
}
