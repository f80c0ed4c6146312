//! Task persistence.
//!
//! One row per task; the accumulated outputs (references, stats, sections,
//! compliance report) are stored as JSON TEXT columns so a single row read
//! returns a consistent snapshot of the whole task. The Supervisor is the
//! only writer of a running task's row.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::CoreError;
use crate::graph::StepId;
use crate::models::{ChecklistType, Task, TaskStatus};

#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, task: &Task) -> Result<(), CoreError> {
        let t = task.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, owner_id, workflow, topic, dataset, checklist, status,
                     current_step, revision_round, refs, stats_report, sections, pending_sections,
                     manuscript, compliance_report, revision_notes, last_error, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                     ON CONFLICT(id) DO UPDATE SET
                       status = excluded.status,
                       current_step = excluded.current_step,
                       revision_round = excluded.revision_round,
                       refs = excluded.refs,
                       stats_report = excluded.stats_report,
                       sections = excluded.sections,
                       pending_sections = excluded.pending_sections,
                       manuscript = excluded.manuscript,
                       compliance_report = excluded.compliance_report,
                       revision_notes = excluded.revision_notes,
                       last_error = excluded.last_error,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        t.id,
                        t.owner_id,
                        t.workflow,
                        t.topic,
                        t.dataset.to_string(),
                        t.checklist.as_str(),
                        t.status.as_str(),
                        t.current_step.map(|s| s.as_str()),
                        t.revision_round,
                        serde_json::to_string(&t.references).unwrap_or_default(),
                        t.stats_report
                            .as_ref()
                            .map(|r| serde_json::to_string(r).unwrap_or_default()),
                        serde_json::to_string(&t.sections).unwrap_or_default(),
                        serde_json::to_string(&t.pending_sections).unwrap_or_default(),
                        t.manuscript,
                        t.compliance_report
                            .as_ref()
                            .map(|r| serde_json::to_string(r).unwrap_or_default()),
                        serde_json::to_string(&t.revision_notes).unwrap_or_default(),
                        t.last_error
                            .as_ref()
                            .map(|e| serde_json::to_string(e).unwrap_or_default()),
                        t.created_at.timestamp_millis(),
                        t.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>, CoreError> {
        let id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, workflow, topic, dataset, checklist, status,
                     current_step, revision_round, refs, stats_report, sections, pending_sections,
                     manuscript, compliance_report, revision_notes, last_error, created_at, updated_at
                     FROM tasks WHERE id = ?1",
                )?;
                stmt.query_row(rusqlite::params![id], row_to_task).optional()
            })
            .await
    }

    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Task>, CoreError> {
        let owner = owner_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, workflow, topic, dataset, checklist, status,
                     current_step, revision_round, refs, stats_report, sections, pending_sections,
                     manuscript, compliance_report, revision_notes, last_error, created_at, updated_at
                     FROM tasks WHERE owner_id = ?1 ORDER BY created_at DESC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![owner], row_to_task)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Delete a task; its messages go with it via the cascade.
    pub async fn delete(&self, task_id: &str) -> Result<(), CoreError> {
        let id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.execute("DELETE FROM tasks WHERE id = ?1", rusqlite::params![id])?;
                Ok(())
            })
            .await
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let dataset: String = row.get(4)?;
    let checklist: String = row.get(5)?;
    let status: String = row.get(6)?;
    let current_step: Option<String> = row.get(7)?;
    let refs: String = row.get(9)?;
    let stats_report: Option<String> = row.get(10)?;
    let sections: String = row.get(11)?;
    let pending_sections: String = row.get(12)?;
    let compliance_report: Option<String> = row.get(14)?;
    let revision_notes: String = row.get(15)?;
    let last_error: Option<String> = row.get(16)?;

    Ok(Task {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        workflow: row.get(2)?,
        topic: row.get(3)?,
        dataset: serde_json::from_str(&dataset).unwrap_or(serde_json::Value::Null),
        checklist: ChecklistType::from_str(&checklist).unwrap_or_default(),
        status: TaskStatus::from_str(&status).unwrap_or(TaskStatus::Pending),
        current_step: current_step.as_deref().and_then(StepId::from_str),
        revision_round: row.get(8)?,
        references: serde_json::from_str(&refs).unwrap_or_default(),
        stats_report: stats_report.as_deref().and_then(|s| serde_json::from_str(s).ok()),
        sections: serde_json::from_str(&sections).unwrap_or_default(),
        pending_sections: serde_json::from_str(&pending_sections).unwrap_or_default(),
        manuscript: row.get(13)?,
        compliance_report: compliance_report
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok()),
        revision_notes: serde_json::from_str(&revision_notes).unwrap_or_default(),
        last_error: last_error.as_deref().and_then(|s| serde_json::from_str(s).ok()),
        created_at: millis_to_datetime(row.get(17)?),
        updated_at: millis_to_datetime(row.get(18)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;

    fn sample_task() -> Task {
        let mut task = Task::new(
            "task-1".to_string(),
            "owner-1".to_string(),
            "imrad@1".to_string(),
            "ACE inhibitors after myocardial infarction".to_string(),
            serde_json::json!({ "tests": [{ "name": "welch_t", "data": [1, 2, 3] }] }),
            ChecklistType::Consort,
        );
        task.sections
            .insert(Section::Introduction, "Background text.".to_string());
        task
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let store = TaskStore::new(db);
        let task = sample_task();
        store.save(&task).await.unwrap();

        let loaded = store.get("task-1").await.unwrap().unwrap();
        assert_eq!(loaded.topic, task.topic);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.checklist, ChecklistType::Consort);
        assert_eq!(loaded.pending_sections, Section::ALL.to_vec());
        assert_eq!(
            loaded.sections.get(&Section::Introduction).unwrap(),
            "Background text."
        );
        assert_eq!(loaded.dataset["tests"][0]["name"], "welch_t");
    }

    #[tokio::test]
    async fn test_upsert_overwrites_mutable_fields() {
        let db = Database::open_in_memory().unwrap();
        let store = TaskStore::new(db);
        let mut task = sample_task();
        store.save(&task).await.unwrap();

        task.status = TaskStatus::Running;
        task.revision_round = 2;
        store.save(&task).await.unwrap();

        let loaded = store.get("task-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Running);
        assert_eq!(loaded.revision_round, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_the_row() {
        let db = Database::open_in_memory().unwrap();
        let store = TaskStore::new(db);
        store.save(&sample_task()).await.unwrap();
        store.delete("task-1").await.unwrap();
        assert!(store.get("task-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let db = Database::open_in_memory().unwrap();
        let store = TaskStore::new(db);
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_owner_orders_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let store = TaskStore::new(db);
        let mut first = sample_task();
        first.id = "task-a".to_string();
        first.created_at = first.created_at - chrono::Duration::seconds(10);
        let mut second = sample_task();
        second.id = "task-b".to_string();
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let tasks = store.list_by_owner("owner-1").await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "task-b");
    }
}
