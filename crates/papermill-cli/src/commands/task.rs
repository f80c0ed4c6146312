//! `papermill status` / `tasks` / `messages` — inspect persisted runs.

use console::style;

use papermill_core::models::{MessageStatus, Task, TaskStatus};
use papermill_core::Engine;

use super::print_json;

pub async fn status(engine: &Engine, task_id: &str, json: bool) -> Result<(), String> {
    let task = engine.get_task(task_id).await.map_err(|e| e.to_string())?;
    if json {
        print_json(&serde_json::to_value(&task).map_err(|e| e.to_string())?);
        return Ok(());
    }
    println!("{}  {}", style(&task.id).bold(), status_label(&task));
    println!("  topic:     {}", task.topic);
    println!("  workflow:  {}", task.workflow);
    println!("  checklist: {}", task.checklist.as_str());
    println!("  revisions: {}", task.revision_round);
    let message_count = engine
        .count_messages(task_id)
        .await
        .map_err(|e| e.to_string())?;
    println!("  messages:  {}", message_count);
    if let Some(step) = task.current_step {
        println!("  step:      {}", step.as_str());
    }
    if let Some(score) = task.compliance_score() {
        println!("  score:     {:.2}", score);
    }
    if let Some(error) = &task.last_error {
        println!(
            "  error:     {} {}",
            style(error.code.as_str()).red(),
            error.message
        );
    }
    Ok(())
}

pub async fn list(engine: &Engine, owner: &str) -> Result<(), String> {
    let tasks = engine.list_tasks(owner).await.map_err(|e| e.to_string())?;
    if tasks.is_empty() {
        println!("No tasks for owner '{}'.", owner);
        return Ok(());
    }
    for task in tasks {
        println!(
            "{}  {}  {}",
            style(&task.id).bold(),
            status_label(&task),
            task.topic
        );
    }
    Ok(())
}

/// Print a task's full audit log, one line per message.
pub async fn messages(engine: &Engine, task_id: &str, json: bool) -> Result<(), String> {
    let messages = engine
        .list_messages(task_id)
        .await
        .map_err(|e| e.to_string())?;
    if json {
        print_json(&serde_json::to_value(&messages).map_err(|e| e.to_string())?);
        return Ok(());
    }
    for msg in messages {
        let status = match msg.status {
            MessageStatus::Ok => style("ok").green(),
            MessageStatus::Error => style("error").red(),
            MessageStatus::Pending => style("pending").yellow(),
        };
        let latency = msg
            .metrics
            .as_ref()
            .map(|m| format!("{}ms", m.latency_ms))
            .unwrap_or_default();
        let detail = msg
            .error
            .as_ref()
            .map(|e| format!("  {}: {}", e.code.as_str(), e.message))
            .unwrap_or_default();
        println!(
            "{:>3}  {:<20} {:>10} {:>8}{}",
            msg.seq,
            msg.intent.as_str(),
            status,
            latency,
            detail
        );
    }
    Ok(())
}

pub async fn delete(engine: &Engine, task_id: &str) -> Result<(), String> {
    engine
        .delete_task(task_id)
        .await
        .map_err(|e| e.to_string())?;
    println!("Deleted task {}.", task_id);
    Ok(())
}

fn status_label(task: &Task) -> console::StyledObject<&'static str> {
    let label = task.status.as_str();
    match task.status {
        TaskStatus::Completed => style(label).green(),
        TaskStatus::Failed => style(label).red(),
        TaskStatus::NeedsIntervention | TaskStatus::Cancelled => style(label).yellow(),
        _ => style(label).cyan(),
    }
}
