//! `papermill revise` — feed reviewer feedback back into the pipeline.

use console::style;

use papermill_core::Engine;

use super::run::stream_progress;

pub async fn run(
    engine: &Engine,
    task_id: &str,
    feedback: &str,
    reset_rounds: bool,
) -> Result<(), String> {
    let task = engine
        .submit_revision(task_id, feedback, reset_rounds)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "{} {} (round counter at {})",
        style("Revising task").green().bold(),
        task.id,
        task.revision_round
    );
    stream_progress(engine, task_id).await
}
