use anyhow::{Context as _, Result};

use agentfleet::models::{Task, TaskPriority};
use agentfleet::queue::TaskQueue;

use super::Context;

/// Arguments of the `push` command
pub struct PushParams {
    pub label: String,
    pub payload: String,
    pub priority: TaskPriority,
    pub max_retries: Option<u32>,
    pub parent_job: Option<String>,
}

fn task_queue(ctx: &Context) -> TaskQueue {
    TaskQueue::new(ctx.store.clone(), ctx.keys.clone(), ctx.config.queue.clone())
}

pub async fn push(ctx: &Context, params: PushParams) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(&params.payload).context("Payload must be valid JSON")?;

    let mut task = Task::new(params.label, payload).with_priority(params.priority);
    if let Some(max_retries) = params.max_retries {
        task = task.with_max_retries(max_retries);
    }
    if let Some(parent_job) = params.parent_job {
        task = task.with_parent_job(parent_job);
    }

    task_queue(ctx).push(&mut task).await?;

    println!("Pushed task {}", task.id);
    println!("  Label: {}", task.label);
    println!("  Priority: {}", task.priority);
    println!("  Max retries: {}", task.max_retries);
    Ok(())
}

pub async fn queue_len(ctx: &Context, labels: &[String]) -> Result<()> {
    let queue = task_queue(ctx);
    println!("{:<32} {:>10} {:>10}", "LABEL", "PENDING", "DEFERRED");
    for label in labels {
        let depth = queue.get_queue_length(label).await?;
        let deferred = queue.get_delayed_length(label).await?;
        println!("{label:<32} {depth:>10} {deferred:>10}");
    }
    Ok(())
}

pub async fn dead_letters(ctx: &Context, limit: usize) -> Result<()> {
    let queue = task_queue(ctx);
    let total = queue.dead_letter_count().await?;
    let letters = queue.dead_letters(limit).await?;

    println!("Dead-lettered tasks: {total}");
    println!("================================");
    for letter in &letters {
        println!(
            "{} [{}] retries={} failed_at={}",
            letter.task.id,
            letter.task.label,
            letter.task.retry_count,
            letter.failed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("   error: {}", letter.error);
    }
    if (letters.len() as u64) < total {
        println!("... {} more", total - letters.len() as u64);
    }
    Ok(())
}
