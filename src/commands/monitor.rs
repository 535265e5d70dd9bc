use anyhow::Result;
use chrono::Utc;

use agentfleet::heartbeat::LivenessRegistry;
use agentfleet::phase::{EntityRef, PhaseTracker};
use agentfleet::queue::TaskQueue;

use super::Context;

pub async fn workers(ctx: &Context) -> Result<()> {
    let registry = LivenessRegistry::new(
        ctx.store.clone(),
        ctx.keys.clone(),
        ctx.config.heartbeat.clone(),
    );
    let workers = registry.list().await?;
    if workers.is_empty() {
        println!("No workers have reported yet");
        return Ok(());
    }

    let online = workers.iter().filter(|w| w.online).count();
    println!("Workers: {} known, {online} online", workers.len());
    println!("================================");

    let now = Utc::now();
    for worker in workers {
        match worker.record {
            Some(record) => {
                println!(
                    "{:<24} online  {:<6} done={} failed={} last_seen={}s ago",
                    worker.name,
                    record.status,
                    record.tasks_completed,
                    record.tasks_failed,
                    (now - record.last_heartbeat).num_seconds()
                );
                println!("   labels: {}", record.labels.join(", "));
                if let Some(task_id) = record.current_task_id {
                    println!("   task: {task_id}");
                }
            }
            None => println!("{:<24} offline", worker.name),
        }
    }
    Ok(())
}

pub async fn phase_show(ctx: &Context, entity_type: String, entity_id: String) -> Result<()> {
    let tracker = PhaseTracker::new(ctx.store.clone(), ctx.keys.clone(), ctx.config.phase.clone());
    let entity = EntityRef::new(entity_type, entity_id);

    let Some(record) = tracker.get_phase(&entity).await? else {
        println!("{entity}: none");
        return Ok(());
    };

    println!("{entity}: {}", record.phase);
    if record.total > 0 {
        println!("  Progress: {}/{}", record.done, record.total);
    }
    if let Some(pending) = tracker.pending(&entity).await? {
        println!("  Pending: {pending}");
    }
    if let Some(error) = record.error_msg {
        println!("  Last error: {error}");
    }
    if let Some(updated_at) = record.updated_at {
        println!("  Updated: {}", updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

/// Refresh queue depth gauges and print the exposition text
pub async fn metrics(ctx: &Context, labels: &[String]) -> Result<()> {
    if let Err(e) = agentfleet::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed");
    }

    let queue = TaskQueue::new(ctx.store.clone(), ctx.keys.clone(), ctx.config.queue.clone());
    for label in labels {
        queue.get_queue_length(label).await?;
    }

    let text = agentfleet::metrics::encode_metrics()
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?;
    print!("{text}");
    Ok(())
}
