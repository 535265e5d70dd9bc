//! Priority task queue
//!
//! One sorted set per label holds the pending tasks, scored so that the
//! store's native ordering yields "highest priority first, oldest first
//! within a priority". Popping is a peek followed by a conditional remove;
//! a worker that loses the remove to another worker simply selects again.
//!
//! # Persisted state
//!
//! - `{prefix}:queue:{label}`: sorted set of task JSON
//! - `{prefix}:delayed:{label}`: deferred task JSON scored by ready time,
//!   moved into the queue by the first `pop` after it falls due
//! - `{prefix}:task:{id}:status`: status hash (7 day expiry)
//! - `{prefix}:task:{id}:result`: result blob (24 hour expiry)
//! - `{prefix}:dead_letter`: append-only list of [`DeadLetter`] JSON

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::metrics;
use crate::models::{DeadLetter, Task, TaskPriority, TaskStatus};
use crate::store::{CoordinationStore, KeySpace, StoreError};

// ============================================================================
// Scoring
// ============================================================================

/// Origin of the time component of a score (2020-01-01T00:00:00Z, in µs)
pub const SCORE_EPOCH_MICROS: i64 = 1_577_836_800_000_000;

/// Width of one priority tier in microseconds (about 95 years)
pub const TIER_SPAN_MICROS: i64 = 3_000_000_000_000_000;

/// Ordering key for a task; lower pops first.
///
/// `rank * TIER_SPAN_MICROS + created_us`, where `created_us` counts
/// microseconds since [`SCORE_EPOCH_MICROS`] and is clamped into the tier.
/// The largest value is below 2^53 so every score is exact in an f64, and
/// two tasks whose `created_at` differ by at least a microsecond never tie.
pub fn score(priority: TaskPriority, created_at: DateTime<Utc>) -> f64 {
    let created_us = created_at
        .timestamp_micros()
        .saturating_sub(SCORE_EPOCH_MICROS)
        .clamp(0, TIER_SPAN_MICROS - 1);
    (i64::from(priority.rank()) * TIER_SPAN_MICROS + created_us) as f64
}

// ============================================================================
// Configuration & errors
// ============================================================================

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Expiry of the per-task status hash
    pub status_ttl_secs: u64,

    /// Retention of task result blobs
    pub result_ttl_secs: u64,

    /// Upper bound on lost remove races inside one `pop` call
    pub max_pop_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            status_ttl_secs: 7 * 24 * 3600,
            result_ttl_secs: 24 * 3600,
            max_pop_attempts: 32,
        }
    }
}

impl QueueConfig {
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to encode or decode task: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("pop called without any labels")]
    NoLabels,

    #[error("Corrupt status record for task {task_id}: {reason}")]
    CorruptStatus { task_id: String, reason: String },
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

fn ensure_transition(task: &Task, to: TaskStatus) -> QueueResult<()> {
    if task.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(QueueError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to,
        })
    }
}

// ============================================================================
// Status record
// ============================================================================

/// Snapshot of a task's status hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub label: String,
    pub priority: TaskPriority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub parent_job_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TaskStatusRecord {
    /// Whether the task has been RUNNING for longer than `max_running`
    ///
    /// Lets an external reaper find tasks whose worker died mid-flight.
    pub fn is_stale(&self, max_running: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running
            && self
                .started_at
                .is_some_and(|started| now - started > max_running)
    }

    fn from_fields(task_id: &str, mut fields: HashMap<String, String>) -> QueueResult<Self> {
        let corrupt = |reason: String| QueueError::CorruptStatus {
            task_id: task_id.to_string(),
            reason,
        };

        let mut take = |name: &str| fields.remove(name).filter(|v| !v.is_empty());

        let status = take("status")
            .ok_or_else(|| corrupt("missing status".to_string()))?
            .parse::<TaskStatus>()
            .map_err(corrupt)?;
        let priority = take("priority")
            .unwrap_or_default()
            .parse::<TaskPriority>()
            .unwrap_or_default();
        let parse_count = |value: Option<String>| -> u32 {
            value.and_then(|v| v.parse().ok()).unwrap_or_default()
        };
        let parse_time = |value: Option<String>| -> Option<DateTime<Utc>> {
            value
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map(|t| t.with_timezone(&Utc))
        };

        Ok(Self {
            task_id: task_id.to_string(),
            status,
            label: take("label").unwrap_or_default(),
            priority,
            retry_count: parse_count(take("retry_count")),
            max_retries: parse_count(take("max_retries")),
            parent_job_id: take("parent_job_id"),
            started_at: parse_time(take("started_at")),
            completed_at: parse_time(take("completed_at")),
            error: take("error"),
        })
    }
}

/// What `mark_failed` did with the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back in its queue as PENDING
    Retried { retry_count: u32 },
    /// Retries exhausted; FAILED and appended to the dead-letter list
    DeadLettered,
}

// ============================================================================
// TaskQueue
// ============================================================================

/// Priority queue engine over a coordination store
#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn CoordinationStore>,
    keys: KeySpace,
    config: QueueConfig,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn CoordinationStore>, keys: KeySpace, config: QueueConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Insert a task into the queue for its label and mark it PENDING
    pub async fn push(&self, task: &mut Task) -> QueueResult<()> {
        ensure_transition(task, TaskStatus::Pending)?;
        task.status = TaskStatus::Pending;
        task.started_at = None;

        let member = serde_json::to_string(task)?;
        let task_score = score(task.priority, task.created_at);

        self.store
            .zadd(&self.keys.queue(&task.label), &member, task_score)
            .await?;
        self.write_status(task, None).await?;

        metrics::record_task_pushed(&task.label);
        tracing::debug!(
            task_id = %task.id,
            label = %task.label,
            priority = %task.priority,
            score = task_score,
            "Task pushed"
        );
        Ok(())
    }

    /// Take the best pending task across `labels`, marking it RUNNING.
    ///
    /// Returns `Ok(None)` when every queue is empty. On equal scores the
    /// label listed first wins.
    pub async fn pop(&self, labels: &[String]) -> QueueResult<Option<Task>> {
        self.pop_at(labels, Utc::now()).await
    }

    /// [`pop`](Self::pop) evaluated at an explicit `now`.
    ///
    /// Deferred tasks whose ready time is at or before `now` are moved back
    /// into their queues first.
    pub async fn pop_at(&self, labels: &[String], now: DateTime<Utc>) -> QueueResult<Option<Task>> {
        if labels.is_empty() {
            return Err(QueueError::NoLabels);
        }

        for label in labels {
            self.promote_due(label, now).await?;
        }

        for attempt in 0..self.config.max_pop_attempts {
            let mut best: Option<(&str, String, f64)> = None;
            for label in labels {
                let Some((member, candidate_score)) =
                    self.store.zpeek_min(&self.keys.queue(label)).await?
                else {
                    continue;
                };
                let better = match &best {
                    Some((_, _, best_score)) => candidate_score < *best_score,
                    None => true,
                };
                if better {
                    best = Some((label.as_str(), member, candidate_score));
                }
            }

            let Some((label, member, member_score)) = best else {
                return Ok(None);
            };

            if !self.store.zrem(&self.keys.queue(label), &member).await? {
                metrics::record_pop_contention(label);
                tracing::debug!(label = %label, attempt, "Lost pop race, reselecting");
                continue;
            }

            // the task is out of the queue now; any failure below must put it back
            let claimed = match serde_json::from_str::<Task>(&member) {
                Ok(mut task) => {
                    task.status = TaskStatus::Running;
                    task.started_at = Some(now);
                    match self.write_status(&task, None).await {
                        Ok(()) => Ok(task),
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e.into()),
            };
            let task = match claimed {
                Ok(task) => task,
                Err(e) => {
                    self.restore(&self.keys.queue(label), &member, member_score)
                        .await;
                    return Err(e);
                }
            };

            metrics::record_task_popped(&task.label);
            tracing::info!(
                task_id = %task.id,
                label = %task.label,
                retry_count = task.retry_count,
                "Task popped"
            );
            return Ok(Some(task));
        }

        tracing::warn!(
            labels = ?labels,
            attempts = self.config.max_pop_attempts,
            "Pop contention exhausted attempts, returning no task"
        );
        Ok(None)
    }

    /// Mark a running task COMPLETED and retain its optional result
    pub async fn mark_done(
        &self,
        task: &mut Task,
        result: Option<&serde_json::Value>,
    ) -> QueueResult<()> {
        ensure_transition(task, TaskStatus::Completed)?;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());

        self.write_status(task, None).await?;
        if let Some(result) = result {
            self.store
                .set(
                    &self.keys.task_result(&task.id),
                    &serde_json::to_string(result)?,
                    Some(self.config.result_ttl()),
                )
                .await?;
        }

        metrics::record_task_completed(&task.label);
        tracing::info!(
            task_id = %task.id,
            label = %task.label,
            running_secs = task.running_secs(),
            "Task completed"
        );
        Ok(())
    }

    /// Record a failed execution.
    ///
    /// Re-queues at the same priority while retries remain, otherwise marks
    /// the task FAILED and appends it to the dead-letter list.
    pub async fn mark_failed(&self, task: &mut Task, error: &str) -> QueueResult<FailureDisposition> {
        ensure_transition(task, TaskStatus::Failed)?;
        task.retry_count += 1;

        if task.retry_count < task.max_retries {
            self.push(task).await?;
            metrics::record_task_retried(&task.label);
            tracing::warn!(
                task_id = %task.id,
                label = %task.label,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                error = %error,
                "Task failed, re-queued for retry"
            );
            return Ok(FailureDisposition::Retried {
                retry_count: task.retry_count,
            });
        }

        task.status = TaskStatus::Failed;
        let failed_at = Utc::now();
        task.completed_at = Some(failed_at);
        self.write_status(task, Some(error)).await?;

        let entry = DeadLetter {
            task: task.clone(),
            error: error.to_string(),
            failed_at,
        };
        self.store
            .rpush(&self.keys.dead_letter(), &serde_json::to_string(&entry)?)
            .await?;

        metrics::record_task_dead_lettered(&task.label);
        tracing::error!(
            task_id = %task.id,
            label = %task.label,
            retry_count = task.retry_count,
            error = %error,
            "Task failed permanently, moved to dead-letter list"
        );
        Ok(FailureDisposition::DeadLettered)
    }

    /// Return a popped task to PENDING without consuming retry budget
    pub async fn requeue(&self, task: &mut Task) -> QueueResult<()> {
        self.push(task).await?;
        metrics::record_task_requeued(&task.label);
        tracing::info!(task_id = %task.id, label = %task.label, "Task re-queued");
        Ok(())
    }

    /// Park a popped task for `delay` without consuming retry budget.
    ///
    /// The task stays PENDING but is invisible to `pop` until the delay has
    /// passed; it then re-enters its queue at its original score.
    pub async fn defer(&self, task: &mut Task, delay: Duration) -> QueueResult<()> {
        self.defer_at(task, delay, Utc::now()).await
    }

    /// [`defer`](Self::defer) evaluated at an explicit `now`
    pub async fn defer_at(
        &self,
        task: &mut Task,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        ensure_transition(task, TaskStatus::Pending)?;
        task.status = TaskStatus::Pending;
        task.started_at = None;

        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let ready_ms = now.timestamp_millis().saturating_add(delay_ms);
        let member = serde_json::to_string(task)?;

        self.store
            .zadd(&self.keys.delayed(&task.label), &member, ready_ms as f64)
            .await?;
        self.write_status(task, None).await?;

        metrics::record_task_deferred(&task.label);
        tracing::info!(
            task_id = %task.id,
            label = %task.label,
            delay_secs = delay.as_secs(),
            "Task deferred"
        );
        Ok(())
    }

    /// Pending tasks for one label
    pub async fn get_queue_length(&self, label: &str) -> QueueResult<u64> {
        let depth = self.store.zcard(&self.keys.queue(label)).await?;
        metrics::update_queue_depth(label, depth);
        Ok(depth)
    }

    /// Deferred tasks for one label that have not been moved back yet
    pub async fn get_delayed_length(&self, label: &str) -> QueueResult<u64> {
        Ok(self.store.zcard(&self.keys.delayed(label)).await?)
    }

    /// Read the status hash (None once expired or never written)
    pub async fn get_status(&self, task_id: &str) -> QueueResult<Option<TaskStatusRecord>> {
        let fields = self.store.hgetall(&self.keys.task_status(task_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        TaskStatusRecord::from_fields(task_id, fields).map(Some)
    }

    /// Read the retained result blob
    pub async fn get_result(&self, task_id: &str) -> QueueResult<Option<serde_json::Value>> {
        match self.store.get(&self.keys.task_result(task_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Oldest `limit` dead-lettered tasks
    pub async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        self.store
            .lrange(&self.keys.dead_letter(), 0, stop)
            .await?
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(QueueError::from))
            .collect()
    }

    pub async fn dead_letter_count(&self) -> QueueResult<u64> {
        Ok(self.store.llen(&self.keys.dead_letter()).await?)
    }

    /// Move due deferred tasks of `label` back into its queue
    async fn promote_due(&self, label: &str, now: DateTime<Utc>) -> QueueResult<()> {
        let delayed_key = self.keys.delayed(label);
        let queue_key = self.keys.queue(label);
        let now_ms = now.timestamp_millis() as f64;

        while let Some((member, ready_ms)) = self.store.zpeek_min(&delayed_key).await? {
            if ready_ms > now_ms {
                break;
            }
            let decoded = serde_json::from_str::<Task>(&member);
            if !self.store.zrem(&delayed_key, &member).await? {
                // another popper moved it
                continue;
            }
            let task = match decoded {
                Ok(task) => task,
                Err(e) => {
                    tracing::error!(label = %label, error = %e, "Dropping undecodable deferred task");
                    continue;
                }
            };

            let task_score = score(task.priority, task.created_at);
            if let Err(e) = self.store.zadd(&queue_key, &member, task_score).await {
                self.restore(&delayed_key, &member, ready_ms).await;
                return Err(e.into());
            }
            tracing::debug!(task_id = %task.id, label = %label, "Deferred task ready");
        }
        Ok(())
    }

    /// Best-effort re-insert of a member this worker removed but could not hand out
    async fn restore(&self, key: &str, member: &str, member_score: f64) {
        if let Err(e) = self.store.zadd(key, member, member_score).await {
            tracing::error!(
                key = %key,
                error = %e,
                "Failed to restore task after an aborted claim, task needs manual recovery"
            );
        }
    }

    async fn write_status(&self, task: &Task, error: Option<&str>) -> QueueResult<()> {
        let format_time =
            |t: Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_default();
        let fields = vec![
            ("status".to_string(), task.status.as_str().to_string()),
            ("label".to_string(), task.label.clone()),
            ("priority".to_string(), task.priority.as_str().to_string()),
            ("retry_count".to_string(), task.retry_count.to_string()),
            ("max_retries".to_string(), task.max_retries.to_string()),
            (
                "parent_job_id".to_string(),
                task.parent_job_id.clone().unwrap_or_default(),
            ),
            ("created_at".to_string(), task.created_at.to_rfc3339()),
            ("started_at".to_string(), format_time(task.started_at)),
            ("completed_at".to_string(), format_time(task.completed_at)),
            ("error".to_string(), error.unwrap_or_default().to_string()),
        ];

        let key = self.keys.task_status(&task.id);
        self.store.hset_multiple(&key, &fields).await?;
        self.store.expire(&key, self.config.status_ttl()).await?;
        Ok(())
    }
}
