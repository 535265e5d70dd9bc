// Core data structures for the task queue

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Default retry budget for a new task
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Task priority; HIGH always pops before MEDIUM, MEDIUM before LOW
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    /// Tier index used in the queue score (0 pops first)
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![Self::High, Self::Medium, Self::Low]
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("Unknown priority '{other}' (expected low, medium, high)")),
        }
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and Failed never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Allowed lifecycle moves.
    ///
    /// Running -> Pending is the retry re-queue; Pending -> Pending covers a
    /// task pushed again before anyone popped it.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Running)
                | (Running, Pending)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown task status '{other}'")),
        }
    }
}

/// A routable, prioritized unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Routing key (e.g. "crawler:xhs", "ai:analyze")
    pub label: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    /// Label-specific data, opaque to the queue
    pub payload: serde_json::Value,
    /// Groups several tasks under one user-facing job
    pub parent_job_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Immutable; FIFO tie-break within a priority tier (microsecond precision)
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending MEDIUM-priority task stamped with the current time
    pub fn new(label: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            priority: TaskPriority::default(),
            status: TaskStatus::Pending,
            payload,
            parent_job_id: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: Utc::now().trunc_subsecs(6),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parent_job(mut self, parent_job_id: impl Into<String>) -> Self {
        self.parent_job_id = Some(parent_job_id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the creation time (backfills, tests)
    ///
    /// Truncated to microseconds, the resolution queue ordering uses.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at.trunc_subsecs(6);
        self
    }

    /// Whether another failure would still be re-queued
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Seconds spent running so far (None if never started)
    pub fn running_secs(&self) -> Option<i64> {
        self.started_at.map(|started| {
            let end = self.completed_at.unwrap_or_else(Utc::now);
            (end - started).num_seconds()
        })
    }
}

/// Result a worker reports after executing a task.
///
/// `Retryable` is a resource shortage ("try again later"), not a failure:
/// it never counts against `max_retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed {
        result: Option<serde_json::Value>,
    },
    Failed {
        error: String,
    },
    Retryable {
        delay_secs: u64,
        reason: String,
    },
}

impl TaskOutcome {
    pub fn completed(result: serde_json::Value) -> Self {
        Self::Completed {
            result: Some(result),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn retry_later(delay_secs: u64, reason: impl Into<String>) -> Self {
        Self::Retryable {
            delay_secs,
            reason: reason.into(),
        }
    }

    /// Whether this outcome consumes retry budget
    pub fn counts_against_retries(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// A permanently failed task kept for operator inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: Task,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}
