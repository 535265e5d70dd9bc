//! Worker runtime
//!
//! Drives the pop / execute / report cycle for one worker process and keeps
//! its heartbeat published. Task execution itself is delegated to a
//! [`TaskHandler`]; the runtime only translates the handler's
//! [`TaskOutcome`] into the matching queue operation.
//!
//! # Example
//!
//! ```rust,ignore
//! let worker = Worker::new(queue, registry, Arc::new(MyHandler), config);
//! let handle = worker.start();
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use crate::heartbeat::{HeartbeatReporter, LivenessRegistry, SharedWorkerState, WorkerState};
use crate::metrics;
use crate::models::{Task, TaskOutcome};
use crate::queue::{FailureDisposition, TaskQueue};
use crate::utils::retry::{with_retry, RetryConfig};
use crate::Result;

/// Executes tasks for the labels a worker serves
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one task to completion.
    ///
    /// Return [`TaskOutcome::Retryable`] for resource shortages (no
    /// credential available, upstream throttling). The task is parked for the
    /// requested delay without consuming its retry budget.
    async fn handle(&self, task: &Task) -> TaskOutcome;
}

// ============================================================================
// Configuration
// ============================================================================

/// Worker runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name published in heartbeats
    pub name: String,

    /// Labels to pop from, in tie-break order
    pub labels: Vec<String>,

    /// Sleep between polls when every queue is empty
    pub poll_interval_ms: u64,

    /// Upper bound on how long a retryable outcome parks its task
    pub max_backoff_secs: u64,

    /// Backoff for store errors while popping or reporting
    pub retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: format!("worker-{}", std::process::id()),
            labels: Vec::new(),
            poll_interval_ms: 1000,
            max_backoff_secs: 300,
            retry: RetryConfig::default().with_jitter(),
        }
    }
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            labels,
            ..Default::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

/// What one `run_once` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every served queue was empty
    Idle,
    Completed { task_id: String },
    Retried { task_id: String, retry_count: u32 },
    DeadLettered { task_id: String },
    /// Task is parked for `delay` before any worker can pop it again
    Deferred { task_id: String, delay: Duration },
}

// ============================================================================
// Worker
// ============================================================================

pub struct Worker {
    queue: TaskQueue,
    registry: LivenessRegistry,
    handler: Arc<dyn TaskHandler>,
    state: SharedWorkerState,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: TaskQueue,
        registry: LivenessRegistry,
        handler: Arc<dyn TaskHandler>,
        config: WorkerConfig,
    ) -> Self {
        let state = Arc::new(RwLock::new(WorkerState::new(
            config.name.clone(),
            config.labels.clone(),
        )));
        Self {
            queue,
            registry,
            handler,
            state,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Shared state published by the heartbeat
    pub fn state(&self) -> SharedWorkerState {
        self.state.clone()
    }

    /// Pop one task, run it, and report the outcome
    pub async fn run_once(&self) -> Result<RunOutcome> {
        let labels = &self.config.labels;
        let popped = with_retry(&self.config.retry, || self.queue.pop(labels)).await;

        let mut task = match popped {
            Ok(Some(task)) => task,
            Ok(None) => {
                self.state.write().await.set_idle();
                return Ok(RunOutcome::Idle);
            }
            Err(e) => {
                self.state.write().await.set_error();
                return Err(e.into());
            }
        };

        self.state.write().await.set_busy(task.id.clone());
        let outcome = {
            let _timer = metrics::start_task_timer(&task.label);
            self.handler.handle(&task).await
        };

        let reported = self.report(&mut task, outcome).await;
        match &reported {
            Ok(_) => self.state.write().await.set_idle(),
            Err(e) => {
                tracing::error!(
                    worker = %self.config.name,
                    task_id = %task.id,
                    error = %e,
                    "Failed to report task outcome"
                );
                self.state.write().await.set_error();
            }
        }
        reported
    }

    async fn report(&self, task: &mut Task, outcome: TaskOutcome) -> Result<RunOutcome> {
        let queue = &self.queue;
        let retry = &self.config.retry;

        // each attempt starts from the popped snapshot so a retried report
        // never double-counts
        let snapshot = task.clone();

        match outcome {
            TaskOutcome::Completed { result } => {
                let result = result.as_ref();
                *task = with_retry(retry, || {
                    let mut attempt = snapshot.clone();
                    async move { queue.mark_done(&mut attempt, result).await.map(|_| attempt) }
                })
                .await?;
                self.state.write().await.record_completed();
                Ok(RunOutcome::Completed {
                    task_id: task.id.clone(),
                })
            }
            TaskOutcome::Failed { error } => {
                let error = error.as_str();
                let (updated, disposition) = with_retry(retry, || {
                    let mut attempt = snapshot.clone();
                    async move {
                        queue
                            .mark_failed(&mut attempt, error)
                            .await
                            .map(|disposition| (attempt, disposition))
                    }
                })
                .await?;
                *task = updated;
                self.state.write().await.record_failed();

                Ok(match disposition {
                    FailureDisposition::Retried { retry_count } => RunOutcome::Retried {
                        task_id: task.id.clone(),
                        retry_count,
                    },
                    FailureDisposition::DeadLettered => RunOutcome::DeadLettered {
                        task_id: task.id.clone(),
                    },
                })
            }
            TaskOutcome::Retryable { delay_secs, reason } => {
                let delay = Duration::from_secs(delay_secs).min(self.config.max_backoff());
                *task = with_retry(retry, || {
                    let mut attempt = snapshot.clone();
                    async move { queue.defer(&mut attempt, delay).await.map(|_| attempt) }
                })
                .await?;

                tracing::info!(
                    worker = %self.config.name,
                    task_id = %task.id,
                    delay_secs = delay.as_secs(),
                    reason = %reason,
                    "Task deferred"
                );
                Ok(RunOutcome::Deferred {
                    task_id: task.id.clone(),
                    delay,
                })
            }
        }
    }

    /// Spawn the poll loop and the heartbeat reporter
    pub fn start(self) -> WorkerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let heartbeat_handle =
            HeartbeatReporter::new(self.registry.clone(), self.state.clone()).spawn(shutdown_rx.clone());

        let worker = Arc::new(self);
        let poll_handle = tokio::spawn(Self::poll_loop(worker, shutdown_rx));

        WorkerHandle {
            poll_handle,
            heartbeat_handle,
            shutdown,
        }
    }

    async fn poll_loop(worker: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            worker = %worker.config.name,
            labels = ?worker.config.labels,
            "Worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match worker.run_once().await {
                Ok(RunOutcome::Idle) => {
                    tracing::debug!(worker = %worker.config.name, "No task available");
                    worker.config.poll_interval()
                }
                Ok(_) => Duration::ZERO,
                Err(e) => {
                    tracing::error!(worker = %worker.config.name, error = %e, "Worker cycle failed");
                    worker.config.poll_interval()
                }
            };

            if pause.is_zero() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(worker = %worker.config.name, "Worker stopped");
    }
}

// ============================================================================
// Worker Handle
// ============================================================================

/// Handle to a running worker
pub struct WorkerHandle {
    poll_handle: tokio::task::JoinHandle<()>,
    heartbeat_handle: tokio::task::JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl WorkerHandle {
    /// Wait for all tasks to complete
    pub async fn wait(self) {
        let _ = tokio::join!(self.poll_handle, self.heartbeat_handle);
    }

    /// Trigger shutdown and wait; an in-flight task finishes first
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.wait().await;
    }

    pub fn is_running(&self) -> bool {
        !self.poll_handle.is_finished() && !self.heartbeat_handle.is_finished()
    }
}
