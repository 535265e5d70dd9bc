//! Worker liveness registry
//!
//! Each worker republishes a heartbeat record on a fixed cadence with a
//! short expiry. The registry never checks health actively: a worker whose
//! record has expired is simply considered offline.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::interval;

use crate::metrics;
use crate::store::{CoordinationStore, KeySpace, StoreResult};

// ============================================================================
// Configuration
// ============================================================================

/// Heartbeat cadence and expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds between two heartbeats
    pub interval_secs: u64,

    /// Seconds a record stays visible without being refreshed
    pub ttl_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            ttl_secs: 30,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

// ============================================================================
// Records
// ============================================================================

/// Self-reported worker status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Busy,
    Error,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Published heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub name: String,
    /// Labels the worker pops from
    pub labels: Vec<String>,
    pub status: WorkerStatus,
    pub current_task_id: Option<String>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

/// A worker as seen by monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLiveness {
    pub name: String,
    pub online: bool,
    /// Latest record, absent once it has expired
    pub record: Option<HeartbeatRecord>,
}

// ============================================================================
// Registry
// ============================================================================

/// Reads and writes heartbeat records
#[derive(Clone)]
pub struct LivenessRegistry {
    store: Arc<dyn CoordinationStore>,
    keys: KeySpace,
    config: HeartbeatConfig,
}

impl LivenessRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>, keys: KeySpace, config: HeartbeatConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Upsert a heartbeat with the configured expiry
    pub async fn beat(&self, record: &HeartbeatRecord) -> crate::Result<()> {
        let encoded = serde_json::to_string(record)?;
        self.store
            .set(
                &self.keys.heartbeat(&record.name),
                &encoded,
                Some(self.config.ttl()),
            )
            .await?;
        self.store
            .sadd(&self.keys.worker_index(), &record.name)
            .await?;
        Ok(())
    }

    /// Live record for `name`, `None` when the worker is offline
    pub async fn get(&self, name: &str) -> crate::Result<Option<HeartbeatRecord>> {
        match self.store.get(&self.keys.heartbeat(name)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Every worker that has ever reported, ordered by name
    pub async fn list(&self) -> crate::Result<Vec<WorkerLiveness>> {
        let names = self.known_workers().await?;
        let records = try_join_all(names.iter().map(|name| self.get(name))).await?;

        Ok(names
            .into_iter()
            .zip(records)
            .map(|(name, record)| WorkerLiveness {
                name,
                online: record.is_some(),
                record,
            })
            .collect())
    }

    async fn known_workers(&self) -> StoreResult<Vec<String>> {
        self.store.smembers(&self.keys.worker_index()).await
    }
}

// ============================================================================
// Worker-side state & reporter
// ============================================================================

/// In-process state a worker publishes through its heartbeat
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub name: String,
    pub labels: Vec<String>,
    pub status: WorkerStatus,
    pub current_task_id: Option<String>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub started_at: DateTime<Utc>,
}

impl WorkerState {
    pub fn new(name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            labels,
            status: WorkerStatus::Idle,
            current_task_id: None,
            tasks_completed: 0,
            tasks_failed: 0,
            started_at: Utc::now(),
        }
    }

    pub fn set_busy(&mut self, task_id: impl Into<String>) {
        self.status = WorkerStatus::Busy;
        self.current_task_id = Some(task_id.into());
    }

    pub fn set_idle(&mut self) {
        self.status = WorkerStatus::Idle;
        self.current_task_id = None;
    }

    /// Flag a worker-level problem (e.g. store unreachable)
    pub fn set_error(&mut self) {
        self.status = WorkerStatus::Error;
        self.current_task_id = None;
    }

    pub fn record_completed(&mut self) {
        self.tasks_completed += 1;
    }

    pub fn record_failed(&mut self) {
        self.tasks_failed += 1;
    }

    /// Heartbeat record stamped with the current time
    pub fn snapshot(&self) -> HeartbeatRecord {
        HeartbeatRecord {
            name: self.name.clone(),
            labels: self.labels.clone(),
            status: self.status,
            current_task_id: self.current_task_id.clone(),
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            started_at: self.started_at,
            last_heartbeat: Utc::now(),
        }
    }
}

pub type SharedWorkerState = Arc<RwLock<WorkerState>>;

/// Publishes a worker's state on the heartbeat interval
pub struct HeartbeatReporter {
    registry: LivenessRegistry,
    state: SharedWorkerState,
}

impl HeartbeatReporter {
    pub fn new(registry: LivenessRegistry, state: SharedWorkerState) -> Self {
        Self { registry, state }
    }

    /// Spawn the heartbeat loop; it beats immediately, then every interval
    /// until `shutdown` changes.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.registry.config().interval());

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let record = self.state.read().await.snapshot();
                        match self.registry.beat(&record).await {
                            Ok(()) => {
                                metrics::record_heartbeat(&record.name);
                                tracing::debug!(worker = %record.name, status = %record.status, "Heartbeat sent");
                            }
                            Err(e) => {
                                metrics::record_heartbeat_error();
                                tracing::warn!(worker = %record.name, error = %e, "Heartbeat failed");
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Heartbeat task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
