//! agentfleet - task distribution and credential leasing for agent workers
//!
//! Coordinates a fleet of worker processes ("agents") that crawl, analyze
//! and search social-media content, over a shared Redis-compatible store.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`store`] - Coordination store trait with Redis and in-memory backends
//! - [`models`] - Task, priority, status and outcome types
//! - [`queue`] - Per-label priority queues with retry and dead-lettering
//! - [`pool`] - Rate-limited credential leasing per platform
//! - [`heartbeat`] - Worker liveness records with expiry-based offline detection
//! - [`phase`] - Per-entity pipeline phase tracking with fire-once continuations
//! - [`worker`] - Poll loop tying a task handler to the queue and heartbeat
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus counters and gauges
//! - [`utils`] - Retry with backoff for store errors
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use agentfleet::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(RedisStore::new(&config.store).await?);
//!     let keys = KeySpace::new(config.store.key_prefix.clone());
//!     let queue = TaskQueue::new(store, keys, config.queue.clone());
//!
//!     let mut task = Task::new("crawler:xhs", serde_json::json!({"keyword": "coffee"}))
//!         .with_priority(TaskPriority::High);
//!     queue.push(&mut task).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod metrics;
pub mod models;
pub mod phase;
pub mod pool;
pub mod queue;
pub mod store;
pub mod utils;
pub mod worker;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, FleetErrorTrait, Result};
    pub use crate::heartbeat::{HeartbeatRecord, LivenessRegistry, WorkerStatus};
    pub use crate::models::{DeadLetter, Task, TaskOutcome, TaskPriority, TaskStatus};
    pub use crate::phase::{CompletionDescriptor, EntityRef, PhaseTracker, PhaseTransition};
    pub use crate::pool::{Credential, CredentialPool, PlatformLimits, PoolConfig};
    pub use crate::queue::{QueueConfig, TaskQueue};
    pub use crate::store::{CoordinationStore, KeySpace, MemoryStore, RedisStore};
    pub use crate::worker::{TaskHandler, Worker, WorkerConfig};
}

// Direct re-exports for convenience
pub use models::{Task, TaskOutcome, TaskPriority, TaskStatus};
