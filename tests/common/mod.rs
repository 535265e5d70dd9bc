//! Common test utilities

use std::sync::Arc;

use agentfleet::heartbeat::{HeartbeatConfig, LivenessRegistry};
use agentfleet::phase::{PhaseConfig, PhaseTracker};
use agentfleet::pool::{CredentialPool, PoolConfig};
use agentfleet::queue::{QueueConfig, TaskQueue};
use agentfleet::store::{CoordinationStore, KeySpace, MemoryStore};

/// Every component wired to one in-memory store
pub struct Fleet {
    pub store: Arc<dyn CoordinationStore>,
    pub keys: KeySpace,
    pub queue: TaskQueue,
    pub pool: CredentialPool,
    pub registry: LivenessRegistry,
    pub phases: PhaseTracker,
}

/// Build a fleet with default settings
pub fn fleet() -> Fleet {
    fleet_with_pool(PoolConfig::default())
}

/// Build a fleet with custom credential limits
pub fn fleet_with_pool(pool_config: PoolConfig) -> Fleet {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("it");
    Fleet {
        queue: TaskQueue::new(store.clone(), keys.clone(), QueueConfig::default()),
        pool: CredentialPool::new(store.clone(), keys.clone(), pool_config),
        registry: LivenessRegistry::new(store.clone(), keys.clone(), HeartbeatConfig::default()),
        phases: PhaseTracker::new(store.clone(), keys.clone(), PhaseConfig::default()),
        store,
        keys,
    }
}

/// Labels as owned strings
#[allow(dead_code)]
pub fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
