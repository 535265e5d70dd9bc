//! Coordination store client
//!
//! Every piece of shared state (queues, task status, credentials,
//! heartbeats, pipeline phases) lives in a Redis-protocol store. The core
//! only talks to it through the [`CoordinationStore`] trait so that the
//! same queue and pool logic runs against Redis in production and against
//! the in-process [`MemoryStore`] in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use agentfleet::store::{RedisStore, StoreConfig};
//!
//! let config = StoreConfig::from_env();
//! let store = RedisStore::new(&config).await?;
//! store.ping().await?;
//! ```

pub mod keys;
pub mod memory;
pub mod redis_backend;

#[cfg(test)]
pub(crate) mod faulty;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use self::keys::KeySpace;
pub use self::memory::MemoryStore;
pub use self::redis_backend::RedisStore;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            key_prefix: "agentfleet".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            pool_size: std::env::var("REDIS_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pool_size),
            key_prefix: std::env::var("AGENTFLEET_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }
}

/// Errors raised by a coordination store backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// Could not obtain a pooled connection
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Command failed on the Redis side
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Key holds a value of a different type than the command expects
    #[error("Wrong type for key '{key}': expected {expected}")]
    WrongType { key: String, expected: &'static str },

    /// Stored value is not a valid integer
    #[error("Value at '{key}' is not an integer")]
    NotAnInteger { key: String },
}

impl StoreError {
    /// Connection and server errors are worth retrying, type errors are not
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Pool(_) => true,
            Self::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_timeout()
            }
            Self::WrongType { .. } | Self::NotAnInteger { .. } => false,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Primitive operations the coordination core needs from its store.
///
/// Each method is a single atomic command on the backing store. Anything
/// needing more than one key is composed by the caller and documented as
/// non-transactional there.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Round-trip check
    async fn ping(&self) -> StoreResult<()>;

    // ---- sorted sets -----------------------------------------------------

    /// Add or update `member` with `score`
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// Lowest-scored member (ties ordered by member bytes)
    async fn zpeek_min(&self, key: &str) -> StoreResult<Option<(String, f64)>>;

    /// Remove `member`; returns false if it was not present
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Number of members
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    // ---- strings ---------------------------------------------------------

    /// Set a string value with optional expiry
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Atomically read and delete
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;

    async fn del(&self, key: &str) -> StoreResult<()>;

    /// Replace the value only if it still equals `expected`.
    ///
    /// A successful swap clears any expiry on the key. Returns whether the
    /// swap happened.
    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool>;

    /// Increment an integer value (missing keys count as 0)
    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64>;

    // ---- hashes ----------------------------------------------------------

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()>;

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Set a time-to-live on an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    // ---- lists -----------------------------------------------------------

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Inclusive range; negative indices count from the end
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    async fn llen(&self, key: &str) -> StoreResult<u64>;

    // ---- sets ------------------------------------------------------------

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Members in sorted order
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;
}
