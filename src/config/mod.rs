//! Configuration management for agentfleet
//!
//! Configuration is loaded from a TOML file or from environment variables.
//! Every section is optional in the file; missing sections and fields fall
//! back to their defaults.
//!
//! ```toml
//! [store]
//! url = "redis://localhost:6379"
//! key_prefix = "agentfleet"
//!
//! [pool.platforms.xhs]
//! daily_limit = 150
//! min_interval_secs = 20
//!
//! [worker]
//! name = "crawler-1"
//! labels = ["crawler:xhs"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::heartbeat::HeartbeatConfig;
use crate::phase::PhaseConfig;
use crate::pool::{PlatformLimits, PoolConfig, MAX_WAIT_SECS};
use crate::queue::QueueConfig;
use crate::store::StoreConfig;
use crate::worker::WorkerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordination store connection
    pub store: StoreConfig,

    /// Task queue retention and contention limits
    pub queue: QueueConfig,

    /// Credential pool rate limits
    pub pool: PoolConfig,

    /// Heartbeat cadence
    pub heartbeat: HeartbeatConfig,

    /// Pipeline phase expiry
    pub phase: PhaseConfig,

    /// Worker runtime
    pub worker: WorkerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            store: StoreConfig::from_env(),
            ..Default::default()
        };

        if let Some(secs) = env_parse("AGENTFLEET_HEARTBEAT_INTERVAL") {
            config.heartbeat.interval_secs = secs;
        }
        if let Some(secs) = env_parse("AGENTFLEET_HEARTBEAT_TTL") {
            config.heartbeat.ttl_secs = secs;
        }
        if let Some(secs) = env_parse("AGENTFLEET_PHASE_TTL") {
            config.phase.ttl_secs = secs;
        }

        if let Ok(name) = std::env::var("AGENTFLEET_WORKER_NAME") {
            config.worker.name = name;
        }
        if let Ok(labels) = std::env::var("AGENTFLEET_WORKER_LABELS") {
            config.worker.labels = labels
                .split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(ms) = env_parse("AGENTFLEET_POLL_INTERVAL_MS") {
            config.worker.poll_interval_ms = ms;
        }

        if let Ok(level) = std::env::var("AGENTFLEET_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("AGENTFLEET_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.store.pool_size == 0 {
            anyhow::bail!("store.pool_size must be greater than 0");
        }

        if self.store.key_prefix.is_empty() {
            anyhow::bail!("store.key_prefix must not be empty");
        }

        if self.queue.max_pop_attempts == 0 {
            anyhow::bail!("queue.max_pop_attempts must be greater than 0");
        }

        if self.pool.max_acquire_attempts == 0 {
            anyhow::bail!("pool.max_acquire_attempts must be greater than 0");
        }

        validate_limits("pool.default", &self.pool.default)?;
        for (platform, limits) in &self.pool.platforms {
            validate_limits(&format!("pool.platforms.{platform}"), limits)?;
        }

        if self.heartbeat.interval_secs == 0 {
            anyhow::bail!("heartbeat.interval_secs must be greater than 0");
        }

        if self.heartbeat.ttl_secs <= self.heartbeat.interval_secs {
            anyhow::bail!(
                "heartbeat.ttl_secs ({}) must be greater than heartbeat.interval_secs ({})",
                self.heartbeat.ttl_secs,
                self.heartbeat.interval_secs
            );
        }

        if self.phase.ttl_secs == 0 {
            anyhow::bail!("phase.ttl_secs must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!(
                "logging.format must be 'text' or 'json', got '{}'",
                self.logging.format
            );
        }

        Ok(())
    }
}

fn validate_limits(section: &str, limits: &PlatformLimits) -> Result<()> {
    if limits.daily_limit == 0 {
        anyhow::bail!("{section}.daily_limit must be greater than 0");
    }
    if limits.max_fail_count == 0 {
        anyhow::bail!("{section}.max_fail_count must be greater than 0");
    }
    if limits.min_interval_secs > MAX_WAIT_SECS {
        anyhow::bail!("{section}.min_interval_secs must be at most {MAX_WAIT_SECS}");
    }
    if limits.base_cooldown_secs > MAX_WAIT_SECS {
        anyhow::bail!("{section}.base_cooldown_secs must be at most {MAX_WAIT_SECS}");
    }
    Ok(())
}
