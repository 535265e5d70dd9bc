pub mod credential;
pub mod monitor;
pub mod queue;

use anyhow::{Context as _, Result};
use std::path::Path;
use std::sync::Arc;

use agentfleet::config::Config;
use agentfleet::store::{CoordinationStore, KeySpace, RedisStore};

// Re-export command functions for convenience
pub use credential::{add_credential, list_credentials, reactivate_credential};
pub use monitor::{metrics, phase_show, workers};
pub use queue::{dead_letters, push, queue_len, PushParams};

/// Load configuration from `path` when given, otherwise from the environment
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Connected store plus the key namespace every component shares
pub struct Context {
    pub config: Config,
    pub store: Arc<dyn CoordinationStore>,
    pub keys: KeySpace,
}

impl Context {
    pub async fn connect(config: Config) -> Result<Self> {
        let store = RedisStore::new(&config.store)
            .await
            .with_context(|| format!("Failed to connect to {}", config.store.url))?;
        let keys = KeySpace::new(config.store.key_prefix.clone());
        Ok(Self {
            config,
            store: Arc::new(store),
            keys,
        })
    }
}
