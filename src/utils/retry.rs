//! Retry utilities for store operations
//!
//! The coordination core never retries on its own when the store is
//! unavailable; callers that want resilience (the worker runtime, the CLI)
//! wrap calls with [`with_retry`], which backs off exponentially and only
//! retries errors that report themselves as recoverable.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::FleetErrorTrait;

/// Configuration for retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,

    /// Add up to 10% random jitter so workers do not retry in lockstep
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a retry configuration with custom delays
    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            ..Default::default()
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay before retry number `attempt` (0 means the first try)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential =
            self.base_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        let mut delay_ms = (exponential as u64).min(self.max_delay_ms);

        if self.jitter && delay_ms > 0 {
            delay_ms += rand::thread_rng().gen_range(0..=delay_ms / 10);
        }

        Duration::from_millis(delay_ms)
    }
}

/// Run `operation`, retrying recoverable errors with exponential backoff
///
/// # Example
///
/// ```no_run
/// use agentfleet::utils::retry::{with_retry, RetryConfig};
///
/// # async fn demo(queue: agentfleet::queue::TaskQueue) -> agentfleet::Result<()> {
/// let config = RetryConfig::default();
/// let depth = with_retry(&config, || async {
///     queue.get_queue_length("crawler:xhs").await.map_err(agentfleet::Error::from)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    E: FleetErrorTrait,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_if(config, operation, |e: &E| e.is_recoverable()).await
}

/// Execute an operation with retry logic, using a custom retry predicate
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = config.calculate_delay(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(e);
                }
                if attempt >= config.max_retries {
                    warn!(
                        attempts = attempt + 1,
                        error = %e,
                        "Operation failed, retries exhausted"
                    );
                    return Err(e);
                }

                warn!(
                    attempt = attempt,
                    max_retries = config.max_retries,
                    error = %e,
                    "Operation failed, will retry"
                );
                attempt += 1;
            }
        }
    }
}
