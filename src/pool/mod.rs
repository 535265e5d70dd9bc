//! Credential leasing pool
//!
//! Shared platform credentials (cookies, tokens) are leased to crawl
//! workers one request at a time. Each platform has its own rate limits:
//! a daily usage cap, a minimum spacing between uses, and a failure
//! threshold after which the credential is switched off until an operator
//! reactivates it. Consecutive failures also put the credential into a
//! linearly growing cooldown.
//!
//! Credential records are stored as JSON strings so that `acquire` can
//! update them with a compare-and-swap: two workers racing for the same
//! least-used credential cannot both win it; the loser re-runs selection.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::metrics;
use crate::store::{CoordinationStore, KeySpace, StoreError};

// ============================================================================
// Configuration
// ============================================================================

/// Rate limits for one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformLimits {
    /// Leases per credential per UTC day
    pub daily_limit: u32,

    /// Minimum seconds between two leases of the same credential
    pub min_interval_secs: u64,

    /// Consecutive failures before the credential is deactivated
    pub max_fail_count: u32,

    /// Cooldown per consecutive failure
    pub base_cooldown_secs: u64,
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Self {
            daily_limit: 200,
            min_interval_secs: 5,
            max_fail_count: 3,
            base_cooldown_secs: 60,
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Limits for platforms without their own entry
    pub default: PlatformLimits,

    /// Per-platform overrides
    pub platforms: HashMap<String, PlatformLimits>,

    /// Selection rounds `acquire` runs before giving up on contention
    pub max_acquire_attempts: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default: PlatformLimits::default(),
            platforms: HashMap::new(),
            max_acquire_attempts: 5,
        }
    }
}

impl PoolConfig {
    pub fn limits_for(&self, platform: &str) -> &PlatformLimits {
        self.platforms.get(platform).unwrap_or(&self.default)
    }

    pub fn with_platform(mut self, platform: impl Into<String>, limits: PlatformLimits) -> Self {
        self.platforms.insert(platform.into(), limits);
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum PoolError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to encode or decode credential: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Credential already exists: {0}")]
    AlreadyExists(String),

    #[error("Credential {0} kept changing underneath the update")]
    Contention(String),
}

pub type PoolResult<T> = std::result::Result<T, PoolError>;

// ============================================================================
// Credential
// ============================================================================

/// A shared, rate-limited platform credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub platform: String,
    /// Opaque access material handed to the crawler
    pub secret: String,
    pub is_active: bool,
    pub fail_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub use_count_today: u32,
    pub use_count_date: Option<NaiveDate>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Why a credential was skipped during selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    Inactive,
    TooManyFailures,
    CoolingDown,
    DailyLimitReached,
    UsedTooRecently,
}

impl Credential {
    pub fn new(
        id: impl Into<String>,
        platform: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            platform: platform.into(),
            secret: secret.into(),
            is_active: true,
            fail_count: 0,
            cooldown_until: None,
            use_count_today: 0,
            use_count_date: None,
            last_used_at: None,
            last_error: None,
        }
    }

    /// Zero the daily counter when it belongs to an earlier day
    pub fn roll_daily_counter(&mut self, today: NaiveDate) {
        if self.use_count_date != Some(today) {
            self.use_count_today = 0;
            self.use_count_date = Some(today);
        }
    }

    /// Run the selection filters in order; the daily counter must already be rolled
    pub fn check_eligible(
        &self,
        limits: &PlatformLimits,
        now: DateTime<Utc>,
    ) -> Result<(), Ineligible> {
        if !self.is_active {
            return Err(Ineligible::Inactive);
        }
        if self.fail_count >= limits.max_fail_count {
            return Err(Ineligible::TooManyFailures);
        }
        if self.cooldown_until.is_some_and(|until| now < until) {
            return Err(Ineligible::CoolingDown);
        }
        if self.use_count_today >= limits.daily_limit {
            return Err(Ineligible::DailyLimitReached);
        }
        if let Some(last) = self.last_used_at {
            if now - last < bounded_seconds(limits.min_interval_secs) {
                return Err(Ineligible::UsedTooRecently);
            }
        }
        Ok(())
    }
}

/// Longest spacing or cooldown the pool applies (ten years)
pub const MAX_WAIT_SECS: u64 = 10 * 365 * 24 * 3600;

/// Seconds as a chrono duration, saturating at [`MAX_WAIT_SECS`]
fn bounded_seconds(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs.min(MAX_WAIT_SECS)).unwrap_or(i64::MAX);
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

// ============================================================================
// CredentialPool
// ============================================================================

/// Per-platform credential pool over a coordination store
#[derive(Clone)]
pub struct CredentialPool {
    store: Arc<dyn CoordinationStore>,
    keys: KeySpace,
    config: PoolConfig,
}

impl CredentialPool {
    pub fn new(store: Arc<dyn CoordinationStore>, keys: KeySpace, config: PoolConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Register a credential and index it under its platform
    pub async fn add_credential(&self, credential: &Credential) -> PoolResult<()> {
        let key = self.keys.credential(&credential.id);
        if self.store.get(&key).await?.is_some() {
            return Err(PoolError::AlreadyExists(credential.id.clone()));
        }

        self.store
            .set(&key, &serde_json::to_string(credential)?, None)
            .await?;
        self.store
            .sadd(&self.keys.platform_index(&credential.platform), &credential.id)
            .await?;

        tracing::info!(
            credential_id = %credential.id,
            platform = %credential.platform,
            "Credential registered"
        );
        Ok(())
    }

    pub async fn get_credential(&self, credential_id: &str) -> PoolResult<Option<Credential>> {
        Ok(self
            .read(credential_id)
            .await?
            .map(|(_, credential)| credential))
    }

    /// Every credential indexed for `platform`, ordered by id
    pub async fn list_credentials(&self, platform: &str) -> PoolResult<Vec<Credential>> {
        let mut credentials = Vec::new();
        for id in self.store.smembers(&self.keys.platform_index(platform)).await? {
            if let Some((_, credential)) = self.read(&id).await? {
                credentials.push(credential);
            }
        }
        Ok(credentials)
    }

    /// Lease the least-used eligible credential for `platform`
    pub async fn acquire(&self, platform: &str) -> PoolResult<Option<Credential>> {
        self.acquire_at(platform, Utc::now()).await
    }

    /// [`acquire`](Self::acquire) evaluated at an explicit `now`.
    ///
    /// Returns `Ok(None)` when no credential passes the filters; callers
    /// should park their work and retry later.
    pub async fn acquire_at(
        &self,
        platform: &str,
        now: DateTime<Utc>,
    ) -> PoolResult<Option<Credential>> {
        let limits = self.config.limits_for(platform);
        let today = now.date_naive();

        for attempt in 0..self.config.max_acquire_attempts {
            let mut best: Option<(String, Credential)> = None;

            for id in self.store.smembers(&self.keys.platform_index(platform)).await? {
                let Some((raw, mut credential)) = self.read(&id).await? else {
                    continue;
                };
                credential.roll_daily_counter(today);
                if let Err(reason) = credential.check_eligible(limits, now) {
                    tracing::debug!(credential_id = %id, ?reason, "Credential skipped");
                    continue;
                }
                // smembers is sorted, so strict < keeps the lowest id on ties
                let better = match &best {
                    Some((_, current)) => credential.use_count_today < current.use_count_today,
                    None => true,
                };
                if better {
                    best = Some((raw, credential));
                }
            }

            let Some((raw, mut credential)) = best else {
                metrics::record_credential_shortage(platform);
                tracing::debug!(platform = %platform, "No credential available");
                return Ok(None);
            };

            credential.last_used_at = Some(now);
            credential.use_count_today += 1;

            let key = self.keys.credential(&credential.id);
            let updated = serde_json::to_string(&credential)?;
            if self.store.compare_and_swap(&key, &raw, &updated).await? {
                metrics::record_credential_acquired(platform);
                tracing::debug!(
                    credential_id = %credential.id,
                    platform = %platform,
                    use_count_today = credential.use_count_today,
                    "Credential leased"
                );
                return Ok(Some(credential));
            }

            tracing::debug!(
                credential_id = %credential.id,
                attempt,
                "Credential changed during acquire, reselecting"
            );
        }

        tracing::warn!(
            platform = %platform,
            attempts = self.config.max_acquire_attempts,
            "Acquire contention exhausted attempts"
        );
        metrics::record_credential_shortage(platform);
        Ok(None)
    }

    /// Clear failure state after a successful use
    pub async fn report_success(&self, credential_id: &str) -> PoolResult<Credential> {
        self.update(credential_id, |credential| {
            credential.fail_count = 0;
            credential.cooldown_until = None;
        })
        .await
    }

    pub async fn report_failure(&self, credential_id: &str, error: &str) -> PoolResult<Credential> {
        self.report_failure_at(credential_id, error, Utc::now()).await
    }

    /// Count a failure, start a cooldown, and deactivate at the threshold
    pub async fn report_failure_at(
        &self,
        credential_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> PoolResult<Credential> {
        let config = &self.config;
        let credential = self
            .update(credential_id, |credential| {
                let limits = config.limits_for(&credential.platform);
                credential.fail_count = credential.fail_count.saturating_add(1);
                let cooldown = bounded_seconds(
                    limits
                        .base_cooldown_secs
                        .saturating_mul(u64::from(credential.fail_count)),
                );
                credential.cooldown_until = Some(now.checked_add_signed(cooldown).unwrap_or(now));
                credential.last_error = Some(error.to_string());
                if credential.fail_count >= limits.max_fail_count {
                    credential.is_active = false;
                }
            })
            .await?;

        metrics::record_credential_failure(&credential.platform, !credential.is_active);
        if credential.is_active {
            tracing::warn!(
                credential_id = %credential.id,
                platform = %credential.platform,
                fail_count = credential.fail_count,
                cooldown_until = ?credential.cooldown_until,
                error = %error,
                "Credential failure, cooling down"
            );
        } else {
            tracing::warn!(
                credential_id = %credential.id,
                platform = %credential.platform,
                fail_count = credential.fail_count,
                error = %error,
                "Credential deactivated after repeated failures"
            );
        }
        Ok(credential)
    }

    /// Operator action: put a deactivated credential back in rotation
    pub async fn reactivate(&self, credential_id: &str) -> PoolResult<Credential> {
        let credential = self
            .update(credential_id, |credential| {
                credential.is_active = true;
                credential.fail_count = 0;
                credential.cooldown_until = None;
            })
            .await?;
        tracing::info!(
            credential_id = %credential.id,
            platform = %credential.platform,
            "Credential reactivated"
        );
        Ok(credential)
    }

    async fn read(&self, credential_id: &str) -> PoolResult<Option<(String, Credential)>> {
        match self.store.get(&self.keys.credential(credential_id)).await? {
            Some(raw) => {
                let credential = serde_json::from_str(&raw)?;
                Ok(Some((raw, credential)))
            }
            None => Ok(None),
        }
    }

    /// Read-modify-CAS loop on one credential record
    async fn update<F>(&self, credential_id: &str, mut apply: F) -> PoolResult<Credential>
    where
        F: FnMut(&mut Credential),
    {
        let key = self.keys.credential(credential_id);
        for _ in 0..self.config.max_acquire_attempts {
            let (raw, mut credential) = self
                .read(credential_id)
                .await?
                .ok_or_else(|| PoolError::CredentialNotFound(credential_id.to_string()))?;
            apply(&mut credential);
            let updated = serde_json::to_string(&credential)?;
            if self.store.compare_and_swap(&key, &raw, &updated).await? {
                return Ok(credential);
            }
        }
        Err(PoolError::Contention(credential_id.to_string()))
    }
}
