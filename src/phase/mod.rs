//! Pipeline phase tracker
//!
//! Records which stage of a multi-step job an entity (a topic, a user
//! profile) is in. Entering a fan-out phase seeds a pending counter and
//! optionally stores a one-shot continuation that is handed out exactly
//! once, to whichever caller drives the counter to zero.
//!
//! Each fan-out gets its own id, and its counter and continuation live under
//! keys carrying that id. Draining one fan-out therefore never touches the
//! keys of a fan-out that replaced it mid-drain. Entering a new phase
//! discards the continuation of the fan-out it replaces.
//!
//! # Persisted state
//!
//! - `{prefix}:phase:{type}:{id}`: hash with `phase`, `total`, `done`,
//!   `fanout`, `error_msg`, `updated_at`
//! - `{prefix}:phase:{type}:{id}:pending:{fanout}`: remaining sub-units
//! - `{prefix}:phase:{type}:{id}:on_complete:{fanout}`: [`CompletionDescriptor`] JSON
//!
//! Everything expires after `ttl_secs` so a stuck entity cannot block
//! scheduling forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{Task, TaskPriority};
use crate::queue::TaskQueue;
use crate::store::{CoordinationStore, KeySpace};
use crate::Result;

/// Phase name reported for entities with no stored state
pub const PHASE_NONE: &str = "none";

/// Phase tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Expiry for every phase key
    pub ttl_secs: u64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 3600,
        }
    }
}

impl PhaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Entity whose pipeline is being tracked
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// Current phase of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: String,
    pub total: u64,
    pub done: u64,
    pub error_msg: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PhaseRecord {
    fn from_fields(mut fields: HashMap<String, String>) -> Self {
        let mut take = |name: &str| fields.remove(name).filter(|v| !v.is_empty());
        Self {
            phase: take("phase").unwrap_or_else(|| PHASE_NONE.to_string()),
            total: take("total").and_then(|v| v.parse().ok()).unwrap_or(0),
            done: take("done").and_then(|v| v.parse().ok()).unwrap_or(0),
            error_msg: take("error_msg"),
            updated_at: take("updated_at")
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Deferred continuation fired when a fan-out phase drains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionDescriptor {
    /// Label of the task to push
    pub label: String,
    pub payload: serde_json::Value,
    /// Phase the entity moves to once the continuation is pushed
    pub next_phase: String,
    #[serde(default)]
    pub priority: TaskPriority,
}

impl CompletionDescriptor {
    pub fn new(
        label: impl Into<String>,
        payload: serde_json::Value,
        next_phase: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            payload,
            next_phase: next_phase.into(),
            priority: TaskPriority::default(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Requested phase change
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTransition {
    pub phase: String,
    /// Sub-units the phase waits for; `None` for a plain phase
    pub total: Option<u64>,
    pub on_complete: Option<CompletionDescriptor>,
}

impl PhaseTransition {
    pub fn to(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            total: None,
            on_complete: None,
        }
    }

    /// Wait for `total` sub-unit completions
    pub fn expecting(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Continuation to hand out when the pending counter reaches zero
    pub fn then(mut self, descriptor: CompletionDescriptor) -> Self {
        self.on_complete = Some(descriptor);
        self
    }
}

/// Result of reporting one finished sub-unit
#[derive(Debug, Clone, PartialEq)]
pub enum UnitProgress {
    /// No pending counter exists (plain phase, or state expired)
    Untracked,
    /// Sub-units still outstanding
    Remaining(u64),
    /// Counter reached zero; the descriptor (if any) now belongs to this caller
    Drained(Option<CompletionDescriptor>),
}

/// Per-entity phase state machine over a coordination store
#[derive(Clone)]
pub struct PhaseTracker {
    store: Arc<dyn CoordinationStore>,
    keys: KeySpace,
    config: PhaseConfig,
}

impl PhaseTracker {
    pub fn new(store: Arc<dyn CoordinationStore>, keys: KeySpace, config: PhaseConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    /// Overwrite the entity's phase.
    ///
    /// A transition with `total` resets `done` to zero and seeds the pending
    /// counter of a fresh fan-out. A zero total never drains through
    /// [`complete_unit`]; callers with nothing to wait for should fire the
    /// continuation themselves.
    ///
    /// [`complete_unit`]: Self::complete_unit
    pub async fn set_phase(&self, entity: &EntityRef, transition: PhaseTransition) -> Result<()> {
        let ttl = self.config.ttl();
        let phase_key = self.phase_key(entity);
        let previous = self.current_fanout(entity).await?;
        let fanout = transition.total.map(|_| Uuid::new_v4().simple().to_string());

        // the new fan-out's keys exist before the hash points at them
        if let (Some(fanout), Some(total)) = (&fanout, transition.total) {
            self.store
                .set(&self.pending_key(entity, fanout), &total.to_string(), Some(ttl))
                .await?;
            if let Some(descriptor) = &transition.on_complete {
                self.store
                    .set(
                        &self.descriptor_key(entity, fanout),
                        &serde_json::to_string(descriptor)?,
                        Some(ttl),
                    )
                    .await?;
            }
        }

        let fields = vec![
            ("phase".to_string(), transition.phase.clone()),
            ("total".to_string(), transition.total.unwrap_or(0).to_string()),
            ("done".to_string(), "0".to_string()),
            ("fanout".to_string(), fanout.clone().unwrap_or_default()),
            ("error_msg".to_string(), String::new()),
            ("updated_at".to_string(), Utc::now().to_rfc3339()),
        ];
        self.store.hset_multiple(&phase_key, &fields).await?;
        self.store.expire(&phase_key, ttl).await?;

        if let Some(previous) = previous {
            self.store.del(&self.pending_key(entity, &previous)).await?;
            self.store.del(&self.descriptor_key(entity, &previous)).await?;
        }

        tracing::info!(
            entity = %entity,
            phase = %transition.phase,
            total = ?transition.total,
            has_continuation = transition.on_complete.is_some(),
            "Phase set"
        );
        Ok(())
    }

    /// Current phase, `None` while the entity is in the initial state
    pub async fn get_phase(&self, entity: &EntityRef) -> Result<Option<PhaseRecord>> {
        let fields = self.store.hgetall(&self.phase_key(entity)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(PhaseRecord::from_fields(fields)))
    }

    /// Annotate the entity with its latest error without changing phase
    pub async fn set_error(&self, entity: &EntityRef, error_msg: &str) -> Result<()> {
        let phase_key = self.phase_key(entity);
        let fields = vec![
            ("error_msg".to_string(), error_msg.to_string()),
            ("updated_at".to_string(), Utc::now().to_rfc3339()),
        ];
        self.store.hset_multiple(&phase_key, &fields).await?;
        self.store.expire(&phase_key, self.config.ttl()).await?;
        tracing::warn!(entity = %entity, error = %error_msg, "Phase error recorded");
        Ok(())
    }

    /// Remaining sub-units, `None` when no fan-out is active
    pub async fn pending(&self, entity: &EntityRef) -> Result<Option<u64>> {
        let Some(fanout) = self.current_fanout(entity).await? else {
            return Ok(None);
        };
        let raw = self.store.get(&self.pending_key(entity, &fanout)).await?;
        Ok(raw.and_then(|v| v.parse::<i64>().ok()).map(|n| n.max(0) as u64))
    }

    /// Report one finished sub-unit.
    ///
    /// The caller that drives the counter to zero atomically takes the
    /// stored continuation; every other caller sees it already gone. A unit
    /// that reports after the entity entered a new fan-out counts toward
    /// the new one.
    pub async fn complete_unit(&self, entity: &EntityRef) -> Result<UnitProgress> {
        let Some(fanout) = self.current_fanout(entity).await? else {
            tracing::debug!(entity = %entity, "Unit completed with no active fan-out");
            return Ok(UnitProgress::Untracked);
        };
        let pending_key = self.pending_key(entity, &fanout);
        if self.store.get(&pending_key).await?.is_none() {
            tracing::debug!(entity = %entity, "Unit completed with no pending counter");
            return Ok(UnitProgress::Untracked);
        }

        let remaining = self.store.incr_by(&pending_key, -1).await?;
        if remaining < 0 {
            // counter drained or expired between the read and the decrement
            self.store.del(&pending_key).await?;
            return Ok(UnitProgress::Untracked);
        }

        let phase_key = self.phase_key(entity);
        self.store.hincr_by(&phase_key, "done", 1).await?;
        self.store.expire(&phase_key, self.config.ttl()).await?;

        if remaining > 0 {
            return Ok(UnitProgress::Remaining(remaining as u64));
        }

        let descriptor = self.drain(entity, &fanout).await?;
        tracing::info!(
            entity = %entity,
            has_continuation = descriptor.is_some(),
            "Phase sub-units drained"
        );
        Ok(UnitProgress::Drained(descriptor))
    }

    /// Push the continuation task and move the entity to its next phase
    pub async fn fire_completion(
        &self,
        entity: &EntityRef,
        descriptor: CompletionDescriptor,
        queue: &TaskQueue,
    ) -> Result<Task> {
        let mut task = Task::new(descriptor.label, descriptor.payload)
            .with_priority(descriptor.priority)
            .with_parent_job(entity.to_string());
        queue.push(&mut task).await?;

        self.set_phase(entity, PhaseTransition::to(descriptor.next_phase))
            .await?;

        tracing::info!(
            entity = %entity,
            task_id = %task.id,
            label = %task.label,
            "Phase continuation fired"
        );
        Ok(task)
    }

    /// Drop a drained fan-out's counter and take its continuation
    async fn drain(&self, entity: &EntityRef, fanout: &str) -> Result<Option<CompletionDescriptor>> {
        self.store.del(&self.pending_key(entity, fanout)).await?;
        match self.store.take(&self.descriptor_key(entity, fanout)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn current_fanout(&self, entity: &EntityRef) -> Result<Option<String>> {
        let mut fields = self.store.hgetall(&self.phase_key(entity)).await?;
        Ok(fields.remove("fanout").filter(|f| !f.is_empty()))
    }

    fn phase_key(&self, entity: &EntityRef) -> String {
        self.keys.phase(&entity.entity_type, &entity.entity_id)
    }

    fn pending_key(&self, entity: &EntityRef, fanout: &str) -> String {
        self.keys
            .phase_pending(&entity.entity_type, &entity.entity_id, fanout)
    }

    fn descriptor_key(&self, entity: &EntityRef, fanout: &str) -> String {
        self.keys
            .phase_on_complete(&entity.entity_type, &entity.entity_id, fanout)
    }
}
