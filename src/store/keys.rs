//! Key layout for everything the core persists

/// Builds store keys under a single namespace prefix
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("agentfleet")
    }
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Sorted set of pending tasks for one label
    pub fn queue(&self, label: &str) -> String {
        format!("{}:queue:{}", self.prefix, label)
    }

    /// Sorted set of deferred tasks for one label, scored by ready time (ms)
    pub fn delayed(&self, label: &str) -> String {
        format!("{}:delayed:{}", self.prefix, label)
    }

    /// Status hash for one task
    pub fn task_status(&self, task_id: &str) -> String {
        format!("{}:task:{}:status", self.prefix, task_id)
    }

    /// Result blob for one task
    pub fn task_result(&self, task_id: &str) -> String {
        format!("{}:task:{}:result", self.prefix, task_id)
    }

    /// Dead-letter list
    pub fn dead_letter(&self) -> String {
        format!("{}:dead_letter", self.prefix)
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    pub fn credential(&self, credential_id: &str) -> String {
        format!("{}:credential:{}", self.prefix, credential_id)
    }

    /// Set of credential ids registered for a platform
    pub fn platform_index(&self, platform: &str) -> String {
        format!("{}:credentials:{}", self.prefix, platform)
    }

    // =========================================================================
    // Heartbeats
    // =========================================================================

    pub fn heartbeat(&self, worker: &str) -> String {
        format!("{}:heartbeat:{}", self.prefix, worker)
    }

    /// Set of every worker name that has ever reported
    pub fn worker_index(&self) -> String {
        format!("{}:workers", self.prefix)
    }

    // =========================================================================
    // Pipeline phases
    // =========================================================================

    pub fn phase(&self, entity_type: &str, entity_id: &str) -> String {
        format!("{}:phase:{}:{}", self.prefix, entity_type, entity_id)
    }

    /// Pending counter of one fan-out
    pub fn phase_pending(&self, entity_type: &str, entity_id: &str, fanout: &str) -> String {
        format!(
            "{}:phase:{}:{}:pending:{}",
            self.prefix, entity_type, entity_id, fanout
        )
    }

    /// Continuation of one fan-out
    pub fn phase_on_complete(&self, entity_type: &str, entity_id: &str, fanout: &str) -> String {
        format!(
            "{}:phase:{}:{}:on_complete:{}",
            self.prefix, entity_type, entity_id, fanout
        )
    }
}
