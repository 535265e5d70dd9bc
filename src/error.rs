//! Unified error handling for the agentfleet crate
//!
//! Each component keeps its own error enum ([`StoreError`], [`QueueError`],
//! [`PoolError`]) and this module folds them into one [`Error`] for callers
//! that cross component boundaries.
//!
//! "Nothing to do" results (an empty queue, no eligible credential) are
//! never errors; they come back as `Ok(None)`. Errors are reserved for
//! the store being unavailable, corrupt records, and invalid requests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use agentfleet::error::{Error, FleetErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "retrying after backoff");
//!     } else {
//!         tracing::error!(error = %err, category = ?err.category(), "giving up");
//!     }
//! }
//! ```

use thiserror::Error;

pub use crate::pool::PoolError;
pub use crate::queue::QueueError;
pub use crate::store::StoreError;

/// Common trait for all agentfleet error types
pub trait FleetErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Coordination store unreachable or rejecting commands
    Store,
    /// Stored record could not be encoded/decoded
    Codec,
    /// Queue misuse (bad lifecycle transition, no labels)
    Queue,
    /// Credential pool misuse (unknown credential)
    Pool,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Codec => "codec",
            Self::Queue => "queue",
            Self::Pool => "pool",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the agentfleet crate
#[derive(Error, Debug)]
pub enum Error {
    /// Coordination store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Task queue errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Credential pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl FleetErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        StoreError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Store
    }
}

impl FleetErrorTrait for QueueError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            _ => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(_) => ErrorCategory::Store,
            Self::Serialization(_) => ErrorCategory::Codec,
            _ => ErrorCategory::Queue,
        }
    }
}

impl FleetErrorTrait for PoolError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Contention(_) => true,
            _ => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(_) => ErrorCategory::Store,
            Self::Serialization(_) => ErrorCategory::Codec,
            _ => ErrorCategory::Pool,
        }
    }
}

impl FleetErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Queue(e) => e.is_recoverable(),
            Self::Pool(e) => e.is_recoverable(),
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::Queue(e) => e.category(),
            Self::Pool(e) => e.category(),
            Self::Json(_) => ErrorCategory::Codec,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
