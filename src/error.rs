//! Error types for the appendage system.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Appendage error: {0}")]
    Appendage(#[from] AppendageError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors surfaced by the coordinator and its workers.
///
/// Admission and lookup failures are returned synchronously from the
/// coordinator. Execution failures never escape a worker as an error; they are
/// folded into a failed `TaskResult` and only resurface here when a waiter is
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppendageError {
    #[error("Maximum concurrent appendages ({max}) exceeded")]
    CapacityExceeded { max: usize },

    #[error("Appendage {id} not found")]
    InvalidTask { id: Uuid },

    #[error("Appendage {id} already used; task ids cannot be reused")]
    DuplicateTask { id: Uuid },

    #[error("Appendage {id} timed out after {timeout:?}")]
    Timeout { id: Uuid, timeout: Duration },

    #[error("Appendage {id} was cancelled")]
    Cancelled { id: Uuid },

    #[error("Appendage {id} failed: {reason}")]
    ExecutionFailed { id: Uuid, reason: String },

    #[error("Coordinator has shut down")]
    CoordinatorClosed,
}

impl AppendageError {
    /// The task id this error refers to, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::InvalidTask { id }
            | Self::DuplicateTask { id }
            | Self::Timeout { id, .. }
            | Self::Cancelled { id }
            | Self::ExecutionFailed { id, .. } => Some(*id),
            Self::CapacityExceeded { .. } | Self::CoordinatorClosed => None,
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
