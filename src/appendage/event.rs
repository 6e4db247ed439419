//! Event stream for appendage activity.
//!
//! The coordinator broadcasts an `AppendageEvent` for every lifecycle change.
//! UI layers subscribe through `Coordinator::subscribe` and render from it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::appendage::state::WorkerStatus;
use crate::appendage::task::{TaskOutcome, TaskPriority};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppendageEvent {
    /// An appendage was admitted and its worker launched.
    Spawned {
        task_id: Uuid,
        kind: String,
        description: String,
        priority: TaskPriority,
    },
    /// A worker reported progress.
    Progress {
        task_id: Uuid,
        progress: f32,
        status: String,
    },
    /// A worker paused or resumed.
    StatusChanged {
        task_id: Uuid,
        status: WorkerStatus,
    },
    /// A worker finished successfully.
    Completed {
        task_id: Uuid,
        summary: String,
    },
    /// A worker finished unsuccessfully.
    Failed {
        task_id: Uuid,
        outcome: TaskOutcome,
        error: String,
    },
    /// An appendage was retracted before it reported back.
    Retracted { task_id: Uuid },
}

impl AppendageEvent {
    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Spawned { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::StatusChanged { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::Retracted { task_id } => *task_id,
        }
    }

    /// Whether this is the last event emitted for its task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Retracted { .. }
        )
    }
}
