//! Worker lifecycle state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::appendage::task::{TaskDescriptor, TaskPriority};

/// Status of an in-flight appendage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Running its strategy.
    Active,
    /// Parked at a checkpoint after a pause request.
    Waiting,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully (failure, cancellation or timeout).
    Failed,
}

impl WorkerStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: WorkerStatus) -> bool {
        use WorkerStatus::*;

        matches!(
            (self, target),
            (Active, Waiting) | (Active, Completed) | (Active, Failed) |
            (Waiting, Active) | (Waiting, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: WorkerStatus,
    pub to: WorkerStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Coordinator-side bookkeeping for one in-flight appendage.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRecord {
    pub id: Uuid,
    pub task: Arc<TaskDescriptor>,
    /// Progress in `[0, 1]`.
    pub progress: f32,
    /// Last status line reported by the worker.
    pub status_text: String,
    pub status: WorkerStatus,
    /// Effective priority; starts as the task's and follows priority-change
    /// messages.
    pub priority: TaskPriority,
    /// Deadline the worker enforces, if any.
    pub timeout: Option<Duration>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StatusTransition>,
}

impl WorkerRecord {
    pub fn new(task: Arc<TaskDescriptor>, timeout: Option<Duration>) -> Self {
        Self {
            id: task.id(),
            priority: task.priority(),
            task,
            progress: 0.0,
            status_text: String::new(),
            status: WorkerStatus::Active,
            timeout,
            started_at: Utc::now(),
            finished_at: None,
            transitions: Vec::new(),
        }
    }

    pub fn transition_to(
        &mut self,
        new_status: WorkerStatus,
        reason: Option<String>,
    ) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status, new_status
            ));
        }

        self.transitions.push(StatusTransition {
            from: self.status,
            to: new_status,
            timestamp: Utc::now(),
            reason,
        });

        // A worker bouncing between pause and resume must not grow this forever.
        const MAX_TRANSITIONS: usize = 64;
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.status = new_status;
        if new_status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }

        Ok(())
    }

    /// Record a progress report. Values are clamped into `[0, 1]`; going
    /// backwards is allowed.
    pub fn set_progress(&mut self, progress: f32, status_text: impl Into<String>) {
        self.progress = if progress.is_nan() {
            self.progress
        } else {
            progress.clamp(0.0, 1.0)
        };
        self.status_text = status_text.into();
    }

    pub fn elapsed(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
