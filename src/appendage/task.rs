//! Task descriptors, results and worker messages.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::LearnedFact;

/// Scheduling hint attached to a task.
///
/// Recorded and logged, never enforced: admission is first-come up to the
/// ceiling and there is no preemption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Background,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Background => "background",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

/// What an appendage should do. Closed set; adding a kind means adding a
/// strategy slot in `StrategySet` too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    SkillAcquisition {
        domain: String,
        /// How pressing the skill is, in `[0, 1]`.
        urgency: f32,
    },
    BackgroundResearch {
        topic: String,
        /// Number of sources to consult.
        depth: u32,
    },
    CodeExecution {
        language: String,
        code: String,
    },
    FileMonitoring {
        paths: Vec<PathBuf>,
    },
    ToolExecution {
        tool: String,
        parameters: HashMap<String, serde_json::Value>,
    },
    WebSearch {
        query: String,
        max_results: usize,
    },
    DocumentGeneration {
        title: String,
        format: String,
    },
    ProjectAnalysis {
        root: PathBuf,
    },
}

impl TaskKind {
    /// Stable snake_case name, also used as the provenance tag on facts.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SkillAcquisition { .. } => "skill_acquisition",
            Self::BackgroundResearch { .. } => "background_research",
            Self::CodeExecution { .. } => "code_execution",
            Self::FileMonitoring { .. } => "file_monitoring",
            Self::ToolExecution { .. } => "tool_execution",
            Self::WebSearch { .. } => "web_search",
            Self::DocumentGeneration { .. } => "document_generation",
            Self::ProjectAnalysis { .. } => "project_analysis",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable request describing one unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    id: Uuid,
    kind: TaskKind,
    description: String,
    priority: TaskPriority,
    timeout: Option<Duration>,
    notify_on_completion: bool,
    created_at: DateTime<Utc>,
}

impl TaskDescriptor {
    /// Create a descriptor with a fresh id, normal priority, no timeout and
    /// completion notifications on.
    pub fn new(kind: TaskKind, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description: description.into(),
            priority: TaskPriority::default(),
            timeout: None,
            notify_on_completion: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify_on_completion = notify;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn notify_on_completion(&self) -> bool {
        self.notify_on_completion
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// How a unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// The single terminal record a worker produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub outcome: TaskOutcome,
    pub summary: String,
    pub learned_facts: Vec<LearnedFact>,
    pub errors: Vec<String>,
    pub elapsed: Duration,
    pub output: Option<serde_json::Map<String, serde_json::Value>>,
}

impl TaskResult {
    pub fn succeeded(task_id: Uuid, summary: impl Into<String>) -> Self {
        Self::with_outcome(task_id, TaskOutcome::Succeeded, summary.into(), Vec::new())
    }

    pub fn failed(task_id: Uuid, error: impl Into<String>) -> Self {
        let error = error.into();
        Self::with_outcome(
            task_id,
            TaskOutcome::Failed,
            format!("Failed: {error}"),
            vec![error],
        )
    }

    pub fn cancelled(task_id: Uuid) -> Self {
        Self::with_outcome(
            task_id,
            TaskOutcome::Cancelled,
            "Cancelled before completion".to_string(),
            vec!["cancelled".to_string()],
        )
    }

    pub fn timed_out(task_id: Uuid, timeout: Duration) -> Self {
        Self::with_outcome(
            task_id,
            TaskOutcome::TimedOut,
            format!("Timed out after {timeout:?}"),
            vec![format!("timed out after {timeout:?}")],
        )
    }

    fn with_outcome(task_id: Uuid, outcome: TaskOutcome, summary: String, errors: Vec<String>) -> Self {
        Self {
            task_id,
            outcome,
            summary,
            learned_facts: Vec::new(),
            errors,
            elapsed: Duration::ZERO,
            output: None,
        }
    }

    pub fn with_fact(mut self, fact: LearnedFact) -> Self {
        self.learned_facts.push(fact);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn success(&self) -> bool {
        self.outcome == TaskOutcome::Succeeded
    }
}

/// Messages the coordinator can push into a running worker's mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    PriorityChange { priority: TaskPriority },
    ContextUpdate { context: String },
    Abort,
    Pause,
    Resume,
}
