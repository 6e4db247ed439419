//! Execution strategies, one per task kind.

pub mod builtin;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::appendage::task::{TaskKind, TaskResult};
use crate::appendage::worker::WorkerContext;
use crate::error::AppendageError;
use crate::identity::LearnedFact;

/// The work behind one task kind.
///
/// Implementations report progress through the context and call
/// `ctx.checkpoint()` (or `ctx.work(..)`) between steps; a strategy that never
/// checkpoints cannot be stopped short of its timeout.
#[async_trait]
pub trait TaskStrategy: Send + Sync {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError>;
}

/// What a strategy hands back on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyOutput {
    pub summary: String,
    pub learned_facts: Vec<LearnedFact>,
    pub output: Option<serde_json::Map<String, serde_json::Value>>,
}

impl StrategyOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn with_fact(mut self, fact: LearnedFact) -> Self {
        self.learned_facts.push(fact);
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.output
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    pub(crate) fn into_result(self, task_id: Uuid) -> TaskResult {
        let mut result = TaskResult::succeeded(task_id, self.summary);
        result.learned_facts = self.learned_facts;
        result.output = self.output;
        result
    }
}

/// One strategy per task kind.
///
/// Lookup is an exhaustive `match`, so a new `TaskKind` variant won't compile
/// until it has a slot here.
#[derive(Clone)]
pub struct StrategySet {
    skill_acquisition: Arc<dyn TaskStrategy>,
    background_research: Arc<dyn TaskStrategy>,
    code_execution: Arc<dyn TaskStrategy>,
    file_monitoring: Arc<dyn TaskStrategy>,
    tool_execution: Arc<dyn TaskStrategy>,
    web_search: Arc<dyn TaskStrategy>,
    document_generation: Arc<dyn TaskStrategy>,
    project_analysis: Arc<dyn TaskStrategy>,
}

impl StrategySet {
    /// The built-in strategies.
    pub fn builtin() -> Self {
        Self {
            skill_acquisition: Arc::new(builtin::SkillAcquisition),
            background_research: Arc::new(builtin::BackgroundResearch),
            code_execution: Arc::new(builtin::CodeExecution),
            file_monitoring: Arc::new(builtin::FileMonitoring),
            tool_execution: Arc::new(builtin::ToolExecution),
            web_search: Arc::new(builtin::WebSearch),
            document_generation: Arc::new(builtin::DocumentGeneration),
            project_analysis: Arc::new(builtin::ProjectAnalysis::default()),
        }
    }

    /// Use the same strategy for every kind.
    pub fn uniform(strategy: Arc<dyn TaskStrategy>) -> Self {
        Self {
            skill_acquisition: strategy.clone(),
            background_research: strategy.clone(),
            code_execution: strategy.clone(),
            file_monitoring: strategy.clone(),
            tool_execution: strategy.clone(),
            web_search: strategy.clone(),
            document_generation: strategy.clone(),
            project_analysis: strategy,
        }
    }

    pub fn for_kind(&self, kind: &TaskKind) -> &Arc<dyn TaskStrategy> {
        match kind {
            TaskKind::SkillAcquisition { .. } => &self.skill_acquisition,
            TaskKind::BackgroundResearch { .. } => &self.background_research,
            TaskKind::CodeExecution { .. } => &self.code_execution,
            TaskKind::FileMonitoring { .. } => &self.file_monitoring,
            TaskKind::ToolExecution { .. } => &self.tool_execution,
            TaskKind::WebSearch { .. } => &self.web_search,
            TaskKind::DocumentGeneration { .. } => &self.document_generation,
            TaskKind::ProjectAnalysis { .. } => &self.project_analysis,
        }
    }

    pub fn with_skill_acquisition(mut self, strategy: Arc<dyn TaskStrategy>) -> Self {
        self.skill_acquisition = strategy;
        self
    }

    pub fn with_background_research(mut self, strategy: Arc<dyn TaskStrategy>) -> Self {
        self.background_research = strategy;
        self
    }

    pub fn with_code_execution(mut self, strategy: Arc<dyn TaskStrategy>) -> Self {
        self.code_execution = strategy;
        self
    }

    pub fn with_file_monitoring(mut self, strategy: Arc<dyn TaskStrategy>) -> Self {
        self.file_monitoring = strategy;
        self
    }

    pub fn with_tool_execution(mut self, strategy: Arc<dyn TaskStrategy>) -> Self {
        self.tool_execution = strategy;
        self
    }

    pub fn with_web_search(mut self, strategy: Arc<dyn TaskStrategy>) -> Self {
        self.web_search = strategy;
        self
    }

    pub fn with_document_generation(mut self, strategy: Arc<dyn TaskStrategy>) -> Self {
        self.document_generation = strategy;
        self
    }

    pub fn with_project_analysis(mut self, strategy: Arc<dyn TaskStrategy>) -> Self {
        self.project_analysis = strategy;
        self
    }
}

impl Default for StrategySet {
    fn default() -> Self {
        Self::builtin()
    }
}
