//! Built-in strategies.
//!
//! These are lightweight stand-ins paced by `step_delay`. Research, search,
//! skill and document strategies only simulate their work; file monitoring
//! and project analysis touch the filesystem for real. Swap any of them out
//! through `StrategySet`.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::appendage::strategy::{StrategyOutput, TaskStrategy};
use crate::appendage::task::TaskKind;
use crate::appendage::worker::WorkerContext;
use crate::error::AppendageError;
use crate::identity::LearnedFact;

/// Upper bound on directory entries a project analysis will visit.
const MAX_ANALYSIS_ENTRIES: usize = 5_000;

fn wrong_kind(ctx: &WorkerContext, expected: &str) -> AppendageError {
    AppendageError::ExecutionFailed {
        id: ctx.id(),
        reason: format!(
            "{expected} strategy cannot run a {} task",
            ctx.task().kind().name()
        ),
    }
}

fn fail(ctx: &WorkerContext, reason: impl Into<String>) -> AppendageError {
    AppendageError::ExecutionFailed {
        id: ctx.id(),
        reason: reason.into(),
    }
}

pub struct SkillAcquisition;

#[async_trait]
impl TaskStrategy for SkillAcquisition {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        let TaskKind::SkillAcquisition { domain, urgency } = ctx.task().kind().clone() else {
            return Err(wrong_kind(ctx, "skill_acquisition"));
        };

        // More urgent skills get a shorter, shallower pass.
        let stages: &[&str] = if urgency >= 0.7 {
            &["surveying", "consolidating"]
        } else {
            &["surveying", "practising", "consolidating"]
        };

        let delay = ctx.step_delay();
        for (i, stage) in stages.iter().enumerate() {
            ctx.report_progress(i as f32 / stages.len() as f32, format!("{stage} {domain}"))
                .await;
            ctx.work(delay).await?;
        }

        Ok(StrategyOutput::new(format!("Acquired working knowledge of {domain}"))
            .with_fact(LearnedFact::new(
                format!("Has a working grasp of {domain}"),
                "skill_acquisition",
            ))
            .with_output("stages", json!(stages.len())))
    }
}

pub struct BackgroundResearch;

#[async_trait]
impl TaskStrategy for BackgroundResearch {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        let TaskKind::BackgroundResearch { topic, depth } = ctx.task().kind().clone() else {
            return Err(wrong_kind(ctx, "background_research"));
        };

        let sources = depth.max(1);
        let delay = ctx.step_delay();
        for i in 0..sources {
            ctx.report_progress(
                i as f32 / sources as f32,
                format!("reading source {}/{sources} on {topic}", i + 1),
            )
            .await;
            ctx.work(delay).await?;
        }

        let mut output = StrategyOutput::new(format!("Researched {topic} across {sources} sources"))
            .with_fact(LearnedFact::new(
                format!("Background reading done on {topic}"),
                "background_research",
            ))
            .with_output("sources", json!(sources));
        for note in ctx.context_notes() {
            output = output.with_fact(LearnedFact::new(
                format!("{topic}: {note}"),
                "background_research",
            ));
        }
        Ok(output)
    }
}

/// Validates and sizes up a snippet. No interpreter is attached by default;
/// plug a real runner in through `StrategySet::with_code_execution`.
pub struct CodeExecution;

#[async_trait]
impl TaskStrategy for CodeExecution {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        let TaskKind::CodeExecution { language, code } = ctx.task().kind().clone() else {
            return Err(wrong_kind(ctx, "code_execution"));
        };

        if code.trim().is_empty() {
            return Err(fail(ctx, "no code to run"));
        }

        ctx.report_progress(0.3, format!("checking {language} snippet")).await;
        let delay = ctx.step_delay();
        ctx.work(delay).await?;

        let lines = code.lines().filter(|l| !l.trim().is_empty()).count();
        ctx.report_progress(0.8, "recording result").await;
        ctx.work(delay).await?;

        Ok(
            StrategyOutput::new(format!("Dry-ran {lines} lines of {language}"))
                .with_output("language", json!(language))
                .with_output("lines", json!(lines)),
        )
    }
}

pub struct FileMonitoring;

#[async_trait]
impl TaskStrategy for FileMonitoring {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        let TaskKind::FileMonitoring { paths } = ctx.task().kind().clone() else {
            return Err(wrong_kind(ctx, "file_monitoring"));
        };

        if paths.is_empty() {
            return Err(fail(ctx, "no paths to monitor"));
        }

        let mut report = serde_json::Map::new();
        let mut missing = Vec::new();
        for (i, path) in paths.iter().enumerate() {
            ctx.report_progress(
                i as f32 / paths.len() as f32,
                format!("checking {}", path.display()),
            )
            .await;

            let entry = match tokio::fs::metadata(path).await {
                Ok(meta) => json!({
                    "exists": true,
                    "is_dir": meta.is_dir(),
                    "len": meta.len(),
                }),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Monitored path unavailable");
                    missing.push(path.display().to_string());
                    json!({ "exists": false })
                }
            };
            report.insert(path.display().to_string(), entry);
            ctx.checkpoint().await?;
        }

        let mut output = StrategyOutput::new(format!(
            "Checked {} paths, {} missing",
            paths.len(),
            missing.len()
        ));
        output.output = Some(report);
        for path in missing {
            output = output.with_fact(LearnedFact::new(
                format!("{path} is missing"),
                "file_monitoring",
            ));
        }
        Ok(output)
    }
}

/// Runs the built-in `echo` tool; anything else fails as unknown.
pub struct ToolExecution;

#[async_trait]
impl TaskStrategy for ToolExecution {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        let TaskKind::ToolExecution { tool, parameters } = ctx.task().kind().clone() else {
            return Err(wrong_kind(ctx, "tool_execution"));
        };

        ctx.report_progress(0.2, format!("invoking {tool}")).await;
        ctx.checkpoint().await?;

        match tool.as_str() {
            "echo" => {
                let delay = ctx.step_delay();
                ctx.work(delay).await?;
                let params: serde_json::Map<String, serde_json::Value> =
                    parameters.into_iter().collect();
                let mut output = StrategyOutput::new(format!("echo returned {} fields", params.len()));
                output.output = Some(params);
                Ok(output)
            }
            other => Err(fail(ctx, format!("unknown tool: {other}"))),
        }
    }
}

pub struct WebSearch;

#[async_trait]
impl TaskStrategy for WebSearch {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        let TaskKind::WebSearch { query, max_results } = ctx.task().kind().clone() else {
            return Err(wrong_kind(ctx, "web_search"));
        };

        if query.trim().is_empty() {
            return Err(fail(ctx, "empty search query"));
        }

        let delay = ctx.step_delay();
        ctx.report_progress(0.1, format!("searching for {query}")).await;
        ctx.work(delay).await?;
        ctx.report_progress(0.6, "ranking results").await;
        ctx.work(delay).await?;

        let results = max_results.min(10);
        Ok(StrategyOutput::new(format!("Searched for \"{query}\""))
            .with_fact(LearnedFact::new(
                format!("Looked up \"{query}\""),
                "web_search",
            ))
            .with_output("query", json!(query))
            .with_output("result_limit", json!(results)))
    }
}

pub struct DocumentGeneration;

#[async_trait]
impl TaskStrategy for DocumentGeneration {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        let TaskKind::DocumentGeneration { title, format } = ctx.task().kind().clone() else {
            return Err(wrong_kind(ctx, "document_generation"));
        };

        let delay = ctx.step_delay();
        let sections = ["outline", "draft", "review"];
        for (i, section) in sections.iter().enumerate() {
            ctx.report_progress(i as f32 / sections.len() as f32, format!("{section}: {title}"))
                .await;
            ctx.work(delay).await?;
        }

        let author = ctx.snapshot().display_name().to_string();
        let mut body = format!("{title}\n\nPrepared by {author}.\n");
        for note in ctx.context_notes() {
            body.push_str(&format!("\n- {note}"));
        }

        Ok(StrategyOutput::new(format!("Generated {format} document \"{title}\""))
            .with_output("title", json!(title))
            .with_output("format", json!(format))
            .with_output("body", json!(body)))
    }
}

/// Walks a project tree and tallies files by extension.
///
/// Only an unreadable root is fatal; subdirectories that can't be read are
/// logged, counted as skipped and left out.
pub struct ProjectAnalysis {
    max_entries: usize,
}

impl ProjectAnalysis {
    /// Stop the walk after visiting `max_entries` directory entries.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self { max_entries }
    }
}

impl Default for ProjectAnalysis {
    fn default() -> Self {
        Self::with_max_entries(MAX_ANALYSIS_ENTRIES)
    }
}

#[async_trait]
impl TaskStrategy for ProjectAnalysis {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        let TaskKind::ProjectAnalysis { root } = ctx.task().kind().clone() else {
            return Err(wrong_kind(ctx, "project_analysis"));
        };

        ctx.report_progress(0.0, format!("scanning {}", root.display()))
            .await;

        let mut by_extension: BTreeMap<String, usize> = BTreeMap::new();
        let mut pending = vec![root.clone()];
        let mut visited = 0usize;
        let mut skipped = 0usize;
        let mut truncated = false;

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == root => {
                    return Err(fail(ctx, format!("cannot read {}: {e}", dir.display())));
                }
                Err(e) => {
                    tracing::debug!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                    skipped += 1;
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) if dir == root => {
                        return Err(fail(ctx, format!("cannot read {}: {e}", dir.display())));
                    }
                    Err(e) => {
                        tracing::debug!(path = %dir.display(), error = %e, "Directory listing cut short");
                        skipped += 1;
                        break;
                    }
                };

                if visited >= self.max_entries {
                    truncated = true;
                    break;
                }
                visited += 1;

                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    if !is_hidden(&path) {
                        pending.push(path);
                    }
                } else if file_type.is_file() {
                    let ext = path
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("(none)")
                        .to_string();
                    *by_extension.entry(ext).or_default() += 1;
                }
            }

            ctx.checkpoint().await?;
            if truncated {
                tracing::warn!(
                    root = %root.display(),
                    max_entries = self.max_entries,
                    "Project analysis truncated"
                );
                break;
            }
        }

        let files: usize = by_extension.values().sum();
        let mut summary = format!("Analyzed {} ({files} files", root.display());
        if skipped > 0 {
            summary.push_str(&format!(", {skipped} directories skipped"));
        }
        if truncated {
            summary.push_str(", truncated");
        }
        summary.push(')');

        let mut output = StrategyOutput::new(summary)
            .with_output("files", json!(files))
            .with_output("by_extension", json!(by_extension))
            .with_output("skipped", json!(skipped))
            .with_output("truncated", json!(truncated));

        if let Some((ext, _)) = by_extension.iter().max_by_key(|(_, count)| **count) {
            output = output.with_fact(LearnedFact::new(
                format!("{} is mostly .{ext} files", root.display()),
                "project_analysis",
            ));
        }
        Ok(output)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') || n == "target")
}
