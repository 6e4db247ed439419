//! Per-appendage worker execution.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::appendage::coordinator::CoordinatorHandle;
use crate::appendage::state::WorkerStatus;
use crate::appendage::strategy::StrategySet;
use crate::appendage::task::{TaskDescriptor, TaskPriority, TaskResult, WorkerMessage};
use crate::error::AppendageError;
use crate::identity::IdentitySnapshot;

/// Everything a strategy can see and do while it runs.
///
/// Strategies call `checkpoint` (or `work`, which ends in one) between steps.
/// That is the only place messages are applied, pauses are honoured and
/// cancellation is observed.
pub struct WorkerContext {
    task: Arc<TaskDescriptor>,
    snapshot: IdentitySnapshot,
    cancel: CancellationToken,
    mailbox: mpsc::Receiver<WorkerMessage>,
    mailbox_open: bool,
    handle: CoordinatorHandle,
    priority: TaskPriority,
    context_notes: Vec<String>,
    paused: bool,
    progress: f32,
    step_delay: Duration,
}

impl WorkerContext {
    pub(crate) fn new(
        task: Arc<TaskDescriptor>,
        snapshot: IdentitySnapshot,
        cancel: CancellationToken,
        mailbox: mpsc::Receiver<WorkerMessage>,
        handle: CoordinatorHandle,
        step_delay: Duration,
    ) -> Self {
        Self {
            priority: task.priority(),
            task,
            snapshot,
            cancel,
            mailbox,
            mailbox_open: true,
            handle,
            context_notes: Vec::new(),
            paused: false,
            progress: 0.0,
            step_delay,
        }
    }

    pub fn id(&self) -> Uuid {
        self.task.id()
    }

    pub fn task(&self) -> &TaskDescriptor {
        &self.task
    }

    pub fn snapshot(&self) -> &IdentitySnapshot {
        &self.snapshot
    }

    /// Current effective priority (follows priority-change messages).
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Context pushed to this worker since it started.
    pub fn context_notes(&self) -> &[String] {
        &self.context_notes
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Suggested pause between steps.
    pub fn step_delay(&self) -> Duration {
        self.step_delay
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report progress to the coordinator.
    pub async fn report_progress(&mut self, progress: f32, status: impl Into<String>) {
        self.progress = progress;
        self.handle
            .progress(self.id(), progress, status.into())
            .await;
    }

    /// Apply pending messages, park while paused, and fail with `Cancelled`
    /// if a stop was requested.
    pub async fn checkpoint(&mut self) -> Result<(), AppendageError> {
        while let Ok(message) = self.mailbox.try_recv() {
            self.apply(message);
        }

        let mut parked = false;
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(task_id = %self.id(), "Cancellation observed at checkpoint");
                return Err(AppendageError::Cancelled { id: self.id() });
            }
            if !self.paused {
                break;
            }

            if !parked {
                parked = true;
                tracing::debug!(task_id = %self.id(), "Worker parked");
                self.handle
                    .status_changed(self.id(), WorkerStatus::Waiting)
                    .await;
            }

            if !self.mailbox_open {
                // Nobody can resume us any more.
                return Err(AppendageError::Cancelled { id: self.id() });
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                message = self.mailbox.recv() => match message {
                    Some(message) => self.apply(message),
                    None => self.mailbox_open = false,
                },
            }
        }

        if parked {
            tracing::debug!(task_id = %self.id(), "Worker resumed");
            self.handle
                .status_changed(self.id(), WorkerStatus::Active)
                .await;
        }

        Ok(())
    }

    /// Spend `duration` on a step, waking early on cancellation, then
    /// checkpoint.
    pub async fn work(&mut self, duration: Duration) -> Result<(), AppendageError> {
        if !duration.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(duration) => {}
            }
        }
        self.checkpoint().await
    }

    fn apply(&mut self, message: WorkerMessage) {
        tracing::debug!(task_id = %self.id(), ?message, "Worker message applied");
        match message {
            WorkerMessage::PriorityChange { priority } => self.priority = priority,
            WorkerMessage::ContextUpdate { context } => self.context_notes.push(context),
            WorkerMessage::Abort => self.cancel.cancel(),
            WorkerMessage::Pause => self.paused = true,
            WorkerMessage::Resume => self.paused = false,
        }
    }
}

/// Worker that executes a single appendage.
pub struct Worker {
    ctx: WorkerContext,
    strategies: Arc<StrategySet>,
    timeout: Option<Duration>,
}

impl Worker {
    pub(crate) fn new(
        ctx: WorkerContext,
        strategies: Arc<StrategySet>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            ctx,
            strategies,
            timeout,
        }
    }

    /// Run the task to one terminal outcome and report it exactly once.
    ///
    /// Consumes the worker, so a second report is impossible from here.
    pub async fn execute(mut self) {
        let id = self.ctx.id();
        let kind = self.ctx.task().kind().name();
        let start = Instant::now();

        tracing::info!(
            task_id = %id,
            kind,
            priority = %self.ctx.priority(),
            "Appendage starting"
        );

        self.ctx.report_progress(0.0, "starting").await;

        let strategy = self.strategies.for_kind(self.ctx.task().kind()).clone();
        let run = AssertUnwindSafe(strategy.run(&mut self.ctx)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| limit),
            None => Ok(run.await),
        };

        let result = match outcome {
            Ok(Ok(Ok(output))) => output.into_result(id),
            Ok(Ok(Err(AppendageError::Cancelled { .. }))) => TaskResult::cancelled(id),
            Ok(Ok(Err(AppendageError::Timeout { timeout, .. }))) => {
                TaskResult::timed_out(id, timeout)
            }
            Ok(Ok(Err(AppendageError::ExecutionFailed { reason, .. }))) => {
                TaskResult::failed(id, reason)
            }
            Ok(Ok(Err(e))) => TaskResult::failed(id, e.to_string()),
            Ok(Err(panic)) => TaskResult::failed(id, panic_message(panic.as_ref())),
            Err(limit) => {
                tracing::warn!(task_id = %id, timeout = ?limit, "Appendage timed out");
                TaskResult::timed_out(id, limit)
            }
        };

        if result.success() {
            self.ctx.report_progress(1.0, "done").await;
        }

        let result = result.with_elapsed(start.elapsed());
        tracing::info!(
            task_id = %id,
            kind,
            outcome = %result.outcome,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Appendage finished"
        );

        self.ctx.handle.completed(id, result).await;
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("strategy panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("strategy panicked: {s}")
    } else {
        "strategy panicked".to_string()
    }
}
