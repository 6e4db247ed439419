//! Coordinator: admission control, the in-flight table, merge-back and
//! waiter resolution.
//!
//! Every operation takes the single state lock once and does only in-memory
//! bookkeeping plus short identity-store calls under it. Strategy work runs
//! in the spawned workers, outside the lock, so a slow appendage never holds
//! up admission or retraction of others.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::appendage::event::AppendageEvent;
use crate::appendage::registry::{RegistrySummary, WorkerRegistry};
use crate::appendage::state::{WorkerRecord, WorkerStatus};
use crate::appendage::strategy::StrategySet;
use crate::appendage::task::{TaskDescriptor, TaskOutcome, TaskPriority, TaskResult, WorkerMessage};
use crate::appendage::worker::{Worker, WorkerContext};
use crate::config::CoordinatorConfig;
use crate::error::AppendageError;
use crate::identity::{IdentityStore, NotificationKind, NotificationPriority};

type Waiter = oneshot::Sender<Result<TaskResult, AppendageError>>;

/// Coordinator-side handles into one running worker.
struct WorkerControl {
    mailbox: mpsc::Sender<WorkerMessage>,
    cancel: CancellationToken,
}

struct CoordinatorState {
    registry: WorkerRegistry,
    controls: HashMap<Uuid, WorkerControl>,
    waiters: HashMap<Uuid, Vec<Waiter>>,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    identity: Arc<dyn IdentityStore>,
    strategies: Arc<StrategySet>,
    events: broadcast::Sender<AppendageEvent>,
    state: Mutex<CoordinatorState>,
}

/// Runs background appendages for one agent identity.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    /// Create a coordinator using the built-in strategies.
    pub fn new(config: CoordinatorConfig, identity: Arc<dyn IdentityStore>) -> Self {
        Self::with_strategies(config, identity, StrategySet::builtin())
    }

    pub fn with_strategies(
        config: CoordinatorConfig,
        identity: Arc<dyn IdentityStore>,
        strategies: StrategySet,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let state = CoordinatorState {
            registry: WorkerRegistry::new(config.max_appendages),
            controls: HashMap::new(),
            waiters: HashMap::new(),
        };
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                identity,
                strategies: Arc::new(strategies),
                events,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<AppendageEvent> {
        self.inner.events.subscribe()
    }

    fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn emit(&self, event: AppendageEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Admit a task and launch its worker. Returns as soon as the worker is
    /// spawned; it does not wait for any of the work.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn spawn(&self, task: TaskDescriptor) -> Result<Uuid, AppendageError> {
        let task = Arc::new(task);
        let id = task.id();
        let timeout = task.timeout().or(self.inner.config.default_timeout);

        let mut state = self.inner.state.lock().await;
        if let Err(e) = state.registry.admit(WorkerRecord::new(task.clone(), timeout)) {
            tracing::warn!(task_id = %id, kind = %task.kind(), error = %e, "Appendage refused");
            return Err(e);
        }

        let snapshot = self.inner.identity.snapshot();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(self.inner.config.message_buffer.max(1));
        let cancel = CancellationToken::new();
        state.controls.insert(
            id,
            WorkerControl {
                mailbox: mailbox_tx,
                cancel: cancel.clone(),
            },
        );

        self.inner
            .identity
            .record_active_task(id, task.description());
        self.emit(AppendageEvent::Spawned {
            task_id: id,
            kind: task.kind().name().to_string(),
            description: task.description().to_string(),
            priority: task.priority(),
        });

        let ctx = WorkerContext::new(
            task.clone(),
            snapshot,
            cancel,
            mailbox_rx,
            self.handle(),
            self.inner.config.step_delay,
        );
        let worker = Worker::new(ctx, self.inner.strategies.clone(), timeout);
        tokio::spawn(worker.execute());

        tracing::info!(
            task_id = %id,
            kind = %task.kind(),
            priority = %task.priority(),
            in_flight = state.registry.len(),
            "Appendage spawned"
        );
        Ok(id)
    }

    /// Ask an appendage to stop and drop it from the table.
    ///
    /// Returns `false` (and does nothing) for an unknown id. The worker is
    /// only signalled; it stops at its next checkpoint, and whatever it
    /// reports afterwards is discarded. Anyone waiting on it is rejected with
    /// `Cancelled` right away.
    pub async fn retract(&self, id: Uuid) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(record) = state.registry.remove(id) else {
            tracing::debug!(task_id = %id, "Retract for unknown appendage ignored");
            return false;
        };

        if let Some(control) = state.controls.remove(&id) {
            control.cancel.cancel();
        }
        for waiter in state.waiters.remove(&id).unwrap_or_default() {
            let _ = waiter.send(Err(AppendageError::Cancelled { id }));
        }

        self.inner.identity.remove_active_task(id);
        self.inner.identity.push_notification(
            NotificationKind::TaskRetracted,
            &format!("Stopped: {}", record.task.description()),
            NotificationPriority::Low,
        );
        self.emit(AppendageEvent::Retracted { task_id: id });

        tracing::info!(task_id = %id, in_flight = state.registry.len(), "Appendage retracted");
        true
    }

    /// Retract every in-flight appendage. Returns how many were retracted.
    pub async fn retract_all(&self) -> usize {
        let ids = self.inner.state.lock().await.registry.ids();
        let mut retracted = 0;
        for id in ids {
            if self.retract(id).await {
                retracted += 1;
            }
        }
        retracted
    }

    /// Wait for an appendage to finish.
    ///
    /// Fails with `InvalidTask` if `id` isn't in flight when called. Any
    /// number of callers may wait on the same id; each gets the outcome.
    /// A failed result is turned into the matching error.
    pub async fn await_result(&self, id: Uuid) -> Result<TaskResult, AppendageError> {
        let rx = {
            let mut state = self.inner.state.lock().await;
            if !state.registry.contains(id) {
                return Err(AppendageError::InvalidTask { id });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.entry(id).or_default().push(tx);
            rx
        };

        rx.await.unwrap_or(Err(AppendageError::CoordinatorClosed))
    }

    /// Send a message to one appendage without waiting for it to be handled.
    pub async fn unicast(&self, id: Uuid, message: WorkerMessage) -> Result<(), AppendageError> {
        let mut state = self.inner.state.lock().await;
        if !state.registry.contains(id) {
            return Err(AppendageError::InvalidTask { id });
        }
        Self::deliver(&mut state, id, message);
        Ok(())
    }

    /// Send a message to every in-flight appendage. Returns the number of
    /// mailboxes it was queued in.
    pub async fn broadcast(&self, message: WorkerMessage) -> usize {
        let mut state = self.inner.state.lock().await;
        let ids = state.registry.ids();
        ids.into_iter()
            .filter(|id| Self::deliver(&mut state, *id, message.clone()))
            .count()
    }

    fn deliver(state: &mut CoordinatorState, id: Uuid, message: WorkerMessage) -> bool {
        if let WorkerMessage::PriorityChange { priority } = message {
            let _ = state.registry.update(id, |r| r.priority = priority);
        }

        let Some(control) = state.controls.get(&id) else {
            return false;
        };
        if message == WorkerMessage::Abort {
            // Don't let a full mailbox swallow a stop request.
            control.cancel.cancel();
        }

        match control.mailbox.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                tracing::warn!(task_id = %id, ?message, "Worker mailbox full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(task_id = %id, "Worker mailbox closed");
                false
            }
        }
    }

    /// Worker callback: merge a finished appendage back in.
    ///
    /// Returns `false` if the id is no longer tracked (already completed or
    /// retracted); nothing is merged in that case.
    pub(crate) async fn completed(&self, id: Uuid, result: TaskResult) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(mut record) = state.registry.remove(id) else {
            tracing::debug!(
                task_id = %id,
                outcome = %result.outcome,
                "Completion for untracked appendage ignored"
            );
            return false;
        };
        state.controls.remove(&id);

        let identity = &self.inner.identity;
        for fact in &result.learned_facts {
            identity.add_learned_fact(fact.clone());
        }
        identity.adjust_mood(if result.success() {
            self.inner.config.success_mood
        } else {
            self.inner.config.failure_mood
        });

        let status = if result.success() {
            WorkerStatus::Completed
        } else {
            WorkerStatus::Failed
        };
        if let Err(e) = record.transition_to(status, Some(result.summary.clone())) {
            tracing::debug!(task_id = %id, error = %e, "Final status not recorded");
        }
        identity.remove_active_task(id);

        let resolution = resolve(&record, &result);
        for waiter in state.waiters.remove(&id).unwrap_or_default() {
            let _ = waiter.send(resolution.clone());
        }

        if record.task.notify_on_completion() {
            let (kind, message) = if result.success() {
                (
                    NotificationKind::TaskCompleted,
                    format!("Finished: {}. {}", record.task.description(), result.summary),
                )
            } else {
                (
                    NotificationKind::TaskFailed,
                    format!(
                        "Failed: {}. {}",
                        record.task.description(),
                        result.errors.join("; ")
                    ),
                )
            };
            let priority = if !result.success() || record.priority == TaskPriority::Urgent {
                NotificationPriority::High
            } else {
                NotificationPriority::Normal
            };
            identity.push_notification(kind, &message, priority);
        }

        self.emit(if result.success() {
            AppendageEvent::Completed {
                task_id: id,
                summary: result.summary.clone(),
            }
        } else {
            AppendageEvent::Failed {
                task_id: id,
                outcome: result.outcome,
                error: result.errors.join("; "),
            }
        });

        tracing::info!(
            task_id = %id,
            outcome = %result.outcome,
            facts = result.learned_facts.len(),
            in_flight = state.registry.len(),
            "Appendage merged"
        );
        true
    }

    /// Worker callback: record incremental progress.
    pub(crate) async fn report_progress(&self, id: Uuid, progress: f32, status: String) {
        let mut state = self.inner.state.lock().await;
        let updated = state.registry.update(id, |r| {
            r.set_progress(progress, status.clone());
            r.progress
        });
        match updated {
            Ok(progress) => {
                tracing::debug!(task_id = %id, progress, status = %status, "Appendage progress");
                self.inner.identity.update_task_progress(id, progress);
                self.emit(AppendageEvent::Progress {
                    task_id: id,
                    progress,
                    status,
                });
            }
            Err(_) => {
                tracing::debug!(task_id = %id, "Progress for untracked appendage ignored");
            }
        }
    }

    /// Worker callback: the worker parked or resumed.
    pub(crate) async fn status_changed(&self, id: Uuid, status: WorkerStatus) {
        let mut state = self.inner.state.lock().await;
        match state.registry.update(id, |r| r.transition_to(status, None)) {
            Ok(Ok(())) => self.emit(AppendageEvent::StatusChanged {
                task_id: id,
                status,
            }),
            Ok(Err(e)) => tracing::debug!(task_id = %id, error = %e, "Status change rejected"),
            Err(_) => tracing::debug!(task_id = %id, "Status for untracked appendage ignored"),
        }
    }

    /// Number of appendages currently in flight.
    pub async fn in_flight_count(&self) -> usize {
        self.inner.state.lock().await.registry.len()
    }

    /// (id, description) for every in-flight appendage, oldest first.
    pub async fn list(&self) -> Vec<(Uuid, String)> {
        self.inner.state.lock().await.registry.descriptions()
    }

    /// Last reported progress for an in-flight appendage.
    pub async fn progress(&self, id: Uuid) -> Option<f32> {
        self.inner
            .state
            .lock()
            .await
            .registry
            .get(id)
            .map(|r| r.progress)
    }

    /// A copy of the record for an in-flight appendage.
    pub async fn record(&self, id: Uuid) -> Option<WorkerRecord> {
        self.inner.state.lock().await.registry.get(id).cloned()
    }

    pub async fn summary(&self) -> RegistrySummary {
        self.inner.state.lock().await.registry.summary()
    }
}

/// Map a result to what waiters receive.
fn resolve(record: &WorkerRecord, result: &TaskResult) -> Result<TaskResult, AppendageError> {
    let id = record.id;
    match result.outcome {
        TaskOutcome::Succeeded => Ok(result.clone()),
        TaskOutcome::Cancelled => Err(AppendageError::Cancelled { id }),
        TaskOutcome::TimedOut => Err(AppendageError::Timeout {
            id,
            timeout: record.timeout.unwrap_or_default(),
        }),
        TaskOutcome::Failed => Err(AppendageError::ExecutionFailed {
            id,
            reason: result.errors.join("; "),
        }),
    }
}

/// Non-owning back-reference from a worker to its coordinator.
///
/// Holding one does not keep the coordinator alive; calls made after the
/// coordinator is gone are dropped.
#[derive(Clone)]
pub struct CoordinatorHandle {
    inner: Weak<CoordinatorInner>,
}

impl CoordinatorHandle {
    /// A handle with no coordinator behind it; every report is dropped.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    fn upgrade(&self) -> Option<Coordinator> {
        self.inner.upgrade().map(|inner| Coordinator { inner })
    }

    pub(crate) async fn completed(&self, id: Uuid, result: TaskResult) {
        match self.upgrade() {
            Some(coordinator) => {
                coordinator.completed(id, result).await;
            }
            None => tracing::debug!(task_id = %id, "Coordinator gone, result dropped"),
        }
    }

    pub(crate) async fn progress(&self, id: Uuid, progress: f32, status: String) {
        if let Some(coordinator) = self.upgrade() {
            coordinator.report_progress(id, progress, status).await;
        }
    }

    pub(crate) async fn status_changed(&self, id: Uuid, status: WorkerStatus) {
        if let Some(coordinator) = self.upgrade() {
            coordinator.status_changed(id, status).await;
        }
    }
}
