//! Integration tests for the appendage coordinator.
//!
//! Each test builds a coordinator over an in-memory identity store and drives
//! it only through the public API. Strategies are swapped in through
//! `StrategySet` so timing stays under the test's control.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use uuid::Uuid;

use appendage::appendage::{
    AppendageEvent, Coordinator, StrategyOutput, StrategySet, TaskDescriptor, TaskKind,
    TaskOutcome, TaskStrategy, WorkerContext, WorkerMessage,
};
use appendage::config::CoordinatorConfig;
use appendage::error::AppendageError;
use appendage::identity::{InMemoryIdentityStore, LearnedFact, NotificationKind};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps working until the shared gate opens, checkpointing every few ms.
struct Gate {
    open: Arc<AtomicBool>,
}

#[async_trait]
impl TaskStrategy for Gate {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        while !self.open.load(Ordering::SeqCst) {
            ctx.work(Duration::from_millis(5)).await?;
        }
        Ok(StrategyOutput::new(format!("done: {}", ctx.task().description())))
    }
}

/// Pretends to evaluate `x = 2 + 2` once the gate opens.
struct ScriptedCode {
    open: Arc<AtomicBool>,
}

#[async_trait]
impl TaskStrategy for ScriptedCode {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        while !self.open.load(Ordering::SeqCst) {
            ctx.work(Duration::from_millis(5)).await?;
        }
        ctx.report_progress(0.5, "evaluating").await;
        Ok(StrategyOutput::new("evaluated x = 2 + 2")
            .with_fact(LearnedFact::new("x=4", "code_execution"))
            .with_output("stdout", serde_json::json!("4")))
    }
}

struct AlwaysFails;

#[async_trait]
impl TaskStrategy for AlwaysFails {
    async fn run(&self, ctx: &mut WorkerContext) -> Result<StrategyOutput, AppendageError> {
        Err(AppendageError::ExecutionFailed {
            id: ctx.id(),
            reason: "nothing to index".to_string(),
        })
    }
}

fn research(topic: &str) -> TaskDescriptor {
    TaskDescriptor::new(
        TaskKind::BackgroundResearch {
            topic: topic.to_string(),
            depth: 1,
        },
        format!("Research {topic}"),
    )
}

fn gated_coordinator() -> (Coordinator, Arc<InMemoryIdentityStore>, Arc<AtomicBool>) {
    let open = Arc::new(AtomicBool::new(false));
    let store = Arc::new(InMemoryIdentityStore::with_identity("Ada", vec![]));
    let strategies = StrategySet::uniform(Arc::new(Gate { open: open.clone() }));
    let coordinator =
        Coordinator::with_strategies(CoordinatorConfig::default(), store.clone(), strategies);
    (coordinator, store, open)
}

/// Wait until the given ids have all produced a terminal event.
async fn wait_terminal(
    events: &mut tokio::sync::broadcast::Receiver<AppendageEvent>,
    ids: &[Uuid],
) -> HashMap<Uuid, AppendageEvent> {
    let mut seen = HashMap::new();
    while seen.len() < ids.len() {
        let event = events.recv().await.expect("event stream closed");
        if event.is_terminal() && ids.contains(&event.task_id()) {
            seen.insert(event.task_id(), event);
        }
    }
    seen
}

#[tokio::test]
async fn sixth_spawn_refused_until_a_slot_frees() {
    let (coordinator, _store, open) = gated_coordinator();

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(coordinator.spawn(research(&format!("topic {i}"))).await.unwrap());
    }
    assert_eq!(coordinator.in_flight_count().await, 5);

    let sixth = research("topic 5");
    let refused = coordinator.spawn(sixth.clone()).await;
    assert_eq!(refused, Err(AppendageError::CapacityExceeded { max: 5 }));
    assert_eq!(coordinator.in_flight_count().await, 5);

    assert!(coordinator.retract(ids[2]).await);
    assert_eq!(coordinator.in_flight_count().await, 4);
    assert!(coordinator.progress(ids[2]).await.is_none());

    let sixth_id = coordinator.spawn(sixth).await.unwrap();
    assert_eq!(coordinator.in_flight_count().await, 5);
    assert!(coordinator.record(sixth_id).await.is_some());

    open.store(true, Ordering::SeqCst);
    timeout(TEST_TIMEOUT, async {
        while coordinator.in_flight_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("appendages never drained");
}

#[tokio::test]
async fn awaited_code_result_merges_fact_once() {
    let open = Arc::new(AtomicBool::new(false));
    let store = Arc::new(InMemoryIdentityStore::with_identity("Ada", vec![]));
    let strategies = StrategySet::builtin().with_code_execution(Arc::new(ScriptedCode {
        open: open.clone(),
    }));
    let coordinator =
        Coordinator::with_strategies(CoordinatorConfig::default(), store.clone(), strategies);

    let id = coordinator
        .spawn(TaskDescriptor::new(
            TaskKind::CodeExecution {
                language: "python".to_string(),
                code: "x = 2 + 2".to_string(),
            },
            "Evaluate a snippet",
        ))
        .await
        .unwrap();

    let release = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        open.store(true, Ordering::SeqCst);
    };
    let (result, ()) = timeout(TEST_TIMEOUT, async {
        tokio::join!(coordinator.await_result(id), release)
    })
    .await
    .expect("await_result hung");

    let result = result.unwrap();
    assert!(result.success());
    assert_eq!(result.task_id, id);
    assert_eq!(result.learned_facts.len(), 1);
    assert_eq!(result.learned_facts[0].content, "x=4");
    assert_eq!(result.output.as_ref().unwrap()["stdout"], "4");

    let facts = store.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].content, "x=4");
    assert_eq!(coordinator.in_flight_count().await, 0);
    assert!(store.active_tasks().is_empty());

    let notes = store.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::TaskCompleted);
}

#[tokio::test]
async fn silent_failure_nudges_mood_without_notifying() {
    let store = Arc::new(InMemoryIdentityStore::with_identity("Ada", vec![]));
    let strategies = StrategySet::uniform(Arc::new(AlwaysFails));
    let coordinator =
        Coordinator::with_strategies(CoordinatorConfig::default(), store.clone(), strategies);
    let before = store.mood();
    let mut events = coordinator.subscribe();

    let task = TaskDescriptor::new(
        TaskKind::ProjectAnalysis {
            root: "/nonexistent".into(),
        },
        "Analyze a missing project",
    )
    .with_notify(false);
    let id = coordinator.spawn(task).await.unwrap();

    let terminal = timeout(TEST_TIMEOUT, wait_terminal(&mut events, &[id]))
        .await
        .expect("no terminal event");
    match &terminal[&id] {
        AppendageEvent::Failed { outcome, error, .. } => {
            assert_eq!(*outcome, TaskOutcome::Failed);
            assert!(error.contains("nothing to index"));
        }
        other => panic!("expected failure event, got {other:?}"),
    }

    let after = store.mood();
    assert!(after.valence < before.valence);
    assert!(store.facts().is_empty());
    assert!(store.notifications().is_empty());
    assert!(store.active_tasks().is_empty());
    assert_eq!(coordinator.in_flight_count().await, 0);
}

#[tokio::test]
async fn retracting_one_leaves_others_untouched() {
    let (coordinator, store, open) = gated_coordinator();
    let mut events = coordinator.subscribe();

    let keep = coordinator.spawn(research("kept")).await.unwrap();
    let dropped = coordinator.spawn(research("dropped")).await.unwrap();

    coordinator
        .unicast(
            keep,
            WorkerMessage::ContextUpdate {
                context: "only for the kept one".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(coordinator.retract(dropped).await);
    assert!(!coordinator.retract(dropped).await);
    assert_eq!(
        coordinator.unicast(dropped, WorkerMessage::Pause).await,
        Err(AppendageError::InvalidTask { id: dropped })
    );

    open.store(true, Ordering::SeqCst);
    let terminal = timeout(TEST_TIMEOUT, wait_terminal(&mut events, &[keep, dropped]))
        .await
        .expect("no terminal events");

    assert!(matches!(terminal[&keep], AppendageEvent::Completed { .. }));
    assert!(matches!(terminal[&dropped], AppendageEvent::Retracted { .. }));

    let notes = store.notifications();
    let retracted = notes
        .iter()
        .filter(|n| n.kind == NotificationKind::TaskRetracted)
        .count();
    let completed = notes
        .iter()
        .filter(|n| n.kind == NotificationKind::TaskCompleted)
        .count();
    assert_eq!(retracted, 1);
    assert_eq!(completed, 1);
    assert_eq!(coordinator.in_flight_count().await, 0);
}

#[tokio::test]
async fn broadcast_reaches_every_worker() {
    let (coordinator, _store, _open) = gated_coordinator();
    let mut events = coordinator.subscribe();

    let mut ids = Vec::new();
    for topic in ["a", "b", "c"] {
        ids.push(coordinator.spawn(research(topic)).await.unwrap());
    }

    assert_eq!(coordinator.broadcast(WorkerMessage::Abort).await, 3);

    let terminal = timeout(TEST_TIMEOUT, wait_terminal(&mut events, &ids))
        .await
        .expect("aborted workers never finished");
    for id in &ids {
        match &terminal[id] {
            AppendageEvent::Failed { outcome, .. } => assert_eq!(*outcome, TaskOutcome::Cancelled),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
    assert_eq!(coordinator.in_flight_count().await, 0);
}

#[tokio::test]
async fn builtin_strategies_run_end_to_end() {
    let store = Arc::new(InMemoryIdentityStore::with_identity("Ada", vec![]));
    let config = CoordinatorConfig {
        step_delay: Duration::ZERO,
        ..Default::default()
    };
    let coordinator = Coordinator::new(config, store.clone());
    let mut events = coordinator.subscribe();

    let dir = std::env::temp_dir();
    let missing = dir.join(format!("appendage-missing-{}", Uuid::new_v4()));
    let monitor = coordinator
        .spawn(TaskDescriptor::new(
            TaskKind::FileMonitoring {
                paths: vec![dir.clone(), missing.clone()],
            },
            "Watch the temp dir",
        ))
        .await
        .unwrap();
    let echo = coordinator
        .spawn(TaskDescriptor::new(
            TaskKind::ToolExecution {
                tool: "echo".to_string(),
                parameters: HashMap::from([("ping".to_string(), serde_json::json!("pong"))]),
            },
            "Echo",
        ))
        .await
        .unwrap();
    let unknown = coordinator
        .spawn(TaskDescriptor::new(
            TaskKind::ToolExecution {
                tool: "teleport".to_string(),
                parameters: HashMap::new(),
            },
            "Teleport",
        ))
        .await
        .unwrap();

    let terminal = timeout(TEST_TIMEOUT, wait_terminal(&mut events, &[monitor, echo, unknown]))
        .await
        .expect("built-in strategies hung");

    assert!(matches!(terminal[&monitor], AppendageEvent::Completed { .. }));
    assert!(matches!(terminal[&echo], AppendageEvent::Completed { .. }));
    match &terminal[&unknown] {
        AppendageEvent::Failed { error, .. } => assert!(error.contains("unknown tool")),
        other => panic!("expected failure, got {other:?}"),
    }

    let facts = store.facts();
    assert_eq!(facts.len(), 1);
    assert!(facts[0].content.contains(&missing.display().to_string()));
}

#[tokio::test]
async fn timed_out_task_reports_timeout() {
    let (coordinator, store, _open) = gated_coordinator();
    let id = coordinator
        .spawn(research("slow").with_timeout(Duration::from_millis(30)))
        .await
        .unwrap();

    let result = timeout(TEST_TIMEOUT, coordinator.await_result(id))
        .await
        .expect("await_result hung");
    assert!(matches!(
        result,
        Err(AppendageError::Timeout { id: tid, .. }) if tid == id
    ));
    assert!(store.facts().is_empty());
    assert_eq!(coordinator.in_flight_count().await, 0);
}

#[tokio::test]
async fn context_update_reaches_running_strategy() {
    let store = Arc::new(InMemoryIdentityStore::with_identity("Ada", vec![]));
    let config = CoordinatorConfig {
        step_delay: Duration::from_millis(20),
        ..Default::default()
    };
    let coordinator = Coordinator::new(config, store.clone());
    let mut events = coordinator.subscribe();

    let id = coordinator
        .spawn(TaskDescriptor::new(
            TaskKind::BackgroundResearch {
                topic: "borrowck".to_string(),
                depth: 3,
            },
            "Research borrowck",
        ))
        .await
        .unwrap();
    coordinator
        .unicast(
            id,
            WorkerMessage::ContextUpdate {
                context: "focus on two-phase borrows".to_string(),
            },
        )
        .await
        .unwrap();

    let terminal = timeout(TEST_TIMEOUT, wait_terminal(&mut events, &[id]))
        .await
        .expect("research never finished");
    assert!(matches!(terminal[&id], AppendageEvent::Completed { .. }));

    let facts: Vec<String> = store.facts().into_iter().map(|f| f.content).collect();
    assert!(facts.contains(&"Background reading done on borrowck".to_string()));
    assert!(facts.contains(&"borrowck: focus on two-phase borrows".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_spawns_respect_ceiling() {
    let (coordinator, _store, open) = gated_coordinator();

    let attempts: Vec<_> = (0..20)
        .map(|i| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.spawn(research(&format!("race {i}"))).await })
        })
        .collect();

    let mut admitted = 0;
    let mut refused = 0;
    for attempt in attempts {
        match timeout(TEST_TIMEOUT, attempt).await.unwrap().unwrap() {
            Ok(_) => admitted += 1,
            Err(AppendageError::CapacityExceeded { max: 5 }) => refused += 1,
            Err(other) => panic!("unexpected spawn error: {other}"),
        }
    }
    assert_eq!(admitted, 5);
    assert_eq!(refused, 15);
    assert_eq!(coordinator.in_flight_count().await, 5);
    assert_eq!(coordinator.list().await.len(), 5);

    open.store(true, Ordering::SeqCst);
    timeout(TEST_TIMEOUT, async {
        while coordinator.in_flight_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("appendages never drained");
}
