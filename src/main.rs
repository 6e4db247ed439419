use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use appendage::appendage::{AppendageEvent, Coordinator, TaskDescriptor, TaskKind, TaskPriority};
use appendage::config::CoordinatorConfig;
use appendage::identity::InMemoryIdentityStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = CoordinatorConfig::from_env()?;

    eprintln!("Appendage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Max concurrent: {}", config.max_appendages);
    eprintln!(
        "   Default timeout: {}",
        config
            .default_timeout
            .map(|t| format!("{t:?}"))
            .unwrap_or_else(|| "none".to_string())
    );
    eprintln!();

    let store = Arc::new(InMemoryIdentityStore::with_identity(
        "Ada",
        vec!["curiosity".to_string(), "candour".to_string()],
    ));
    let coordinator = Coordinator::new(config, store.clone());

    // Subscribe before spawning so no terminal event is missed.
    let mut events = coordinator.subscribe();

    let project_root = std::env::current_dir()?;
    let tasks = vec![
        TaskDescriptor::new(
            TaskKind::BackgroundResearch {
                topic: "structured concurrency".to_string(),
                depth: 3,
            },
            "Read up on structured concurrency",
        ),
        TaskDescriptor::new(
            TaskKind::ProjectAnalysis {
                root: project_root.clone(),
            },
            "Survey the working directory",
        )
        .with_priority(TaskPriority::High),
        TaskDescriptor::new(
            TaskKind::FileMonitoring {
                paths: vec![
                    project_root.join("Cargo.toml"),
                    PathBuf::from("/definitely/not/here"),
                ],
            },
            "Check watched files",
        )
        .with_priority(TaskPriority::Background),
        TaskDescriptor::new(
            TaskKind::ToolExecution {
                tool: "echo".to_string(),
                parameters: HashMap::from([("greeting".to_string(), serde_json::json!("hello"))]),
            },
            "Echo a greeting",
        ),
        TaskDescriptor::new(
            TaskKind::ToolExecution {
                tool: "teleport".to_string(),
                parameters: HashMap::new(),
            },
            "Call a tool that doesn't exist",
        )
        .with_priority(TaskPriority::Urgent),
        TaskDescriptor::new(
            TaskKind::DocumentGeneration {
                title: "Weekly summary".to_string(),
                format: "markdown".to_string(),
            },
            "Draft the weekly summary",
        ),
    ];

    let mut spawned = Vec::new();
    for task in tasks {
        let description = task.description().to_string();
        match coordinator.spawn(task).await {
            Ok(id) => spawned.push((id, description)),
            Err(e) => eprintln!("   Not started ({description}): {e}"),
        }
    }

    let mut pending: HashMap<Uuid, String> = spawned.into_iter().collect();
    let wait_all = async {
        while !pending.is_empty() {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            tracing::debug!(event = ?event, "Appendage event");

            let Some(description) = pending.remove(&event.task_id()) else {
                continue;
            };
            match event {
                AppendageEvent::Completed { summary, .. } => {
                    eprintln!("   ✓ {description}: {summary}");
                }
                AppendageEvent::Failed { outcome, error, .. } => {
                    eprintln!("   ✗ {description} ({outcome}): {error}");
                }
                AppendageEvent::Retracted { .. } => eprintln!("   - {description}: retracted"),
                _ => {
                    pending.insert(event.task_id(), description);
                }
            }
        }
    };

    tokio::select! {
        _ = wait_all => {}
        _ = tokio::signal::ctrl_c() => {
            let retracted = coordinator.retract_all().await;
            eprintln!("\n   Interrupted, retracted {retracted} appendages");
        }
    }

    eprintln!();
    eprintln!("Learned facts:");
    for fact in store.facts() {
        eprintln!("   [{}] {}", fact.source, fact.content);
    }
    let mood = store.mood();
    eprintln!(
        "Mood: valence {:.2}, arousal {:.2}",
        mood.valence, mood.arousal
    );
    eprintln!("Notifications:");
    for note in store.notifications() {
        eprintln!("   ({:?}) {}", note.priority, note.message);
    }

    Ok(())
}
