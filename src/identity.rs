//! Agent identity: the snapshot handed to workers and the store the
//! coordinator merges results back into.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Personality parameters, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    pub curiosity: f32,
    pub warmth: f32,
    pub directness: f32,
    pub playfulness: f32,
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            curiosity: 0.7,
            warmth: 0.6,
            directness: 0.5,
            playfulness: 0.4,
        }
    }
}

/// Current mood. `valence` is in `[-1, 1]`, `arousal` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mood {
    pub valence: f32,
    pub arousal: f32,
}

impl Default for Mood {
    fn default() -> Self {
        Self {
            valence: 0.0,
            arousal: 0.3,
        }
    }
}

impl Mood {
    /// Apply a nudge, clamping to the valid ranges.
    pub fn apply(&mut self, delta: MoodDelta) {
        self.valence = (self.valence + delta.valence).clamp(-1.0, 1.0);
        self.arousal = (self.arousal + delta.arousal).clamp(0.0, 1.0);
    }
}

/// A fixed-magnitude mood adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoodDelta {
    pub valence: f32,
    pub arousal: f32,
}

/// Point-in-time copy of the agent's identity.
///
/// Each worker owns its own copy. It is never written after capture, so an
/// appendage speaks with one voice for the whole unit of work even if the
/// live identity drifts in the meantime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub name: Option<String>,
    pub personality: Personality,
    pub values: Vec<String>,
    pub mood: Mood,
    pub taken_at: DateTime<Utc>,
}

impl IdentitySnapshot {
    /// Name to sign output with.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("assistant")
    }
}

/// A piece of knowledge an appendage picked up while working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedFact {
    pub content: String,
    /// Where the fact came from, e.g. `"background_research"`.
    pub source: String,
}

impl LearnedFact {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskCompleted,
    TaskFailed,
    TaskRetracted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
}

/// A notification queued for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub priority: NotificationPriority,
}

/// The persistent identity the coordinator reads snapshots from and writes
/// learnings into.
///
/// Every write is fire-and-forget: implementations must return promptly and
/// push any slow persistence off to their own tasks. The coordinator calls
/// these from inside its serialized section, so calls for one coordinator
/// arrive in a total order.
pub trait IdentityStore: Send + Sync {
    /// Capture the current identity.
    fn snapshot(&self) -> IdentitySnapshot;

    fn add_learned_fact(&self, fact: LearnedFact);

    fn adjust_mood(&self, delta: MoodDelta);

    /// Add an entry to the "active appendages" list.
    fn record_active_task(&self, id: Uuid, description: &str);

    fn update_task_progress(&self, id: Uuid, progress: f32);

    fn remove_active_task(&self, id: Uuid);

    fn push_notification(&self, kind: NotificationKind, message: &str, priority: NotificationPriority);
}

/// An entry in the store's active-appendage list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveTask {
    pub description: String,
    pub progress: f32,
}

#[derive(Debug, Default)]
struct IdentityState {
    name: Option<String>,
    personality: Personality,
    values: Vec<String>,
    mood: Mood,
    facts: Vec<LearnedFact>,
    active: BTreeMap<Uuid, ActiveTask>,
    notifications: Vec<Notification>,
}

/// Identity store kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    state: Mutex<IdentityState>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with a name and a set of values.
    pub fn with_identity(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            state: Mutex::new(IdentityState {
                name: Some(name.into()),
                values,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, IdentityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn facts(&self) -> Vec<LearnedFact> {
        self.state().facts.clone()
    }

    pub fn mood(&self) -> Mood {
        self.state().mood
    }

    pub fn set_mood(&self, mood: Mood) {
        self.state().mood = mood;
    }

    pub fn active_tasks(&self) -> BTreeMap<Uuid, ActiveTask> {
        self.state().active.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state().notifications.clone()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn snapshot(&self) -> IdentitySnapshot {
        let state = self.state();
        IdentitySnapshot {
            name: state.name.clone(),
            personality: state.personality.clone(),
            values: state.values.clone(),
            mood: state.mood,
            taken_at: Utc::now(),
        }
    }

    fn add_learned_fact(&self, fact: LearnedFact) {
        self.state().facts.push(fact);
    }

    fn adjust_mood(&self, delta: MoodDelta) {
        self.state().mood.apply(delta);
    }

    fn record_active_task(&self, id: Uuid, description: &str) {
        self.state().active.insert(
            id,
            ActiveTask {
                description: description.to_string(),
                progress: 0.0,
            },
        );
    }

    fn update_task_progress(&self, id: Uuid, progress: f32) {
        if let Some(task) = self.state().active.get_mut(&id) {
            task.progress = progress;
        }
    }

    fn remove_active_task(&self, id: Uuid) {
        self.state().active.remove(&id);
    }

    fn push_notification(&self, kind: NotificationKind, message: &str, priority: NotificationPriority) {
        self.state().notifications.push(Notification {
            kind,
            message: message.to_string(),
            priority,
        });
    }
}
