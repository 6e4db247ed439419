//! Table of in-flight appendages.
//!
//! Plain data structure; the coordinator owns it behind its monitor lock, so
//! the capacity check and the insert in `admit` happen as one step.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::appendage::state::{WorkerRecord, WorkerStatus};
use crate::error::AppendageError;

/// Capacity-bounded table of worker records.
#[derive(Debug)]
pub struct WorkerRegistry {
    records: HashMap<Uuid, WorkerRecord>,
    /// Every id ever admitted, so a finished or retracted id can't come back.
    /// Grows by one 16-byte id per admission for the registry's lifetime;
    /// that cost is accepted in exchange for never re-admitting an id.
    seen: HashSet<Uuid>,
    max_workers: usize,
}

impl WorkerRegistry {
    pub fn new(max_workers: usize) -> Self {
        Self {
            records: HashMap::new(),
            seen: HashSet::new(),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of ids admitted so far, in flight or retired.
    pub fn admitted_count(&self) -> usize {
        self.seen.len()
    }

    /// Admit a new record, enforcing the ceiling and id uniqueness.
    pub fn admit(&mut self, record: WorkerRecord) -> Result<(), AppendageError> {
        if self.seen.contains(&record.id) {
            return Err(AppendageError::DuplicateTask { id: record.id });
        }
        if self.records.len() >= self.max_workers {
            return Err(AppendageError::CapacityExceeded {
                max: self.max_workers,
            });
        }

        self.seen.insert(record.id);
        self.records.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<&WorkerRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.records.contains_key(&id)
    }

    /// Apply `f` to the record for `id`.
    pub fn update<F, R>(&mut self, id: Uuid, f: F) -> Result<R, AppendageError>
    where
        F: FnOnce(&mut WorkerRecord) -> R,
    {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(AppendageError::InvalidTask { id })?;
        Ok(f(record))
    }

    pub fn remove(&mut self, id: Uuid) -> Option<WorkerRecord> {
        self.records.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.records.keys().copied().collect()
    }

    /// (id, description) for every in-flight record, oldest first.
    pub fn descriptions(&self) -> Vec<(Uuid, String)> {
        let mut records: Vec<&WorkerRecord> = self.records.values().collect();
        records.sort_by_key(|r| r.started_at);
        records
            .into_iter()
            .map(|r| (r.id, r.task.description().to_string()))
            .collect()
    }

    pub fn summary(&self) -> RegistrySummary {
        let mut summary = RegistrySummary {
            capacity: self.max_workers,
            ..Default::default()
        };
        for record in self.records.values() {
            match record.status {
                WorkerStatus::Active => summary.active += 1,
                WorkerStatus::Waiting => summary.waiting += 1,
                // Terminal records are removed as soon as they're reached.
                WorkerStatus::Completed | WorkerStatus::Failed => {}
            }
        }
        summary.total = self.records.len();
        summary
    }
}

/// Counts of in-flight appendages by status.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    pub total: usize,
    pub active: usize,
    pub waiting: usize,
    pub capacity: usize,
}
