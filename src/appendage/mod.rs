//! Appendage system: bounded parallel background work for one agent identity.
//!
//! Core components:
//! - `task`: task descriptors, results and worker messages
//! - `state`: worker status machine and per-appendage records
//! - `registry`: capacity-bounded table of in-flight records
//! - `event`: lifecycle event stream for UI subscribers
//! - `strategy`: per-kind execution strategies
//! - `worker`: runs one task, checkpointing for messages and cancellation
//! - `coordinator`: admission, retraction, waiters and merge-back

pub mod coordinator;
pub mod event;
pub mod registry;
pub mod state;
pub mod strategy;
pub mod task;
pub mod worker;

pub use coordinator::Coordinator;
pub use event::AppendageEvent;
pub use registry::RegistrySummary;
pub use state::{WorkerRecord, WorkerStatus};
pub use strategy::{StrategyOutput, StrategySet, TaskStrategy};
pub use task::{TaskDescriptor, TaskKind, TaskOutcome, TaskPriority, TaskResult, WorkerMessage};
pub use worker::WorkerContext;
