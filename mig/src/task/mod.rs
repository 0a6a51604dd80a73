//! Tasks: in-memory units of executable work, one or more per table job.
//!
//! A task runs an ordered list of phases, each decomposed into idempotent steps
//! with persisted doing/done/failed sub-statuses, so a crash loses at most one
//! step of work. Tasks hang together in a per-job DAG of must-finish-before
//! edges.

pub mod base;
pub mod dag;
pub mod phase;
pub mod progress;

pub use base::{Task, TaskContext, TaskId, TaskKind, TaskStatusView, TaskWork};
pub use dag::TaskDag;
pub use phase::{StepStatus, TaskCheckpoint, TaskPhase};
pub use progress::TaskProgress;
