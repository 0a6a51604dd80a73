//! Persistence for job records and task sub-status checkpoints.

pub mod base;
pub mod memory;
pub mod postgres;

pub use base::JobStore;
pub use memory::MemoryJobStore;
pub use postgres::PostgresJobStore;
